use super::DeskStore;
use crate::{
    clock::Period,
    decision::Decision,
    error::DeskResult,
    monitoring::DecisionShares,
    record::{RecordRejection, ScoredTransaction},
};
use rusqlite::{params, types::Type};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

impl DeskStore {
    // ── Scored transactions ──────────────────────────────────────

    pub fn insert_scored(&self, run_id: &str, period: Period, t: &ScoredTransaction) -> DeskResult<()> {
        self.conn.execute(
            "INSERT INTO scored_transaction (
                run_id, period, transaction_id, customer_id, transaction_timestamp,
                source_country, destination_country, transaction_amount, device_changed,
                reason_codes, ml_risk_score, trust_score, combined_risk, decision
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run_id,
                period.label(),
                &t.transaction_id,
                &t.customer_id,
                t.transaction_timestamp.format(TIMESTAMP_FORMAT).to_string(),
                &t.source_country,
                &t.destination_country,
                t.transaction_amount,
                if t.device_changed { 1 } else { 0 },
                &t.reason_codes_str,
                t.ml_risk_score,
                t.trust_score,
                t.combined_risk,
                t.decision.as_str(),
            ],
        )?;
        Ok(())
    }

    /// One period's decision table in timestamp order.
    pub fn scored_for_period(&self, run_id: &str, period: Period) -> DeskResult<Vec<ScoredTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, customer_id, transaction_timestamp, source_country,
                    destination_country, transaction_amount, device_changed, reason_codes,
                    ml_risk_score, trust_score, combined_risk, decision
             FROM scored_transaction WHERE run_id = ?1 AND period = ?2
             ORDER BY transaction_timestamp ASC, transaction_id ASC",
        )?;
        let rows = stmt.query_map(params![run_id, period.label()], |row| {
            let ts: String = row.get(2)?;
            let transaction_timestamp = chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT)
                .map_err(|e| conversion_error(2, e))?;
            let decision: String = row.get(11)?;
            let decision: Decision = decision.parse().map_err(|e| conversion_error(11, e))?;
            Ok(ScoredTransaction {
                transaction_id: row.get(0)?,
                customer_id: row.get(1)?,
                transaction_timestamp,
                source_country: row.get(3)?,
                destination_country: row.get(4)?,
                transaction_amount: row.get(5)?,
                device_changed: row.get::<_, i32>(6)? != 0,
                reason_codes_str: row.get(7)?,
                ml_risk_score: row.get(8)?,
                trust_score: row.get(9)?,
                combined_risk: row.get(10)?,
                decision,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn decision_counts(&self, run_id: &str, period: Period) -> DeskResult<DecisionShares> {
        let mut stmt = self.conn.prepare(
            "SELECT decision, COUNT(*) FROM scored_transaction
             WHERE run_id = ?1 AND period = ?2 GROUP BY decision",
        )?;
        let mut shares = DecisionShares::default();
        let rows = stmt.query_map(params![run_id, period.label()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (decision, n) = row?;
            match decision.parse::<Decision>()? {
                Decision::Allow => shares.allow = n as u64,
                Decision::Review => shares.review = n as u64,
                Decision::Block => shares.block = n as u64,
            }
        }
        Ok(shares)
    }

    pub fn scored_count(&self, run_id: &str) -> DeskResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM scored_transaction WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ── Rejections ────────────────────────────────────────────────

    pub fn insert_rejection(
        &self,
        run_id: &str,
        period: Option<Period>,
        r: &RecordRejection,
    ) -> DeskResult<()> {
        self.conn.execute(
            "INSERT INTO record_rejection (run_id, period, record, line, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                period.map(|p| p.label()),
                &r.record,
                r.line.map(|l| l as i64),
                &r.reason,
            ],
        )?;
        Ok(())
    }

    pub fn rejection_count(&self, run_id: &str) -> DeskResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM record_rejection WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
