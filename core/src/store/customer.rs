use super::DeskStore;
use crate::{
    clock::Period,
    error::DeskResult,
    record::CustomerProfile,
    trust::{MonthOutcomes, TrustUpdate},
};
use rusqlite::{params, types::Type, OptionalExtension};

const DATE_FORMAT: &str = "%Y-%m-%d";

impl DeskStore {
    // ── Customer ──────────────────────────────────────────────────

    pub fn insert_customer(&self, run_id: &str, c: &CustomerProfile) -> DeskResult<()> {
        self.conn.execute(
            "INSERT INTO customer (
                run_id, customer_id, onboarding_date, historical_txn_count, trust_score
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                &c.customer_id,
                c.onboarding_date.format(DATE_FORMAT).to_string(),
                c.historical_txn_count as i64,
                c.trust_score,
            ],
        )?;
        Ok(())
    }

    /// Write back a customer's month-close state.
    pub fn update_customer_close(
        &self,
        run_id: &str,
        customer_id: &str,
        trust_score: f64,
        historical_txn_count: u64,
    ) -> DeskResult<()> {
        self.conn.execute(
            "UPDATE customer SET trust_score = ?1, historical_txn_count = ?2
             WHERE run_id = ?3 AND customer_id = ?4",
            params![trust_score, historical_txn_count as i64, run_id, customer_id],
        )?;
        Ok(())
    }

    pub fn get_customer(&self, run_id: &str, customer_id: &str) -> DeskResult<Option<CustomerProfile>> {
        let customer = self
            .conn
            .query_row(
                "SELECT customer_id, onboarding_date, historical_txn_count, trust_score
                 FROM customer WHERE run_id = ?1 AND customer_id = ?2",
                params![run_id, customer_id],
                |row| {
                    let date: String = row.get(1)?;
                    let onboarding_date = chrono::NaiveDate::parse_from_str(&date, DATE_FORMAT)
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
                    Ok(CustomerProfile {
                        customer_id: row.get(0)?,
                        onboarding_date,
                        historical_txn_count: row.get::<_, i64>(2)? as u64,
                        trust_score: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(customer)
    }

    pub fn customer_count(&self, run_id: &str) -> DeskResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM customer WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ── Trust history ─────────────────────────────────────────────

    pub fn insert_trust_update(&self, run_id: &str, u: &TrustUpdate) -> DeskResult<()> {
        self.conn.execute(
            "INSERT INTO trust_history (
                run_id, customer_id, period, previous, updated,
                allow_count, review_count, block_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                &u.customer_id,
                u.period.label(),
                u.previous,
                u.updated,
                u.outcomes.allow as i64,
                u.outcomes.review as i64,
                u.outcomes.block as i64,
            ],
        )?;
        Ok(())
    }

    /// A customer's trust trajectory, oldest period first.
    pub fn trust_history(&self, run_id: &str, customer_id: &str) -> DeskResult<Vec<TrustUpdate>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, period, previous, updated, allow_count, review_count, block_count
             FROM trust_history WHERE run_id = ?1 AND customer_id = ?2
             ORDER BY period ASC",
        )?;
        let rows = stmt.query_map(params![run_id, customer_id], |row| {
            let label: String = row.get(1)?;
            let period: Period = label
                .parse()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
            Ok(TrustUpdate {
                customer_id: row.get(0)?,
                period,
                previous: row.get(2)?,
                updated: row.get(3)?,
                outcomes: MonthOutcomes {
                    allow: row.get::<_, i64>(4)? as u64,
                    review: row.get::<_, i64>(5)? as u64,
                    block: row.get::<_, i64>(6)? as u64,
                },
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
