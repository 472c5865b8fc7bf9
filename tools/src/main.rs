//! desk-runner: headless batch runner for the cross-border risk desk.
//!
//! Usage:
//!   desk-runner generate --seed 42 --out OUTPUTS/INPUTS
//!   desk-runner score --input OUTPUTS/INPUTS --out OUTPUTS/RISK_SCORE_TXNS
//!   desk-runner run --seed 42 --out OUTPUTS/RISK_SCORE_TXNS --db run.db
//!   desk-runner report --scored OUTPUTS/RISK_SCORE_TXNS
//!   desk-runner dashboard --scored OUTPUTS/RISK_SCORE_TXNS overview
//!   desk-runner dashboard --scored OUTPUTS/RISK_SCORE_TXNS ipc

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use riskdesk_core::{
    clock::Period,
    config::DeskConfig,
    dashboard::{self, DashboardData, ExplorerFilter, SimulationResult, SimulatorSettings},
    decision::{Decision, DecisionPolicy},
    engine::{DeskEngine, PeriodSummary},
    generator::generate_dataset,
    monitoring::{self, MonitoringReport},
    store::DeskStore,
    table::{self, TRANSACTIONS_PREFIX},
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

const REPORT_FILE: &str = "monitoring_report.json";

#[derive(Parser)]
#[command(name = "desk-runner", about = "Cross-border fraud risk decision desk")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Master seed for synthetic data.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// First period, YYYY_MM. Defaults to run.json.
    #[arg(long)]
    start: Option<String>,
    /// Number of months. Defaults to run.json.
    #[arg(long)]
    months: Option<u32>,
    /// Directory holding the JSON configuration files.
    #[arg(long, env = "DESK_DATA_DIR", default_value = "./data")]
    data_dir: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Write synthetic input tables (customers + monthly transactions)
    Generate {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value = "OUTPUTS/INPUTS")]
        out: PathBuf,
    },

    /// Score input tables and write monthly decision tables
    Score {
        #[arg(long, default_value = "OUTPUTS/INPUTS")]
        input: PathBuf,
        #[arg(long, default_value = "OUTPUTS/RISK_SCORE_TXNS")]
        out: PathBuf,
        #[arg(long, env = "DESK_DATA_DIR", default_value = "./data")]
        data_dir: String,
        #[arg(long, default_value = ":memory:")]
        db: String,
        /// Recorded on the run; scoring itself is deterministic.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Generate and score in one pass
    Run {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value = "OUTPUTS/RISK_SCORE_TXNS")]
        out: PathBuf,
        /// Also write the generated input tables here.
        #[arg(long)]
        inputs: Option<PathBuf>,
        #[arg(long, default_value = ":memory:")]
        db: String,
    },

    /// Monthly distribution and drift over scored tables
    Report {
        #[arg(long, default_value = "OUTPUTS/RISK_SCORE_TXNS")]
        scored: PathBuf,
        /// Write the report as JSON here.
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Read-only dashboard views over scored tables
    Dashboard {
        #[arg(long, default_value = "OUTPUTS/RISK_SCORE_TXNS")]
        scored: PathBuf,
        #[command(subcommand)]
        view: DashboardView,
    },
}

#[derive(Subcommand)]
enum DashboardView {
    /// Headline counts and monthly decision split
    Overview,
    /// Threshold tuning on ML score and trust
    Simulate {
        #[arg(long, default_value_t = 0.9)]
        block: f64,
        #[arg(long, default_value_t = 0.6)]
        review: f64,
        #[arg(long, default_value_t = 0.7)]
        trust_auto_allow: f64,
    },
    /// Re-decide every row under a policy file
    SimulatePolicy {
        #[arg(long)]
        policy: PathBuf,
    },
    /// ML score histogram and riskiest corridors
    Risk,
    /// Filtered listing, riskiest first
    Explore {
        #[arg(long = "month")]
        months: Vec<String>,
        #[arg(long = "decision")]
        decisions: Vec<String>,
        #[arg(long, default_value_t = 0.0)]
        min_risk: f64,
    },
    /// JSON-lines requests on stdin, one response per line on stdout
    Ipc,
}

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcRequest {
    Overview,
    Simulate { settings: SimulatorSettings },
    SimulatePolicy { policy: DecisionPolicy },
    Risk,
    Explore { filter: ExplorerFilter },
    Report,
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { run, out } => cmd_generate(&run, &out),
        Commands::Score {
            input,
            out,
            data_dir,
            db,
            seed,
        } => cmd_score(&input, &out, &data_dir, &db, seed),
        Commands::Run { run, out, inputs, db } => cmd_run(&run, &out, inputs.as_deref(), &db),
        Commands::Report { scored, json } => cmd_report(&scored, json.as_deref()),
        Commands::Dashboard { scored, view } => {
            let data = DashboardData::load(&scored)
                .with_context(|| format!("loading scored tables from {}", scored.display()))?;
            if !data.rejections.is_empty() {
                log::warn!("{} scored rows failed validation and were skipped", data.rejections.len());
            }
            match view {
                DashboardView::Ipc => run_ipc_loop(&data),
                other => print_view(&data, other),
            }
        }
    }
}

fn resolve_periods(config: &DeskConfig, run: &RunArgs) -> Result<(Period, u32)> {
    let start = match &run.start {
        Some(s) => s.parse::<Period>()?,
        None => config.start_period,
    };
    Ok((start, run.months.unwrap_or(config.months)))
}

fn open_engine(db: &str, seed: u64, config: DeskConfig) -> Result<DeskEngine> {
    let store = DeskStore::open(db)?;
    store.migrate()?;
    let run_id = format!("run-{seed}-{}", chrono::Utc::now().timestamp());
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"))?;
    Ok(DeskEngine::new(run_id, seed, config, store)?)
}

fn cmd_generate(run: &RunArgs, out: &Path) -> Result<()> {
    let config = DeskConfig::load(&run.data_dir)?;
    let (start, months) = resolve_periods(&config, run)?;
    let dataset = generate_dataset(&config, run.seed, start, months);

    table::write_customers(out, &dataset.profiles())?;
    for (period, txns) in &dataset.months {
        let path = table::write_transactions(out, *period, txns)?;
        println!("  {period}: {} transactions -> {}", txns.len(), path.display());
    }
    println!(
        "Generated {} customers, {} transactions (seed {}).",
        dataset.customers.len(),
        dataset.transaction_count(),
        run.seed
    );
    Ok(())
}

fn cmd_score(input: &Path, out: &Path, data_dir: &str, db: &str, seed: u64) -> Result<()> {
    let config = DeskConfig::load(data_dir)?;
    let mut engine = open_engine(db, seed, config)?;
    let (summaries, rejected) = score_tables(&mut engine, input)?;
    finish_run(&engine, out, &summaries, rejected)
}

/// Score every transactions table under `input`. The count covers
/// rows the readers could not parse and records the engine rejected.
fn score_tables(engine: &mut DeskEngine, input: &Path) -> Result<(Vec<PeriodSummary>, usize)> {
    let customers = table::read_customers(input)?;
    engine.record_rejections(None, &customers.rejections)?;
    let mut rejected = customers.rejections.len() + engine.register_customers(customers.records)?.len();

    let periods = table::list_periods(input, TRANSACTIONS_PREFIX)?;
    if periods.is_empty() {
        anyhow::bail!("no {TRANSACTIONS_PREFIX}YYYY_MM.csv tables in {}", input.display());
    }

    let mut summaries = Vec::with_capacity(periods.len());
    for period in periods {
        let read = table::read_transactions(input, period)?;
        engine.record_rejections(Some(period), &read.rejections)?;
        rejected += read.rejections.len();
        let summary = engine.score_period(period, read.records)?;
        rejected += summary.rejections.len();
        summaries.push(summary);
    }
    Ok((summaries, rejected))
}

fn cmd_run(run: &RunArgs, out: &Path, inputs: Option<&Path>, db: &str) -> Result<()> {
    let config = DeskConfig::load(&run.data_dir)?;
    let (start, months) = resolve_periods(&config, run)?;
    let dataset = generate_dataset(&config, run.seed, start, months);

    if let Some(dir) = inputs {
        table::write_customers(dir, &dataset.profiles())?;
        for (period, txns) in &dataset.months {
            table::write_transactions(dir, *period, txns)?;
        }
    }

    let mut engine = open_engine(db, run.seed, config)?;
    let mut rejected = engine.register_customers(dataset.profiles())?.len();
    let mut summaries = Vec::with_capacity(dataset.months.len());
    for (period, txns) in dataset.months {
        let summary = engine.score_period(period, txns)?;
        rejected += summary.rejections.len();
        summaries.push(summary);
    }

    finish_run(&engine, out, &summaries, rejected)
}

fn finish_run(engine: &DeskEngine, out: &Path, summaries: &[PeriodSummary], rejected: usize) -> Result<()> {
    for s in summaries {
        let path = table::write_scored(out, s.period, &s.scored)?;
        log::info!("wrote {}", path.display());
    }
    let report = monitoring::build_report(summaries.iter().map(|s| (s.period, s.scored.as_slice())));
    write_report_json(&out.join(REPORT_FILE), &report)?;

    println!("=== RUN SUMMARY ===");
    println!("  run_id:         {}", engine.run_id);
    println!("  customers:      {}", engine.customer_count());
    println!("  periods:        {}", engine.clock.periods_closed);
    println!("  scored txns:    {}", engine.store.scored_count(&engine.run_id)?);
    println!("  rejected:       {rejected}");
    println!("  output:         {}", out.display());
    println!();
    print_report(&report);
    Ok(())
}

fn load_report(scored: &Path) -> Result<MonitoringReport> {
    let data = DashboardData::load(scored)?;
    Ok(monitoring::build_report(
        data.months.iter().map(|(p, rows)| (*p, rows.as_slice())),
    ))
}

fn cmd_report(scored: &Path, json: Option<&Path>) -> Result<()> {
    let report = load_report(scored)?;
    if let Some(path) = json {
        write_report_json(path, &report)?;
    }
    print_report(&report);
    Ok(())
}

fn write_report_json(path: &Path, report: &MonitoringReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn print_report(report: &MonitoringReport) {
    println!("=== MONTHLY DECISIONS ===");
    if report.months.is_empty() {
        println!("  (No scored months)");
    }
    for m in &report.months {
        println!(
            "  {} | txns: {:>6} | ALLOW {:>5.1}% | REVIEW {:>5.1}% | BLOCK {:>5.1}% | ML mean {} var {}",
            m.period,
            m.transactions,
            m.decisions.percent(Decision::Allow),
            m.decisions.percent(Decision::Review),
            m.decisions.percent(Decision::Block),
            fmt_opt(m.ml_mean),
            fmt_opt(m.ml_variance),
        );
        let corridors: Vec<String> = m
            .corridor_shares
            .iter()
            .map(|(k, v)| format!("{k} {:.1}%", v * 100.0))
            .collect();
        println!("           corridors: {}", corridors.join(", "));
    }
    if !report.drift.is_empty() {
        println!();
        println!("=== DRIFT ===");
        for d in &report.drift {
            println!(
                "  {} -> {} | corridor PSI {:.4} | ML PSI {:.4} | ML mean Δ {} | {:?}",
                d.from,
                d.to,
                d.corridor_psi,
                d.ml_score_psi,
                fmt_opt(d.ml_mean_delta),
                d.level
            );
        }
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "n/a".into())
}

fn print_simulation(result: &SimulationResult) {
    for d in Decision::ALL {
        println!(
            "  {:<6} {:>6.2}%  ({:+.2})",
            d.as_str(),
            result.simulated.percent(d),
            result.delta_pct.get(&d).copied().unwrap_or(0.0)
        );
    }
}

fn print_view(data: &DashboardData, view: DashboardView) -> Result<()> {
    match view {
        DashboardView::Overview => {
            let o = dashboard::overview(data);
            println!("=== OVERVIEW ===");
            println!("  total transactions:    {}", o.total_transactions);
            println!("  unique customers:      {}", o.unique_customers);
            println!("  months covered:        {}", o.months_covered);
            println!("  destination countries: {}", o.destination_countries);
            println!();
            println!("  Monthly decision split (%)");
            for m in &o.decision_split {
                println!(
                    "  {} | ALLOW {:>5.1} | REVIEW {:>5.1} | BLOCK {:>5.1}",
                    m.period, m.allow_pct, m.review_pct, m.block_pct
                );
            }
        }
        DashboardView::Simulate {
            block,
            review,
            trust_auto_allow,
        } => {
            let settings = SimulatorSettings {
                block_threshold: block,
                review_threshold: review,
                trust_auto_allow,
            };
            println!("=== DECISION SIMULATOR ===");
            print_simulation(&dashboard::simulate_thresholds(data, &settings)?);
        }
        DashboardView::SimulatePolicy { policy } => {
            let content = std::fs::read_to_string(&policy)
                .with_context(|| format!("reading {}", policy.display()))?;
            let policy: DecisionPolicy = serde_json::from_str(&content)?;
            println!("=== POLICY SIMULATOR ===");
            print_simulation(&dashboard::simulate_policy(data, &policy)?);
        }
        DashboardView::Risk => {
            let r = dashboard::risk_analysis(data);
            println!("=== ML RISK SCORE DISTRIBUTION ===");
            for bin in &r.histogram {
                println!("  {} | {:>6}", bin.label(), bin.count);
            }
            println!();
            println!("=== HIGHEST RISK CORRIDORS ===");
            for c in &r.top_corridors {
                println!(
                    "  {} | mean ML {:.4} | {} txns",
                    c.destination, c.mean_ml_score, c.transactions
                );
            }
        }
        DashboardView::Explore {
            months,
            decisions,
            min_risk,
        } => {
            let filter = ExplorerFilter {
                periods: months.iter().map(|m| m.parse::<Period>()).collect::<Result<Vec<_>, _>>()?,
                decisions: decisions
                    .iter()
                    .map(|d| d.parse::<Decision>())
                    .collect::<Result<Vec<_>, _>>()?,
                min_ml_score: min_risk,
            };
            println!("transaction_id,month,transaction_amount,ml_risk_score,trust_score,decision,reason_codes_str");
            for row in dashboard::explore(data, &filter) {
                println!(
                    "{},{},{:.2},{},{:.4},{},{}",
                    row.transaction_id,
                    row.period,
                    row.transaction_amount,
                    fmt_opt(row.ml_risk_score),
                    row.trust_score,
                    row.decision,
                    row.reason_codes_str
                );
            }
        }
        DashboardView::Ipc => unreachable!("ipc is dispatched before print_view"),
    }
    Ok(())
}

fn handle_request(data: &DashboardData, req: IpcRequest) -> Result<Option<serde_json::Value>> {
    let value = match req {
        IpcRequest::Quit => return Ok(None),
        IpcRequest::Overview => serde_json::to_value(dashboard::overview(data))?,
        IpcRequest::Simulate { settings } => {
            serde_json::to_value(dashboard::simulate_thresholds(data, &settings)?)?
        }
        IpcRequest::SimulatePolicy { policy } => {
            serde_json::to_value(dashboard::simulate_policy(data, &policy)?)?
        }
        IpcRequest::Risk => serde_json::to_value(dashboard::risk_analysis(data))?,
        IpcRequest::Explore { filter } => serde_json::to_value(dashboard::explore(data, &filter))?,
        IpcRequest::Report => serde_json::to_value(monitoring::build_report(
            data.months.iter().map(|(p, rows)| (*p, rows.as_slice())),
        ))?,
    };
    Ok(Some(value))
}

fn run_ipc_loop(data: &DashboardData) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<IpcRequest>(&buffer) {
            Err(e) => serde_json::json!({ "error": e.to_string() }),
            Ok(req) => match handle_request(data, req) {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
        };
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}
