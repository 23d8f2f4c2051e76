//! reward-runner: headless driver for the subscription reward job.
//!
//! Usage:
//!   reward-runner --db rewards.db                      run today's job once
//!   reward-runner --db rewards.db --date 2026-10-19    run for a specific day
//!   reward-runner --db rewards.db --daemon             run on the daily schedule
//!   reward-runner --db rewards.db --history 20         print recent attempts
//!   reward-runner --db rewards.db --wallets            print wallets and audit them
//!
//! Options:
//!   --config <path>   JSON config (defaults apply when omitted)

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use reward_core::{
    cancel::CancelToken,
    clock::{Clock, SystemClock},
    config::DistributionConfig,
    runner::{RewardRunner, RunOutcome},
    scheduler::Scheduler,
    store::RewardStore,
};
use std::{env, sync::Arc};

/// Parsed command line.
#[derive(Debug, PartialEq)]
struct Args {
    db:      String,
    config:  Option<String>,
    daemon:  bool,
    wallets: bool,
    history: Option<usize>,
    date:    Option<NaiveDate>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            db:      "rewards.db".into(),
            config:  None,
            daemon:  false,
            wallets: false,
            history: None,
            date:    None,
        }
    }
}

/// Parse everything after the program name. A flag that takes a value but
/// has none, or has one that does not parse, is an error rather than being
/// ignored.
fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(flag) = args.next() {
        let mut value = || {
            args.next()
                .filter(|v| !v.starts_with("--"))
                .with_context(|| format!("{flag} needs a value"))
        };
        match flag.as_str() {
            "--db" => parsed.db = value()?,
            "--config" => parsed.config = Some(value()?),
            "--history" => {
                let v = value()?;
                let limit = v
                    .parse()
                    .with_context(|| format!("--history must be a count, got {v:?}"))?;
                parsed.history = Some(limit);
            }
            "--date" => {
                let v = value()?;
                let day = v
                    .parse()
                    .with_context(|| format!("--date must be YYYY-MM-DD, got {v:?}"))?;
                parsed.date = Some(day);
            }
            "--daemon" => parsed.daemon = true,
            "--wallets" => parsed.wallets = true,
            other => bail!("unknown argument {other:?}"),
        }
    }
    if parsed.daemon && parsed.date.is_some() {
        bail!("--daemon cannot be combined with --date");
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args(env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => DistributionConfig::load(path)?,
        None => DistributionConfig::default(),
    };

    let store = RewardStore::open(&args.db)?;
    store.migrate()?;

    if let Some(limit) = args.history {
        return print_history(&store, &config, limit);
    }
    if args.wallets {
        return print_wallets(&store);
    }

    // Always the real clock: --date picks the day to process, not the time
    // the audit trail records.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let execution_date = args.date.unwrap_or_else(|| clock.today());

    println!("reward-runner");
    println!("  db:          {}", args.db);
    println!("  job:         {}", config.job_name);
    println!("  wallet type: {}", config.wallet_type);
    println!("  date:        {execution_date}");
    println!();

    let schedule = config.schedule();
    let poll_interval = config.poll_interval();
    let runner = RewardRunner::new(store, clock, config);
    let cancel = CancelToken::new();

    if args.daemon {
        Scheduler::new(runner, schedule, poll_interval).run(&cancel)?;
        return Ok(());
    }

    let outcome = runner.run_for_date(execution_date, &cancel)?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    println!("=== RUN OUTCOME ===");
    match outcome {
        RunOutcome::AlreadyCompleted { execution_id, status } => {
            println!("  already closed by execution {execution_id} ({status})");
        }
        RunOutcome::AlreadyRunning => {
            println!("  another attempt holds today's slot");
        }
        RunOutcome::Skipped { execution_id, execution_date } => {
            println!("  {execution_date} is not a processing day (execution {execution_id})");
        }
        RunOutcome::Completed(summary) => {
            println!("  execution:        {}", summary.execution_id);
            println!("  date:             {}", summary.execution_date);
            println!("  attempt:          {}", summary.attempt);
            println!("  candidates:       {}", summary.candidate_count);
            println!("  credited:         {}", summary.processed_count);
            println!("  total rewarded:   {}", summary.total_rewarded);
            println!("  saturated:        {}", summary.saturated_count);
            println!("  already rewarded: {}", summary.already_rewarded_count);
            println!("  not eligible:     {}", summary.not_eligible_count);
        }
    }
}

fn print_history(store: &RewardStore, config: &DistributionConfig, limit: usize) -> Result<()> {
    let executions = store.job_executions(&config.job_name, limit)?;
    println!("=== {} (last {limit}) ===", config.job_name);
    if executions.is_empty() {
        println!("  (no attempts recorded)");
    }
    for e in executions {
        let detail = match (&e.result, &e.error_message) {
            (Some(result), _) => serde_json::to_string(result)?,
            (None, Some(message)) => message.clone(),
            (None, None) => String::new(),
        };
        println!(
            "  {} #{} | {:<7} | started {} | {}",
            e.execution_date, e.attempt, e.status, e.started_at, detail
        );
    }
    Ok(())
}

fn print_wallets(store: &RewardStore) -> Result<()> {
    let wallets = store.wallets()?;
    println!("=== WALLETS ===");
    let mut inconsistent = 0;
    for w in &wallets {
        let audit = store.verify_wallet(w.id)?;
        let flag = if audit.is_consistent() { "ok" } else { "MISMATCH" };
        if !audit.is_consistent() {
            log::warn!(
                "wallet {}: balance {} != ledger {}",
                w.id,
                audit.balance,
                audit.ledger_balance
            );
            inconsistent += 1;
        }
        println!(
            "  {:>5} {} {:<10} balance {:>12} | ledger {:>12} ({} entries) {flag}",
            w.id, w.customer_id, w.wallet_type, w.balance, audit.ledger_balance, audit.entries
        );
    }
    if inconsistent > 0 {
        anyhow::bail!("{inconsistent} wallet(s) disagree with their ledger");
    }
    Ok(())
}
