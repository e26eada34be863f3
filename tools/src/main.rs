//! pacing-runner: headless runner for the daily pacing jobs.
//!
//! Usage:
//!   pacing-runner --date 2024-11-05 --days 3 --demo --seed 42
//!   pacing-runner --db pacing.db --date 2024-11-05 --ipc-mode
//!
//! In IPC mode the runner reads one JSON request per line on stdin and
//! answers each with one JSON line on stdout.

use anyhow::Result;
use chrono::NaiveDate;
use pacing_core::{
    budget_loader::ProjectionFilter,
    clock::{days_before, previous_day},
    command::OperatorCommand,
    config::PacingConfig,
    demo::{generate_day, seed_demo},
    engine::PacingEngine,
    notification::{LogNotifier, Notifier, OutboxNotifier},
    projections::CurrentMonthBudgetProjections,
    store::PacingStore,
    types::Breakdown,
};
use std::env;
use std::io::{self, BufRead, Write};

const EVENT_TYPES: [&str; 11] = [
    "run_initialized",
    "day_started",
    "day_completed",
    "operator_command_applied",
    "operator_command_rejected",
    "autopilot_source_updated",
    "autopilot_source_skipped",
    "autopilot_ad_group_skipped",
    "autopilot_notification_failed",
    "audit_alarm_raised",
    "daily_audit_completed",
];

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcRequest {
    GetState,
    RunDays { count: u64 },
    Command { command: OperatorCommand },
    Projections { breakdown: Breakdown },
    Quit,
}

/// Demo mode replays the ETL before each job.
struct DemoFeed {
    seed: u64,
}

impl DemoFeed {
    fn before_day(&self, engine: &PacingEngine) -> Result<()> {
        let yesterday = previous_day(engine.clock.today);
        let rows = generate_day(&engine.store, self.seed, yesterday)?;
        log::debug!("demo ETL {yesterday}: {rows} statements");
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let days = parse_arg(&args, "--days", 1u64);
    let history_days = parse_arg(&args, "--history-days", 14u64);
    let demo = args.iter().any(|a| a == "--demo");
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let outbox = !args.iter().any(|a| a == "--log-notifications");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let breakdown = match string_arg(&args, "--projections") {
        Some("campaign") => Breakdown::Campaign,
        Some("account") | None => Breakdown::Account,
        Some(other) => anyhow::bail!("--projections must be account or campaign, got {other}"),
    };
    let date = match string_arg(&args, "--date") {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("invalid --date {raw}: {e}"))?,
        None => chrono::Local::now().date_naive(),
    };

    if !ipc_mode {
        println!("pacing-runner");
        println!("  date:      {date}");
        println!("  days:      {days}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  demo:      {demo} (seed {seed})");
        println!();
    }

    let store = PacingStore::open(db)?;
    store.migrate()?;
    let config = PacingConfig::load(data_dir)?;
    let notifier: Box<dyn Notifier> = if outbox {
        Box::new(OutboxNotifier)
    } else {
        Box::new(LogNotifier)
    };

    let run_id = format!("run-{date}-{}", unix_seconds());
    let mut engine = PacingEngine::build(run_id, store, config, notifier, date)?;

    let feed = if demo {
        let dataset = seed_demo(&engine.store, &engine.config, seed, date, history_days)?;
        log::info!(
            "demo data: {} accounts, {} campaigns, {} ad groups",
            dataset.accounts.len(),
            dataset.campaigns.len(),
            dataset.ad_groups.len()
        );
        for offset in (2..=history_days).rev() {
            generate_day(&engine.store, seed, days_before(date, offset))?;
        }
        Some(DemoFeed { seed })
    } else {
        None
    };

    if ipc_mode {
        run_ipc_loop(&mut engine, feed.as_ref(), breakdown)?;
    } else {
        run_days(&mut engine, feed.as_ref(), days)?;
        println!("{}", serde_json::to_string_pretty(&summary(&engine, breakdown)?)?);
    }

    Ok(())
}

fn run_days(engine: &mut PacingEngine, feed: Option<&DemoFeed>, days: u64) -> Result<()> {
    for _ in 0..days {
        if let Some(feed) = feed {
            feed.before_day(engine)?;
        }
        engine.run_day()?;
    }
    Ok(())
}

fn run_ipc_loop(
    engine: &mut PacingEngine,
    feed: Option<&DemoFeed>,
    breakdown: Breakdown,
) -> Result<()> {
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

        let request: IpcRequest = match serde_json::from_str(&buffer) {
            Ok(r) => r,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let response = match request {
            IpcRequest::Quit => break,
            IpcRequest::GetState => summary(engine, breakdown)?,
            IpcRequest::RunDays { count } => {
                run_days(engine, feed, count)?;
                summary(engine, breakdown)?
            }
            IpcRequest::Command { command } => {
                let command_id = engine.submit_command(command);
                serde_json::json!({ "queued": command_id })
            }
            IpcRequest::Projections { breakdown } => projections(engine, breakdown)?,
        };
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }
    Ok(())
}

/// Current-month projections as of the last completed day.
fn projections(engine: &PacingEngine, breakdown: Breakdown) -> Result<serde_json::Value> {
    let as_of = previous_day(engine.clock.today);
    let projections = CurrentMonthBudgetProjections::new(
        &engine.store,
        as_of,
        breakdown,
        &ProjectionFilter::all(),
        &[],
    )?;
    let rows: serde_json::Map<String, serde_json::Value> = projections
        .rows()
        .map(|(key, row)| -> Result<(String, serde_json::Value)> {
            Ok((key.to_string(), serde_json::to_value(row)?))
        })
        .collect::<Result<_>>()?;
    Ok(serde_json::json!({
        "start": projections.start,
        "end": projections.end,
        "projection_date": projections.projection_date,
        "rows": rows,
        "totals": projections.totals(),
    }))
}

fn summary(engine: &PacingEngine, breakdown: Breakdown) -> Result<serde_json::Value> {
    let mut events = serde_json::Map::new();
    for event_type in EVENT_TYPES {
        let count = engine.store.event_count(&engine.run_id, event_type)?;
        events.insert(event_type.to_string(), count.into());
    }

    let alarms: Vec<serde_json::Value> = engine
        .last_alarms()
        .iter()
        .map(|a| serde_json::json!({ "audit": a.audit, "detail": a.detail }))
        .collect();
    let autopilot_changes = engine.autopilot().map_or(0, |ap| ap.last_run.len());

    Ok(serde_json::json!({
        "run_id": engine.run_id,
        "db": engine.store.path().unwrap_or(":memory:"),
        "next_date": engine.clock.today,
        "events": events,
        "autopilot_log_rows": autopilot_changes,
        "alarms": alarms,
        "outbox_emails": engine.store.outbox(Some("email"))?.len(),
        "projections": projections(engine, breakdown)?,
    }))
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    string_arg(args, flag)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn unix_seconds() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
