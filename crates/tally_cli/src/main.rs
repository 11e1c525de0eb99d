//! Tooling entry point.
//!
//! # Responsibility
//! - Exercise the host, extension and wearable paths against a real
//!   directory layout from the command line.
//! - Keep output line-oriented `key=value` for scripting.

use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_core::provision::repair::last_repair_outcome;
use tally_core::{
    default_log_level, init_logging, Clock, ExtensionClient, HostRuntime, ProcessRole,
    SyncCoordinator, SyncNotification, SyncTrigger, SystemClock, TallyConfig,
};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Event tally store tooling", long_about = None)]
struct Cli {
    /// TOML config file; missing file means defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the shared (app-group) directory.
    #[arg(long)]
    shared_dir: Option<PathBuf>,
    /// Overrides the process-private directory.
    #[arg(long)]
    local_dir: Option<PathBuf>,
    /// Enables file logging into this absolute directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print core linkage info
    Ping,
    /// Queue an event the way the glanceable extension does
    Log {
        /// Event time in epoch milliseconds; defaults to now.
        #[arg(long)]
        at: Option<i64>,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Run one host sync pass
    Sync,
    /// Run the host runtime and print notifications
    Run {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
    /// Answer one raw wearable request
    Wearable { payload: String },
    /// Show store tier, snapshot and queue state
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error={err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli)?;
    if let Some(log_dir) = &cli.log_dir {
        let role = match cli.command {
            Commands::Log { .. } => ProcessRole::Extension,
            _ => ProcessRole::Tooling,
        };
        let level = config.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(role, level, &log_dir.to_string_lossy())?;
    }
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Ping => {
            println!("tally_core ping={}", tally_core::ping());
            println!("tally_core version={}", tally_core::core_version());
        }
        Commands::Log { at, note } => {
            let client = ExtensionClient::open(&config, Arc::clone(&clock))
                .map_err(|err| err.to_string())?;
            let timestamp_ms = at.unwrap_or_else(|| clock.now_ms());
            let intent = client
                .log_event(timestamp_ms, note)
                .map_err(|err| err.to_string())?;
            let id = intent.intent_id.map(|id| id.to_string()).unwrap_or_default();
            println!("queued id={id} timestamp_ms={timestamp_ms}");
            println!("pending={}", client.pending_count().map_err(|err| err.to_string())?);
        }
        Commands::Sync => {
            let mut coordinator = bootstrap(config, clock)?;
            match coordinator.trigger_now(SyncTrigger::Foreground) {
                Some(report) => {
                    println!(
                        "drained={} inserted={} duplicates={} rejected={}",
                        report.drain.drained,
                        report.drain.inserted,
                        report.drain.duplicates,
                        report.drain.rejected
                    );
                    if let Some(snapshot) = &report.snapshot {
                        println!(
                            "today_count={} daily_average={:.2} watermark_ms={}",
                            snapshot.today_count, snapshot.daily_average, snapshot.watermark_ms
                        );
                    }
                    for failure in &report.failures {
                        println!("failure={failure}");
                    }
                }
                None => println!("skipped=reentrant"),
            }
        }
        Commands::Run { seconds } => {
            let handle = HostRuntime::spawn(bootstrap(config, clock)?)
                .map_err(|err| format!("failed to start host runtime: {err}"))?;
            let notifications = handle.subscribe();
            let deadline = Instant::now() + Duration::from_secs(seconds);
            info!("event=cli_run module=cli status=start seconds={seconds}");
            while let Some(left) = deadline.checked_duration_since(Instant::now()) {
                match notifications.recv_timeout(left) {
                    Ok(notification) => print_notification(&notification),
                    Err(_) => break,
                }
            }
            handle.shutdown();
        }
        Commands::Wearable { payload } => {
            let mut coordinator = bootstrap(config, clock)?;
            println!("{}", coordinator.handle_wearable_payload(&payload));
        }
        Commands::Status => {
            let coordinator = bootstrap(config, clock)?;
            let state = coordinator.provisioning();
            let path = state
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "memory".to_string());
            println!("tier={} path={path}", state.tier.as_str());
            println!("migration={:?}", state.migration);
            if let Some(repair) = last_repair_outcome(coordinator.side_channel()) {
                println!(
                    "last_repair succeeded={} salvaged={} at_ms={}",
                    repair.succeeded, repair.salvaged, repair.at_ms
                );
            }
            let snapshot = coordinator
                .side_channel()
                .read_snapshot()
                .map_err(|err| err.to_string())?;
            println!(
                "today_count={} daily_average={:.2} watermark_ms={}",
                snapshot.today_count, snapshot.daily_average, snapshot.watermark_ms
            );
            let pending = tally_core::PendingWriteQueue::new(coordinator.side_channel())
                .len()
                .map_err(|err| err.to_string())?;
            println!("pending={pending}");
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<TallyConfig, String> {
    let mut config = match &cli.config {
        Some(path) => TallyConfig::load(path).map_err(|err| err.to_string())?,
        None => TallyConfig::default(),
    };
    if let Some(shared_dir) = &cli.shared_dir {
        config.shared_dir = Some(shared_dir.clone());
    }
    if let Some(local_dir) = &cli.local_dir {
        config.local_dir = local_dir.clone();
    }
    Ok(config)
}

fn bootstrap(config: TallyConfig, clock: Arc<dyn Clock>) -> Result<SyncCoordinator, String> {
    SyncCoordinator::bootstrap(config, clock).map_err(|err| err.to_string())
}

fn print_notification(notification: &SyncNotification) {
    match notification {
        SyncNotification::EventsChanged { source } => {
            println!("notification=events_changed source={}", source.as_str());
        }
        SyncNotification::ExternalChange { watermark_ms } => {
            println!("notification=external_change watermark_ms={watermark_ms}");
        }
        SyncNotification::SnapshotPublished(snapshot) => println!(
            "notification=snapshot today_count={} watermark_ms={}",
            snapshot.today_count, snapshot.watermark_ms
        ),
    }
}
