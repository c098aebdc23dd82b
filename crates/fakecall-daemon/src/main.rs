use std::sync::Arc;

use clap::{Parser, Subcommand};
use fakecall_core::FakecallConfig;
use fakecall_scheduler::{
    ChannelPresenter, EngineOptions, SystemClock, TokioAlarmHost, TriggerEngine,
};
use fakecall_store::{RecordStore, SqliteRecordStore};
use tracing::info;

mod commands;
mod ringer;

use commands::{CallEdits, NewCallArgs};

/// Fakecall: schedule fake incoming calls that survive restarts.
#[derive(Parser)]
#[command(name = "fakecall", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Save a new call. A running daemon picks it up within one rescan.
    Add(NewCallArgs),
    /// Show call history, newest first.
    List,
    /// Change a call's caller details and/or countdown.
    Edit {
        id: i64,
        #[command(flatten)]
        edits: CallEdits,
    },
    /// Ring a call from history again with its saved countdown.
    Retrigger { id: i64 },
    /// Switch a call off, keeping it in history.
    Disable { id: i64 },
    /// Delete a call.
    Delete { id: i64 },
    /// Run the scheduler and ring calls until Ctrl+C.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fakecall=info,fakecall_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > FAKECALL_CONFIG env > ~/.fakecall/fakecall.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("FAKECALL_CONFIG").ok());
    let config = FakecallConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        FakecallConfig::default()
    });

    let store: Arc<dyn RecordStore> = Arc::new(open_store(&config.database.path)?);

    match cli.command {
        Command::Add(args) => {
            let record = commands::add(
                store.as_ref(),
                args,
                config.presentation.default_display_duration_secs,
            )?;
            println!("{}", commands::format_row(&record));
        }
        Command::List => {
            for record in store.list()? {
                println!("{}", commands::format_row(&record));
            }
        }
        Command::Edit { id, edits } => {
            let record = commands::edit(store.as_ref(), id.into(), edits)?;
            println!("{}", commands::format_row(&record));
        }
        Command::Retrigger { id } => {
            let record = commands::retrigger(store.as_ref(), id.into())?;
            println!("{}", commands::format_row(&record));
        }
        Command::Disable { id } => commands::disable(store.as_ref(), id.into())?,
        Command::Delete { id } => commands::delete(store.as_ref(), id.into())?,
        Command::Run => run_daemon(config, store).await?,
    }
    Ok(())
}

/// Open the SQLite database, creating its directory and schema if needed.
fn open_store(db_path: &str) -> anyhow::Result<SqliteRecordStore> {
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    // CLI invocations write while the daemon holds its own connection.
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(SqliteRecordStore::new(db)?)
}

async fn run_daemon(config: FakecallConfig, store: Arc<dyn RecordStore>) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);

    // Fired-alarm channel: TokioAlarmHost timers → engine loop
    let (fired_tx, fired_rx) = tokio::sync::mpsc::channel(config.scheduler.fired_queue_capacity);
    let host = Arc::new(TokioAlarmHost::new(
        tokio::runtime::Handle::current(),
        clock.clone(),
        fired_tx,
        config.scheduler.inexact_window_secs,
    ));
    // Launch channel: PresentationHandoff → ringer task
    let (presenter, launch_rx) =
        ChannelPresenter::channel(config.presentation.launch_queue_capacity);

    let engine = Arc::new(TriggerEngine::new(
        store,
        host,
        clock,
        Arc::new(presenter),
        EngineOptions::from(&config.scheduler),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let ringer = tokio::spawn(ringer::run(
        launch_rx,
        Arc::clone(&engine.service),
        shutdown_rx.clone(),
    ));
    let engine_task = tokio::spawn(Arc::clone(&engine).run(fired_rx, shutdown_rx));
    info!(
        missed_policy = ?config.scheduler.missed_policy,
        exact = config.scheduler.exact_alarms,
        "fakecall daemon running"
    );

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl+C, shutting down...");

    // signal engine and ringer to stop
    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    let _ = ringer.await;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
