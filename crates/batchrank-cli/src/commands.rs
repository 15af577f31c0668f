use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use batchrank::{
    load_config, BatchEngine, BatchStatus, BatchrankError, Config, ConfigError, UploadedFile,
    WatchdogScheduler,
};

use crate::{Cli, Command};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] BatchrankError),

    #[error("Failed to read {path}: {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Batch {0} not found")]
    BatchNotFound(String),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Engine(e.into())
    }
}

type CliResult<T> = std::result::Result<T, CliError>;

pub fn run(cli: Cli) -> CliResult<()> {
    let config = read_config(cli.config.as_deref())?;
    let engine = BatchEngine::from_config(&config)?;

    match cli.command {
        Command::Create {
            user,
            description,
            no_run,
            files,
        } => create(&engine, &user, &description, &files, no_run),
        Command::Control {
            user,
            batch_id,
            action,
            no_run,
        } => {
            let outcome = engine.control_batch(&user, &batch_id, action)?;
            if !outcome.changed() {
                warn!(
                    "Action '{}' does not apply to a {} batch; nothing changed",
                    action, outcome.previous
                );
            }
            print_json(&outcome)?;
            if outcome.changed() && outcome.current == BatchStatus::Running && !no_run {
                engine.run_until_idle()?;
            }
            Ok(())
        }
        Command::List { user } => print_json(&engine.get_batches(&user)?),
        Command::Show { user, batch_id } => match engine.get_batch_details(&user, &batch_id)? {
            Some(details) => print_json(&details),
            None => Err(CliError::BatchNotFound(batch_id)),
        },
        Command::Watchdog { run } => {
            let report = engine.run_watchdog()?;
            print_json(&report)?;
            if run {
                engine.run_until_idle()?;
            }
            Ok(())
        }
        Command::Run => {
            let recovered = engine.recover()?;
            let iterations = engine.run_until_idle()?;
            info!(
                "Processed {} iterations across {} batches",
                iterations, recovered
            );
            Ok(())
        }
        Command::Serve { workers } => serve(&engine, &config, workers),
    }
}

fn read_config(path: Option<&Path>) -> CliResult<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => batchrank::config::default_config_path().ok_or_else(|| ConfigError::Validation {
            message: "cannot determine config path (no home directory); pass --config".into(),
        })?,
    };
    info!("Loading configuration from {:?}", path);
    Ok(load_config(&path)?)
}

fn create(
    engine: &BatchEngine,
    user: &str,
    description: &str,
    files: &[PathBuf],
    no_run: bool,
) -> CliResult<()> {
    let description = match description.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).map_err(|e| CliError::ReadInput {
            path: PathBuf::from(path),
            source: e,
        })?,
        None => description.to_string(),
    };

    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let content = std::fs::read(path).map_err(|e| CliError::ReadInput {
            path: path.clone(),
            source: e,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        uploads.push(UploadedFile::new(filename, content));
    }

    let batch_id = engine.create_batch(user, &description, uploads)?;
    info!("Created batch {}", batch_id);

    if !no_run {
        engine.run_until_idle()?;
    }

    match engine.get_batch_details(user, &batch_id)? {
        Some(details) => print_json(&details),
        None => Err(CliError::BatchNotFound(batch_id)),
    }
}

fn serve(engine: &BatchEngine, config: &Config, workers: Option<usize>) -> CliResult<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    spawn_event_logger(engine.events().subscribe());

    let recovered = engine.recover()?;
    let worker_count = workers.unwrap_or(config.workers.count).max(1);
    engine.start_workers(worker_count)?;

    let scheduler = WatchdogScheduler::new(
        engine.clone(),
        Duration::from_secs(config.watchdog.interval_secs),
    );
    let (trigger_tx, trigger_rx) = broadcast::channel(16);
    let watchdog_handle = scheduler.start(trigger_rx).map_err(BatchrankError::from)?;

    // Reap whatever a previous process left behind before the first tick.
    let _ = trigger_tx.send(());

    info!(
        "Serving with {} workers ({} batches recovered); press Ctrl+C to stop",
        worker_count, recovered
    );

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("Shutting down...");
    scheduler.stop();
    let _ = trigger_tx.send(());
    engine.shutdown();
    engine.wait();
    if watchdog_handle.join().is_err() {
        warn!("Watchdog thread panicked");
    }
    info!("Stopped");
    Ok(())
}

fn spawn_event_logger(mut rx: broadcast::Receiver<batchrank::BatchEvent>) {
    let spawned = thread::Builder::new()
        .name("batchrank-events".into())
        .spawn(move || loop {
            match rx.blocking_recv() {
                Ok(event) => info!("[{}] {}", event.batch_id, event.kind),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event log lagged; {} events dropped", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start event logger: {}", e);
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
