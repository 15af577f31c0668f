//! Periodic watchdog scheduler.
//!
//! Runs `BatchEngine::run_watchdog` on a fixed interval and on manual
//! triggers received through a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use super::BatchEngine;
use crate::error::WorkerError;

pub struct WatchdogScheduler {
    engine: BatchEngine,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl WatchdogScheduler {
    pub fn new(engine: BatchEngine, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sweep loop in a background thread.
    /// Accepts a trigger receiver for manual sweep requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>, WorkerError> {
        let engine = self.engine.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WorkerError::SpawnFailed(format!("watchdog runtime: {}", e)))?;

        std::thread::Builder::new()
            .name("batchrank-watchdog".into())
            .spawn(move || {
                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(interval);
                    interval_timer.tick().await; // skip immediate first tick

                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        tokio::select! {
                            _ = interval_timer.tick() => {},
                            Ok(()) = trigger_rx.recv() => {
                                log::info!("Manual watchdog sweep triggered");
                            },
                        }

                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        match engine.run_watchdog() {
                            Ok(report) if report.expired > 0 => {
                                log::info!(
                                    "Watchdog sweep reaped {} jobs across {} batches",
                                    report.expired - report.skipped,
                                    report.touched_batches.len()
                                );
                            }
                            Err(e) => log::error!("Watchdog sweep failed: {}", e),
                            _ => {}
                        }
                    }
                });
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
