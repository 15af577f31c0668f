//! Work queue that keeps Worker Loop chains alive.
//!
//! Each message names a batch and stands for one pending iteration. A
//! `Continue` outcome puts the batch back on the queue, an idle outcome drops
//! it. Iterations therefore never nest, however long a chain runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::worker::{run_iteration, IterationOutcome};
use super::EngineContext;
use crate::error::{BatchrankError, WorkerError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Dispatcher {
    sender: Sender<String>,
    receiver: Receiver<String>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    /// Prefix for worker identities, unique per process.
    instance: String,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            workers: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            instance: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        }
    }

    /// Queues one iteration for `batch_id`.
    pub fn dispatch(&self, batch_id: &str) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        self.sender
            .send(batch_id.to_string())
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Number of queued iterations.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Spawns `worker_count` threads consuming the queue.
    pub fn start(&self, ctx: Arc<EngineContext>, worker_count: usize) -> Result<(), WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed("worker_count must be > 0".into()));
        }
        let mut workers = self
            .workers
            .lock()
            .map_err(|_| WorkerError::SpawnFailed("worker list lock poisoned".into()))?;

        for index in 0..worker_count {
            let worker_id = format!("{}-w{}", self.instance, index);
            let receiver = self.receiver.clone();
            let sender = self.sender.clone();
            let shutdown = Arc::clone(&self.shutdown);
            let worker_ctx = Arc::clone(&ctx);

            let handle = thread::Builder::new()
                .name(format!("batchrank-worker-{}", index))
                .spawn(move || run_worker(worker_id, receiver, sender, shutdown, worker_ctx))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);
        Ok(())
    }

    /// Runs queued iterations on the calling thread until the queue is empty.
    /// Returns how many iterations ran.
    pub fn run_until_idle(&self, ctx: &EngineContext) -> Result<usize, BatchrankError> {
        let worker_id = format!("{}-inline", self.instance);
        let mut iterations = 0;

        while let Ok(batch_id) = self.receiver.try_recv() {
            iterations += 1;
            match run_iteration(ctx, &batch_id, &worker_id) {
                Ok(IterationOutcome::Continue) => self
                    .sender
                    .send(batch_id)
                    .map_err(|_| WorkerError::ChannelClosed)?,
                Ok(IterationOutcome::Idle(reason)) => {
                    debug!("Chain for batch {} idle: {:?}", batch_id, reason);
                }
                Err(e) => {
                    // Keep the chain alive for a later run.
                    let _ = self.sender.send(batch_id);
                    return Err(e.into());
                }
            }
        }

        Ok(iterations)
    }

    pub fn shutdown(&self) {
        info!("Shutting down dispatcher...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Joins all worker threads. Call after [`shutdown`](Self::shutdown).
    pub fn wait(&self) {
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => {
                error!("Worker list lock poisoned; not joining workers");
                return;
            }
        };

        for (i, worker) in handles.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs iterations for one batch inline until its chain goes idle.
/// Returns how many iterations ran.
pub fn drain(ctx: &EngineContext, batch_id: &str, worker_id: &str) -> Result<usize, BatchrankError> {
    let mut iterations = 0;
    loop {
        iterations += 1;
        if let IterationOutcome::Idle(reason) = run_iteration(ctx, batch_id, worker_id)? {
            debug!("Drained batch {} after {} iterations: {:?}", batch_id, iterations, reason);
            return Ok(iterations);
        }
    }
}

fn run_worker(
    worker_id: String,
    receiver: Receiver<String>,
    sender: Sender<String>,
    shutdown: Arc<AtomicBool>,
    ctx: Arc<EngineContext>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(batch_id) => match run_iteration(&ctx, &batch_id, &worker_id) {
                Ok(IterationOutcome::Continue) => {
                    if sender.send(batch_id).is_err() {
                        break;
                    }
                }
                Ok(IterationOutcome::Idle(reason)) => {
                    debug!("Worker {}: batch {} idle: {:?}", worker_id, batch_id, reason);
                }
                Err(e) => {
                    warn!(
                        "Worker {}: iteration for batch {} failed: {}; retrying in {:?}",
                        worker_id, batch_id, e, ctx.settings.error_backoff
                    );
                    thread::sleep(ctx.settings.error_backoff);
                    if sender.send(batch_id).is_err() {
                        break;
                    }
                }
            },
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::batch_repo;
    use crate::engine::testing::{context, seed_batch, ScriptedAnalyzer};
    use crate::model::BatchStatus;

    #[test]
    fn test_run_until_idle_finishes_batch() {
        let ctx = context(ScriptedAnalyzer::always_ok(60.0));
        seed_batch(&ctx, "b1", 3);
        let dispatcher = Dispatcher::new();
        dispatcher.dispatch("b1").unwrap();

        // 3 processing iterations plus the one that detects completion.
        assert_eq!(dispatcher.run_until_idle(&ctx).unwrap(), 4);
        assert_eq!(dispatcher.queued(), 0);

        let batch = ctx
            .db
            .with_conn(|conn| batch_repo::find_by_id(conn, "b1"))
            .unwrap()
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Complete);
        assert_eq!(batch.completed, 3);
    }

    #[test]
    fn test_drain_runs_one_chain() {
        let ctx = context(ScriptedAnalyzer::always_ok(60.0));
        seed_batch(&ctx, "b1", 2);
        assert_eq!(drain(&ctx, "b1", "w1").unwrap(), 3);
    }

    #[test]
    fn test_dispatch_after_shutdown_fails() {
        let dispatcher = Dispatcher::new();
        dispatcher.shutdown();
        assert!(dispatcher.is_shutdown());
        assert!(matches!(
            dispatcher.dispatch("b1"),
            Err(WorkerError::ChannelClosed)
        ));
    }

    #[test]
    fn test_pool_processes_and_stops() {
        let ctx = Arc::new(context(ScriptedAnalyzer::always_ok(60.0)));
        seed_batch(&ctx, "b1", 4);
        let dispatcher = Dispatcher::new();
        dispatcher.start(Arc::clone(&ctx), 2).unwrap();
        dispatcher.dispatch("b1").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let batch = ctx
                .db
                .with_conn(|conn| batch_repo::find_by_id(conn, "b1"))
                .unwrap()
                .unwrap();
            if batch.status == BatchStatus::Complete {
                assert_eq!(batch.completed, 4);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "batch did not complete");
            thread::sleep(Duration::from_millis(20));
        }

        dispatcher.shutdown();
        dispatcher.wait();
    }

    #[test]
    fn test_start_rejects_zero_workers() {
        let ctx = Arc::new(context(ScriptedAnalyzer::always_ok(60.0)));
        assert!(Dispatcher::new().start(ctx, 0).is_err());
    }
}
