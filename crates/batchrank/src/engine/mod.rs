//! The batch/job processing engine.
//!
//! [`BatchEngine`] is the surface the outer layers call. Everything below it
//! communicates only through the [`Database`]: several engines (threads or
//! processes) may work the same database file at once, and the claim
//! protocol is what keeps them from processing a job twice.

pub mod claim;
pub mod classifier;
pub mod controller;
pub mod dispatcher;
pub mod scheduler;
pub mod watchdog;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::BatchEventBroadcaster;
use crate::config::Config;
use crate::db::{batch_repo, Database};
use crate::dedup::UploadedFile;
use crate::error::{ConfigError, Result};
use crate::inference::{HttpAnalyzer, HttpAnalyzerConfig, ResumeAnalyzer};
use crate::model::{Batch, BatchAction, BatchStatus};
use crate::storage::{BlobStore, FilesystemBlobStore};

pub use classifier::RetryDecision;
pub use controller::{BatchDetails, ControlOutcome};
pub use dispatcher::Dispatcher;
pub use scheduler::WatchdogScheduler;
pub use watchdog::{SweepReport, Watchdog};
pub use worker::{IdleReason, IterationOutcome};

/// Tunables shared by every engine component.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Retry budget captured on each job at creation.
    pub max_retries: u32,
    pub lease_timeout: Duration,
    pub list_limit: u32,
    /// Pause before a worker retries an iteration that hit a store error.
    pub error_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            lease_timeout: Duration::from_secs(90),
            list_limit: 50,
            error_backoff: Duration::from_millis(1000),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.jobs.max_retries,
            lease_timeout: Duration::from_secs(config.jobs.lease_timeout_secs),
            list_limit: config.list_limit,
            error_backoff: Duration::from_millis(config.workers.error_backoff_ms),
        }
    }
}

/// Collaborators an iteration needs.
pub struct EngineContext {
    pub db: Database,
    pub analyzer: Arc<dyn ResumeAnalyzer>,
    pub blobs: Arc<dyn BlobStore>,
    pub events: BatchEventBroadcaster,
    pub settings: EngineSettings,
}

/// Entry point for creating, controlling, reading and processing batches.
///
/// Cloning is cheap; clones share the context and the work queue.
#[derive(Clone)]
pub struct BatchEngine {
    ctx: Arc<EngineContext>,
    dispatcher: Arc<Dispatcher>,
}

impl BatchEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            dispatcher: Arc::new(Dispatcher::new()),
        }
    }

    /// Opens the database and blob store and builds the HTTP analyzer
    /// described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db_path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "cannot determine database path (no home directory)".into(),
        })?;
        let blob_root = config.blob_directory().ok_or_else(|| ConfigError::Validation {
            message: "cannot determine blob directory (no home directory)".into(),
        })?;

        let analyzer = HttpAnalyzer::new(HttpAnalyzerConfig {
            endpoint: config.inference.endpoint.clone(),
            timeout: config.inference.timeout(),
            model_version: config.inference.model_version.clone(),
            api_key: config.inference.api_key(),
        })?;

        Ok(Self::new(EngineContext {
            db: Database::open(&db_path)?,
            analyzer: Arc::new(analyzer),
            blobs: Arc::new(FilesystemBlobStore::new(&blob_root)),
            events: BatchEventBroadcaster::default(),
            settings: EngineSettings::from(config),
        }))
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn events(&self) -> &BatchEventBroadcaster {
        &self.ctx.events
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Creates a batch and queues its first Worker Loop iteration.
    pub fn create_batch(
        &self,
        user_id: &str,
        job_description: &str,
        files: Vec<UploadedFile>,
    ) -> Result<String> {
        let batch_id = controller::create_batch(&self.ctx, user_id, job_description, files)?;
        self.queue_committed(&batch_id);
        Ok(batch_id)
    }

    /// Applies a control action; a successful `resume` queues a new chain.
    pub fn control_batch(
        &self,
        user_id: &str,
        batch_id: &str,
        action: BatchAction,
    ) -> Result<ControlOutcome> {
        let outcome = controller::control_batch(&self.ctx, user_id, batch_id, action)?;
        if outcome.changed() && outcome.current == BatchStatus::Running {
            self.queue_committed(batch_id);
        }
        Ok(outcome)
    }

    /// Queues a chain for a batch whose state change is already committed.
    /// A failed dispatch leaves the batch `running` in the store, where
    /// [`recover`](Self::recover) finds it.
    fn queue_committed(&self, batch_id: &str) {
        if let Err(e) = self.dispatcher.dispatch(batch_id) {
            log::warn!(
                "Batch {} is running but was not queued ({}); recover will pick it up",
                batch_id,
                e
            );
        }
    }

    pub fn get_batches(&self, user_id: &str) -> Result<Vec<Batch>> {
        controller::get_batches(&self.ctx, user_id)
    }

    pub fn get_batch_details(&self, user_id: &str, batch_id: &str) -> Result<Option<BatchDetails>> {
        controller::get_batch_details(&self.ctx, user_id, batch_id)
    }

    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(
            self.ctx.db.clone(),
            self.ctx.events.clone(),
            self.ctx.settings.lease_timeout,
        )
    }

    /// Sweeps expired leases, then queues one chain for every reaped batch
    /// that is still running so requeued jobs are picked up and settled
    /// batches get their completion check.
    pub fn run_watchdog(&self) -> Result<SweepReport> {
        let report = self.watchdog().sweep()?;
        self.redispatch(&report)?;
        Ok(report)
    }

    /// [`run_watchdog`](Self::run_watchdog) with an explicit clock.
    pub fn run_watchdog_at(&self, now: chrono::DateTime<chrono::Utc>) -> Result<SweepReport> {
        let report = self.watchdog().sweep_at(now)?;
        self.redispatch(&report)?;
        Ok(report)
    }

    fn redispatch(&self, report: &SweepReport) -> Result<()> {
        for batch_id in &report.touched_batches {
            let status = self
                .ctx
                .db
                .with_conn(|conn| batch_repo::find_by_id(conn, batch_id))?
                .map(|b| b.status);
            if status == Some(BatchStatus::Running) {
                log::debug!("Watchdog re-dispatching batch {}", batch_id);
                self.dispatcher.dispatch(batch_id)?;
            }
        }
        Ok(())
    }

    /// Queues one chain for every running batch. Used at startup so chains
    /// lost with a previous process resume.
    pub fn recover(&self) -> Result<usize> {
        let ids = self
            .ctx
            .db
            .with_conn(|conn| batch_repo::list_ids_by_status(conn, BatchStatus::Running))?;
        for id in &ids {
            self.dispatcher.dispatch(id)?;
        }
        if !ids.is_empty() {
            log::info!("Recovered {} running batches", ids.len());
        }
        Ok(ids.len())
    }

    /// Starts background workers draining the queue.
    pub fn start_workers(&self, count: usize) -> Result<()> {
        self.dispatcher.start(Arc::clone(&self.ctx), count)?;
        Ok(())
    }

    /// Runs every queued iteration on the calling thread until none remain.
    pub fn run_until_idle(&self) -> Result<usize> {
        self.dispatcher.run_until_idle(&self.ctx)
    }

    /// Runs one batch's chain on the calling thread until it goes idle.
    pub fn drain(&self, batch_id: &str) -> Result<usize> {
        let worker_id = format!("drain-{}", uuid::Uuid::new_v4().simple());
        dispatcher::drain(&self.ctx, batch_id, &worker_id)
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    pub fn wait(&self) {
        self.dispatcher.wait();
    }
}
