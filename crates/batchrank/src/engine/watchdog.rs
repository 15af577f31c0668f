//! Lease reaping for jobs stuck in `running`.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info_span;

use super::classifier::{self, RetryDecision};
use crate::broadcast::{BatchEventBroadcaster, BatchEventKind};
use crate::db::batch_repo::{self, BatchCounter};
use crate::db::{job_repo, Database, DatabaseError};
use crate::model::{BatchStatus, ErrorCode, Job};

const FALLBACK_LEASE_SECS: i64 = 90;

/// Totals from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired: usize,
    pub requeued: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Jobs that settled on their own between the query and the write.
    pub skipped: usize,
    /// Batches where at least one job was reaped.
    pub touched_batches: BTreeSet<String>,
}

enum Reaped {
    Requeued(ErrorCode),
    Failed(ErrorCode),
    Cancelled,
    Skipped,
}

/// Finds running jobs whose lease expired and requeues or fails them.
///
/// A sweep never starts work itself; see `BatchEngine::run_watchdog` for the
/// variant that also re-dispatches affected batches.
pub struct Watchdog {
    db: Database,
    events: BatchEventBroadcaster,
    lease_timeout: Duration,
}

impl Watchdog {
    pub fn new(db: Database, events: BatchEventBroadcaster, lease_timeout: Duration) -> Self {
        Self {
            db,
            events,
            lease_timeout,
        }
    }

    pub fn sweep(&self) -> Result<SweepReport, DatabaseError> {
        self.sweep_at(Utc::now())
    }

    /// Sweeps as if the clock read `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, DatabaseError> {
        let _span = info_span!("watchdog_sweep", lease_secs = self.lease_timeout.as_secs()).entered();

        let cutoff = match chrono::Duration::from_std(self.lease_timeout)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
        {
            Some(cutoff) => cutoff,
            None => {
                log::warn!(
                    "Lease timeout {:?} is out of range; sweeping with {}s instead",
                    self.lease_timeout,
                    FALLBACK_LEASE_SECS
                );
                now - chrono::Duration::seconds(FALLBACK_LEASE_SECS)
            }
        };
        let expired = self.db.with_conn(|conn| job_repo::find_expired(conn, cutoff))?;

        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };
        if expired.is_empty() {
            log::debug!("Watchdog: no expired leases");
            return Ok(report);
        }

        for job in &expired {
            match self.reap(job, now)? {
                Reaped::Requeued(code) => {
                    report.requeued += 1;
                    self.events.emit(
                        &job.batch_id,
                        BatchEventKind::JobRequeued {
                            job_id: job.id.clone(),
                            code,
                            retry_count: job.retry_count + 1,
                        },
                    );
                }
                Reaped::Failed(code) => {
                    report.failed += 1;
                    self.events.emit(
                        &job.batch_id,
                        BatchEventKind::JobFailed {
                            job_id: job.id.clone(),
                            code,
                        },
                    );
                }
                Reaped::Cancelled => {
                    report.cancelled += 1;
                    self.events
                        .emit(&job.batch_id, BatchEventKind::JobsCancelled { count: 1 });
                }
                Reaped::Skipped => {
                    report.skipped += 1;
                    continue;
                }
            }
            report.touched_batches.insert(job.batch_id.clone());
        }

        log::info!(
            "Watchdog: {} expired, {} requeued, {} failed, {} cancelled",
            report.expired,
            report.requeued,
            report.failed,
            report.cancelled
        );
        Ok(report)
    }

    fn reap(&self, job: &Job, now: DateTime<Utc>) -> Result<Reaped, DatabaseError> {
        let Some(worker_id) = job.worker_id.as_deref() else {
            return Ok(Reaped::Skipped);
        };

        self.db.with_transaction(|conn| {
            let status = batch_repo::find_by_id(conn, &job.batch_id)?.map(|b| b.status);

            if status == Some(BatchStatus::Cancelled) {
                if job_repo::cancel_running(conn, &job.id, worker_id, now)? {
                    batch_repo::increment(conn, &job.batch_id, BatchCounter::Cancelled, 1, now)?;
                    return Ok(Reaped::Cancelled);
                }
                return Ok(Reaped::Skipped);
            }

            let decision = classifier::decide_timeout(
                job.retry_count,
                job.max_retries,
                self.lease_timeout.as_secs(),
            );
            match decision {
                RetryDecision::Requeue(error) => {
                    if job_repo::requeue(conn, &job.id, worker_id, &error, now)? {
                        log::warn!("Job {} lease expired; requeued", job.id);
                        Ok(Reaped::Requeued(error.code))
                    } else {
                        Ok(Reaped::Skipped)
                    }
                }
                RetryDecision::Fail(error) => {
                    if job_repo::fail(conn, &job.id, worker_id, &error, now)? {
                        batch_repo::increment(conn, &job.batch_id, BatchCounter::Failed, 1, now)?;
                        log::error!("Job {} lease expired with no retries left", job.id);
                        Ok(Reaped::Failed(error.code))
                    } else {
                        Ok(Reaped::Skipped)
                    }
                }
            }
        })
    }
}
