//! Batch creation, operator control and completion detection.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::EngineContext;
use crate::broadcast::BatchEventKind;
use crate::db::batch_repo::{self, BatchCounter};
use crate::db::{job_repo, DatabaseError};
use crate::dedup::{dedup_files, UploadedFile};
use crate::error::{BatchrankError, Result};
use crate::model::{Batch, BatchAction, BatchStatus, Job, JobStatus};
use crate::storage::resume_key;

/// Result of a control action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlOutcome {
    pub previous: BatchStatus,
    pub current: BatchStatus,
    /// Pending jobs moved to `cancelled` by this action.
    pub cancelled_jobs: u32,
}

impl ControlOutcome {
    /// False when the action was illegal for the batch's state and nothing changed.
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// A batch with its jobs, most recently updated first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDetails {
    pub batch: Batch,
    pub jobs: Vec<Job>,
}

/// Dedups, uploads and persists a new batch. Returns the batch id.
///
/// Either every job row and the batch row land in one transaction, or
/// nothing does and every uploaded blob is deleted again.
pub fn create_batch(
    ctx: &EngineContext,
    user_id: &str,
    job_description: &str,
    files: Vec<UploadedFile>,
) -> Result<String> {
    if user_id.trim().is_empty() {
        return Err(BatchrankError::InvalidInput("user id is empty".into()));
    }
    if job_description.trim().is_empty() {
        return Err(BatchrankError::InvalidInput("job description is empty".into()));
    }
    if files.is_empty() {
        return Err(BatchrankError::InvalidInput("no files submitted".into()));
    }

    let dedup = dedup_files(files);
    let batch_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let mut uploaded: Vec<String> = Vec::with_capacity(dedup.unique.len());
    let mut jobs = Vec::with_capacity(dedup.unique.len());
    for (index, unique) in dedup.unique.iter().enumerate() {
        let job_id = Uuid::new_v4().to_string();
        let key = resume_key(&batch_id, &job_id, &unique.file.filename);
        let file_ref = match ctx.blobs.put(&key, &unique.file.content) {
            Ok(reference) => reference,
            Err(e) => {
                log::error!("Upload of '{}' failed: {}", unique.file.filename, e);
                rollback_uploads(ctx, &uploaded);
                return Err(e.into());
            }
        };
        uploaded.push(file_ref.clone());

        // Offset by index so FIFO follows submission order.
        let stamped = now + chrono::Duration::microseconds(index as i64);
        jobs.push(Job {
            id: job_id,
            batch_id: batch_id.clone(),
            filename: unique.file.filename.clone(),
            file_ref,
            fingerprint: Some(unique.fingerprint.clone()),
            status: JobStatus::Pending,
            start_time: None,
            last_updated_at: stamped,
            worker_id: None,
            retry_count: 0,
            max_retries: ctx.settings.max_retries,
            result: None,
            error: None,
            created_at: stamped,
        });
    }

    let batch = Batch {
        id: batch_id.clone(),
        user_id: user_id.to_string(),
        status: BatchStatus::Running,
        job_description: job_description.to_string(),
        total: jobs.len() as u32,
        completed: 0,
        failed: 0,
        cancelled_count: 0,
        skipped_duplicates: dedup.skipped,
        created_at: now,
        updated_at: now,
    };

    let persisted = ctx.db.with_transaction(|conn| {
        batch_repo::insert(conn, &batch)?;
        for job in &jobs {
            job_repo::insert(conn, job)?;
        }
        Ok(())
    });
    if let Err(e) = persisted {
        log::error!("Persisting batch {} failed: {}", batch_id, e);
        rollback_uploads(ctx, &uploaded);
        return Err(e.into());
    }

    log::info!(
        "Created batch {} for user {}: {} jobs, {} duplicates skipped",
        batch_id,
        user_id,
        batch.total,
        batch.skipped_duplicates
    );
    ctx.events.emit(
        &batch_id,
        BatchEventKind::BatchCreated {
            total: batch.total,
            skipped_duplicates: batch.skipped_duplicates,
        },
    );

    Ok(batch_id)
}

fn rollback_uploads(ctx: &EngineContext, references: &[String]) {
    for reference in references {
        if let Err(e) = ctx.blobs.delete(reference) {
            log::warn!("Rollback could not delete blob: {}", e);
        }
    }
}

/// Applies `action` to a batch owned by `user_id`.
///
/// Illegal transitions are a no-op (`previous == current`), not an error.
pub fn control_batch(
    ctx: &EngineContext,
    user_id: &str,
    batch_id: &str,
    action: BatchAction,
) -> Result<ControlOutcome> {
    let outcome = ctx.db.with_transaction(|conn| {
        let Some(batch) = batch_repo::find_by_id(conn, batch_id)? else {
            return Ok(Err(BatchrankError::NotFound(batch_id.to_string())));
        };
        if batch.user_id != user_id {
            return Ok(Err(BatchrankError::PermissionDenied {
                user_id: user_id.to_string(),
                batch_id: batch_id.to_string(),
            }));
        }

        let previous = batch.status;
        let Some(next) = action.transition(previous) else {
            return Ok(Ok(ControlOutcome {
                previous,
                current: previous,
                cancelled_jobs: 0,
            }));
        };

        let now = Utc::now();
        if !batch_repo::transition(conn, batch_id, previous, next, now)? {
            return Ok(Ok(ControlOutcome {
                previous,
                current: previous,
                cancelled_jobs: 0,
            }));
        }

        let mut cancelled_jobs = 0;
        if next == BatchStatus::Cancelled {
            cancelled_jobs = job_repo::cancel_pending(conn, batch_id, now)?;
            if cancelled_jobs > 0 {
                batch_repo::increment(conn, batch_id, BatchCounter::Cancelled, cancelled_jobs, now)?;
            }
        }

        Ok(Ok(ControlOutcome {
            previous,
            current: next,
            cancelled_jobs,
        }))
    })??;

    if outcome.changed() {
        log::info!(
            "Batch {}: {} ({} -> {})",
            batch_id,
            action,
            outcome.previous,
            outcome.current
        );
        ctx.events.emit(
            batch_id,
            BatchEventKind::BatchStatusChanged {
                from: outcome.previous,
                to: outcome.current,
            },
        );
        if outcome.cancelled_jobs > 0 {
            ctx.events.emit(
                batch_id,
                BatchEventKind::JobsCancelled {
                    count: outcome.cancelled_jobs,
                },
            );
        }
    } else {
        log::info!(
            "Batch {}: {} ignored while {}",
            batch_id,
            action,
            outcome.previous
        );
    }

    Ok(outcome)
}

/// Flips a running batch to `complete` once every job has settled.
/// Idempotent; returns true only for the call that made the change.
pub fn check_completion(ctx: &EngineContext, batch_id: &str) -> std::result::Result<bool, DatabaseError> {
    let completed = ctx
        .db
        .with_conn(|conn| batch_repo::complete_if_settled(conn, batch_id, Utc::now()))?;
    if completed {
        log::info!("Batch {} complete", batch_id);
        ctx.events.emit(
            batch_id,
            BatchEventKind::BatchStatusChanged {
                from: BatchStatus::Running,
                to: BatchStatus::Complete,
            },
        );
    }
    Ok(completed)
}

/// A user's batches, newest first, capped at the configured list limit.
pub fn get_batches(ctx: &EngineContext, user_id: &str) -> Result<Vec<Batch>> {
    let limit = ctx.settings.list_limit;
    Ok(ctx
        .db
        .with_conn(|conn| batch_repo::list_by_user(conn, user_id, limit))?)
}

/// A batch and its jobs, or `None` when it does not exist or belongs to
/// someone else.
pub fn get_batch_details(
    ctx: &EngineContext,
    user_id: &str,
    batch_id: &str,
) -> Result<Option<BatchDetails>> {
    let details = ctx.db.with_conn(|conn| {
        let Some(batch) = batch_repo::find_by_id(conn, batch_id)? else {
            return Ok(None);
        };
        if batch.user_id != user_id {
            return Ok(None);
        }
        let jobs = job_repo::list_by_batch(conn, batch_id)?;
        Ok(Some(BatchDetails { batch, jobs }))
    })?;
    Ok(details)
}
