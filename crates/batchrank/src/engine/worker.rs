//! One Worker Loop iteration.
//!
//! An iteration never calls the next one. It returns an [`IterationOutcome`]
//! and the dispatcher decides whether to re-enqueue the batch.

use chrono::Utc;
use tracing::info_span;

use super::classifier::{self, RetryDecision};
use super::{claim, controller};
use super::EngineContext;
use crate::broadcast::BatchEventKind;
use crate::db::batch_repo::{self, BatchCounter};
use crate::db::{job_repo, DatabaseError};
use crate::inference::{InferenceError, JobResult, ResumeAnalysis};
use crate::model::{BatchStatus, ErrorCode, Job};
use crate::sanitize;

/// Why an iteration stopped the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// Batch no longer exists.
    Missing,
    /// Batch is paused, cancelled or complete.
    Halted(BatchStatus),
    /// Nothing claimable; `completed` tells whether this iteration flipped
    /// the batch to `complete`.
    Drained { completed: bool },
    /// A pause landed between the claim and the analyzer call; the job is
    /// pending again.
    Released,
    /// A cancel landed between the claim and the analyzer call; the job is
    /// cancelled and counted.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// A job was processed; schedule another iteration for the same batch.
    Continue,
    /// Stop this chain.
    Idle(IdleReason),
}

/// How a processed attempt was written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Completed,
    Requeued(ErrorCode),
    Failed(ErrorCode),
    /// The batch was cancelled while the attempt was in flight.
    Cancelled,
    /// The lease was lost (watchdog reaped it); nothing was written.
    Dropped,
}

/// Runs one iteration for `batch_id` as `worker_id`.
///
/// Analyzer failures are never returned as errors; they become state
/// transitions. Only store failures propagate.
pub fn run_iteration(
    ctx: &EngineContext,
    batch_id: &str,
    worker_id: &str,
) -> Result<IterationOutcome, DatabaseError> {
    let _span = info_span!("worker_iteration", batch_id = %batch_id, worker_id = %worker_id)
        .entered();

    // Step 1: bail out if the batch is not running
    let Some(batch) = ctx.db.with_conn(|conn| batch_repo::find_by_id(conn, batch_id))? else {
        log::warn!("Batch {} no longer exists; stopping", batch_id);
        return Ok(IterationOutcome::Idle(IdleReason::Missing));
    };
    if batch.status != BatchStatus::Running {
        log::debug!("Batch {} is {}; stopping", batch_id, batch.status);
        return Ok(IterationOutcome::Idle(IdleReason::Halted(batch.status)));
    }

    // Step 2: claim
    let Some(job) = claim::claim_next(&ctx.db, batch_id, worker_id)? else {
        let completed = controller::check_completion(ctx, batch_id)?;
        return Ok(IterationOutcome::Idle(IdleReason::Drained { completed }));
    };
    ctx.events.emit(
        batch_id,
        BatchEventKind::JobClaimed {
            job_id: job.id.clone(),
            worker_id: worker_id.to_string(),
        },
    );

    // Step 3: re-check, a pause or cancel may have landed after step 1
    if let Some(reason) = recheck_after_claim(ctx, &job, worker_id)? {
        return Ok(IterationOutcome::Idle(reason));
    }

    // Step 4: analyze
    let outcome = {
        let _step = info_span!(
            "analyze",
            job_id = %job.id,
            file = %sanitize::redact_reference(&job.file_ref),
            attempt = job.retry_count + 1,
        )
        .entered();
        ctx.analyzer.analyze(&job.file_ref, &batch.job_description)
    };

    // Steps 5 and 6: write back
    let settlement = {
        let _step = info_span!("settle", job_id = %job.id).entered();
        settle(ctx, &job, worker_id, outcome)?
    };
    log::debug!("Job {} settled as {:?}", job.id, settlement);

    // Step 7: always continue
    Ok(IterationOutcome::Continue)
}

/// Gives a freshly claimed job back when its batch stopped running.
///
/// Cancel already swept pending jobs, so a job claimed in a cancelled batch
/// is cancelled here. Any other halt puts it back to `pending` untouched.
fn recheck_after_claim(
    ctx: &EngineContext,
    job: &Job,
    worker_id: &str,
) -> Result<Option<IdleReason>, DatabaseError> {
    let status = ctx
        .db
        .with_conn(|conn| batch_repo::find_by_id(conn, &job.batch_id))?
        .map(|b| b.status);

    match status {
        Some(BatchStatus::Running) => Ok(None),
        Some(BatchStatus::Cancelled) => {
            let cancelled = ctx.db.with_transaction(|conn| {
                let now = Utc::now();
                if job_repo::cancel_running(conn, &job.id, worker_id, now)? {
                    batch_repo::increment(conn, &job.batch_id, BatchCounter::Cancelled, 1, now)?;
                    return Ok(true);
                }
                Ok(false)
            })?;
            if cancelled {
                log::info!("Cancelled job {}; batch was cancelled after claim", job.id);
                ctx.events
                    .emit(&job.batch_id, BatchEventKind::JobsCancelled { count: 1 });
            }
            Ok(Some(IdleReason::Cancelled))
        }
        _ => {
            let released = ctx
                .db
                .with_conn(|conn| job_repo::release(conn, &job.id, worker_id, Utc::now()))?;
            if released {
                log::info!("Released job {} back to pending; batch stopped running", job.id);
                ctx.events.emit(
                    &job.batch_id,
                    BatchEventKind::JobReleased {
                        job_id: job.id.clone(),
                    },
                );
            }
            Ok(Some(IdleReason::Released))
        }
    }
}

fn settle(
    ctx: &EngineContext,
    job: &Job,
    worker_id: &str,
    outcome: Result<ResumeAnalysis, InferenceError>,
) -> Result<Settlement, DatabaseError> {
    let model_version = ctx.analyzer.model_version();

    let settlement = ctx.db.with_transaction(|conn| {
        let now = Utc::now();
        let status = batch_repo::find_by_id(conn, &job.batch_id)?.map(|b| b.status);

        if status == Some(BatchStatus::Cancelled) {
            if job_repo::cancel_running(conn, &job.id, worker_id, now)? {
                batch_repo::increment(conn, &job.batch_id, BatchCounter::Cancelled, 1, now)?;
                return Ok(Settlement::Cancelled);
            }
            return Ok(Settlement::Dropped);
        }

        match &outcome {
            Ok(analysis) => {
                let result = JobResult::new(analysis.clone(), model_version);
                if job_repo::complete(conn, &job.id, worker_id, &result, now)? {
                    batch_repo::increment(conn, &job.batch_id, BatchCounter::Completed, 1, now)?;
                    Ok(Settlement::Completed)
                } else {
                    Ok(Settlement::Dropped)
                }
            }
            Err(error) => match classifier::decide(error, job.retry_count, job.max_retries) {
                RetryDecision::Requeue(job_error) => {
                    if job_repo::requeue(conn, &job.id, worker_id, &job_error, now)? {
                        Ok(Settlement::Requeued(job_error.code))
                    } else {
                        Ok(Settlement::Dropped)
                    }
                }
                RetryDecision::Fail(job_error) => {
                    if job_repo::fail(conn, &job.id, worker_id, &job_error, now)? {
                        batch_repo::increment(conn, &job.batch_id, BatchCounter::Failed, 1, now)?;
                        Ok(Settlement::Failed(job_error.code))
                    } else {
                        Ok(Settlement::Dropped)
                    }
                }
            },
        }
    })?;

    publish(ctx, job, &outcome, settlement);
    Ok(settlement)
}

fn publish(
    ctx: &EngineContext,
    job: &Job,
    outcome: &Result<ResumeAnalysis, InferenceError>,
    settlement: Settlement,
) {
    let job_id = job.id.clone();
    let kind = match (settlement, outcome) {
        (Settlement::Completed, Ok(analysis)) => {
            log::info!(
                "Job {} complete (score {:.1})",
                job.id,
                analysis.scores.total_score
            );
            BatchEventKind::JobCompleted {
                job_id,
                total_score: analysis.scores.total_score,
            }
        }
        (Settlement::Requeued(code), Err(error)) => {
            log::warn!(
                "Job {} requeued after attempt {}: {}",
                job.id,
                job.retry_count + 1,
                error
            );
            BatchEventKind::JobRequeued {
                job_id,
                code,
                retry_count: job.retry_count + 1,
            }
        }
        (Settlement::Failed(code), Err(error)) => {
            log::error!("Job {} failed ({}): {}", job.id, code, error);
            BatchEventKind::JobFailed { job_id, code }
        }
        (Settlement::Cancelled, _) => {
            log::info!("Job {} cancelled; batch was cancelled mid-flight", job.id);
            BatchEventKind::JobsCancelled { count: 1 }
        }
        (Settlement::Dropped, _) => {
            log::warn!(
                "Lease on job {} was lost before write-back; result discarded",
                job.id
            );
            return;
        }
        _ => return,
    };
    ctx.events.emit(&job.batch_id, kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{context, seed_batch, ScriptedAnalyzer};
    use crate::model::{BatchAction, ErrorCode, JobStatus};

    fn batch(ctx: &EngineContext, id: &str) -> crate::model::Batch {
        ctx.db
            .with_conn(|conn| batch_repo::find_by_id(conn, id))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_success_completes_and_continues() {
        let ctx = context(ScriptedAnalyzer::always_ok(80.0));
        seed_batch(&ctx, "b1", 1);

        let outcome = run_iteration(&ctx, "b1", "w1").unwrap();
        assert_eq!(outcome, IterationOutcome::Continue);

        let job = ctx
            .db
            .with_conn(|conn| job_repo::find_by_id(conn, "b1-j0"))
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.worker_id.is_none());
        assert_eq!(job.result.unwrap().scores.total_score, 80.0);
    }

    #[test]
    fn test_drained_batch_completes() {
        let ctx = context(ScriptedAnalyzer::always_ok(80.0));
        seed_batch(&ctx, "b1", 1);

        assert_eq!(
            run_iteration(&ctx, "b1", "w1").unwrap(),
            IterationOutcome::Continue
        );
        assert_eq!(
            run_iteration(&ctx, "b1", "w1").unwrap(),
            IterationOutcome::Idle(IdleReason::Drained { completed: true })
        );
        assert_eq!(
            run_iteration(&ctx, "b1", "w1").unwrap(),
            IterationOutcome::Idle(IdleReason::Halted(BatchStatus::Complete))
        );
    }

    #[test]
    fn test_transient_error_requeues() {
        let ctx = context(ScriptedAnalyzer::always_err(InferenceError::RateLimited(
            "429".into(),
        )));
        seed_batch(&ctx, "b1", 1);

        run_iteration(&ctx, "b1", "w1").unwrap();
        let job = ctx
            .db
            .with_conn(|conn| job_repo::find_by_id(conn, "b1-j0"))
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.error.unwrap().code, ErrorCode::RateLimited);
    }

    #[test]
    fn test_schema_mismatch_fails_immediately() {
        let ctx = context(ScriptedAnalyzer::always_err(InferenceError::SchemaMismatch(
            "bad".into(),
        )));
        seed_batch(&ctx, "b1", 1);

        run_iteration(&ctx, "b1", "w1").unwrap();
        let batch = ctx
            .db
            .with_conn(|conn| batch_repo::find_by_id(conn, "b1"))
            .unwrap()
            .unwrap();
        assert_eq!(batch.failed, 1);
    }

    #[test]
    fn test_paused_batch_is_not_claimed() {
        let ctx = context(ScriptedAnalyzer::always_ok(80.0));
        seed_batch(&ctx, "b1", 1);
        ctx.db
            .with_conn(|conn| {
                batch_repo::transition(
                    conn,
                    "b1",
                    BatchStatus::Running,
                    BatchStatus::Paused,
                    Utc::now(),
                )
            })
            .unwrap();

        assert_eq!(
            run_iteration(&ctx, "b1", "w1").unwrap(),
            IterationOutcome::Idle(IdleReason::Halted(BatchStatus::Paused))
        );
        assert_eq!(
            ctx.db
                .with_conn(|conn| job_repo::count_by_status(conn, "b1", JobStatus::Pending))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_missing_batch_is_idle() {
        let ctx = context(ScriptedAnalyzer::always_ok(80.0));
        assert_eq!(
            run_iteration(&ctx, "ghost", "w1").unwrap(),
            IterationOutcome::Idle(IdleReason::Missing)
        );
    }

    #[test]
    fn test_pause_after_claim_hands_job_back() {
        let ctx = context(ScriptedAnalyzer::always_err(InferenceError::Other(
            "analyzer must not run".into(),
        )));
        seed_batch(&ctx, "b1", 1);
        let mut rx = ctx.events.subscribe();

        let job = claim::claim_next(&ctx.db, "b1", "w1").unwrap().unwrap();
        controller::control_batch(&ctx, "u1", "b1", BatchAction::Pause).unwrap();

        assert_eq!(
            recheck_after_claim(&ctx, &job, "w1").unwrap(),
            Some(IdleReason::Released)
        );

        let job = ctx
            .db
            .with_conn(|conn| job_repo::find_by_id(conn, "b1-j0"))
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.worker_id.is_none());
        assert!(job.start_time.is_none());
        assert_eq!(job.retry_count, 0);
        assert!(job.error.is_none());

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&BatchEventKind::JobReleased {
            job_id: "b1-j0".into()
        }));

        // Resuming picks the same job up again.
        controller::control_batch(&ctx, "u1", "b1", BatchAction::Resume).unwrap();
        let again = claim::claim_next(&ctx.db, "b1", "w2").unwrap().unwrap();
        assert_eq!(again.id, "b1-j0");
    }

    #[test]
    fn test_cancel_after_claim_counts_job_as_cancelled() {
        let ctx = context(ScriptedAnalyzer::always_ok(80.0));
        seed_batch(&ctx, "b1", 2);
        let mut rx = ctx.events.subscribe();

        let job = claim::claim_next(&ctx.db, "b1", "w1").unwrap().unwrap();
        let outcome = controller::control_batch(&ctx, "u1", "b1", BatchAction::Cancel).unwrap();
        // Only the job still pending was swept by the cancel itself.
        assert_eq!(outcome.cancelled_jobs, 1);

        assert_eq!(
            recheck_after_claim(&ctx, &job, "w1").unwrap(),
            Some(IdleReason::Cancelled)
        );

        let claimed = ctx
            .db
            .with_conn(|conn| job_repo::find_by_id(conn, &job.id))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, JobStatus::Cancelled);
        assert!(claimed.worker_id.is_none());
        assert_eq!(
            ctx.db
                .with_conn(|conn| job_repo::count_by_status(conn, "b1", JobStatus::Pending))
                .unwrap(),
            0
        );

        let batch = batch(&ctx, "b1");
        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert_eq!(batch.cancelled_count, 2);
        assert_eq!(batch.completed + batch.failed + batch.cancelled_count, batch.total);

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds.last(),
            Some(&BatchEventKind::JobsCancelled { count: 1 })
        );
    }

    #[test]
    fn test_recheck_on_running_batch_keeps_claim() {
        let ctx = context(ScriptedAnalyzer::always_ok(80.0));
        seed_batch(&ctx, "b1", 1);

        let job = claim::claim_next(&ctx.db, "b1", "w1").unwrap().unwrap();
        assert_eq!(recheck_after_claim(&ctx, &job, "w1").unwrap(), None);
        let job = ctx
            .db
            .with_conn(|conn| job_repo::find_by_id(conn, "b1-j0"))
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.worker_id.as_deref(), Some("w1"));
    }
}
