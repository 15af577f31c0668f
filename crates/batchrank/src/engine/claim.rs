//! Claim protocol: hand at most one pending job to one worker.

use chrono::Utc;

use crate::db::{job_repo, Database, DatabaseError};
use crate::model::Job;

/// Atomically moves the oldest pending job of `batch_id` to `running`, bound
/// to `worker_id`.
///
/// Returns `None` when nothing is pending or the candidate was taken by
/// someone else between the read and the write. Losing that race is not an
/// error.
pub fn claim_next(
    db: &Database,
    batch_id: &str,
    worker_id: &str,
) -> Result<Option<Job>, DatabaseError> {
    db.with_transaction(|conn| {
        let Some(candidate) = job_repo::oldest_pending(conn, batch_id)? else {
            return Ok(None);
        };

        let now = Utc::now();
        if !job_repo::mark_running(conn, &candidate.id, worker_id, now)? {
            log::debug!(
                "Job {} was claimed by another worker before {}",
                candidate.id,
                worker_id
            );
            return Ok(None);
        }

        job_repo::find_by_id(conn, &candidate.id)
    })
}
