//! Job repository: reads and conditional transitions on the `jobs` table.
//!
//! Every transition out of `running` is keyed on the worker binding that was
//! observed when the decision was made. If the binding changed in between
//! (watchdog reaped the lease, another worker claimed the requeued job), the
//! update matches no row and the caller gets `false`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::inference::JobResult;
use crate::model::{ErrorCode, Job, JobError, JobStatus};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub batch_id: String,
    pub filename: String,
    pub file_ref: String,
    pub fingerprint: Option<String>,
    pub status: String,
    pub start_time: Option<String>,
    pub last_updated_at: String,
    pub worker_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            batch_id: row.get("batch_id")?,
            filename: row.get("filename")?,
            file_ref: row.get("file_ref")?,
            fingerprint: row.get("fingerprint")?,
            status: row.get("status")?,
            start_time: row.get("start_time")?,
            last_updated_at: row.get("last_updated_at")?,
            worker_id: row.get("worker_id")?,
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            result: row.get("result")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn into_job(self) -> Result<Job, DatabaseError> {
        let corrupt = |column: &'static str, value: &str| DatabaseError::Corrupt {
            row_id: self.id.clone(),
            column,
            value: value.to_string(),
        };

        let status = JobStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;
        let start_time = self
            .start_time
            .as_deref()
            .map(|s| parse_timestamp(s, &self.id, "start_time"))
            .transpose()?;
        let last_updated_at = parse_timestamp(&self.last_updated_at, &self.id, "last_updated_at")?;
        let created_at = parse_timestamp(&self.created_at, &self.id, "created_at")?;
        let result = match self.result.as_deref() {
            Some(json) => Some(
                serde_json::from_str::<JobResult>(json).map_err(|_| corrupt("result", json))?,
            ),
            None => None,
        };
        let error = match (self.error_code.as_deref(), self.error_message.as_deref()) {
            (Some(code), message) => Some(JobError {
                code: ErrorCode::parse(code).ok_or_else(|| corrupt("error_code", code))?,
                message: message.unwrap_or_default().to_string(),
            }),
            (None, _) => None,
        };

        Ok(Job {
            id: self.id,
            batch_id: self.batch_id,
            filename: self.filename,
            file_ref: self.file_ref,
            fingerprint: self.fingerprint,
            status,
            start_time,
            last_updated_at,
            worker_id: self.worker_id,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            result,
            error,
            created_at,
        })
    }
}

fn collect_jobs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(JobRow::into_job).collect()
}

/// Inserts a new job row.
pub fn insert(conn: &Connection, job: &Job) -> Result<(), DatabaseError> {
    let result = job
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::Corrupt {
            row_id: job.id.clone(),
            column: "result",
            value: e.to_string(),
        })?;

    conn.execute(
        "INSERT INTO jobs (id, batch_id, filename, file_ref, fingerprint, status, start_time,
         last_updated_at, worker_id, retry_count, max_retries, result, error_code,
         error_message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            job.id,
            job.batch_id,
            job.filename,
            job.file_ref,
            job.fingerprint,
            job.status.as_str(),
            job.start_time.map(format_timestamp),
            format_timestamp(job.last_updated_at),
            job.worker_id,
            job.retry_count,
            job.max_retries,
            result,
            job.error.as_ref().map(|e| e.code.as_str()),
            job.error.as_ref().map(|e| e.message.as_str()),
            format_timestamp(job.created_at),
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    row.map(JobRow::into_job).transpose()
}

/// Lists a batch's jobs, most recently updated first.
pub fn list_by_batch(conn: &Connection, batch_id: &str) -> Result<Vec<Job>, DatabaseError> {
    collect_jobs(
        conn,
        "SELECT * FROM jobs WHERE batch_id = ?1 ORDER BY last_updated_at DESC, rowid DESC",
        params![batch_id],
    )
}

/// The pending job of a batch that has waited longest.
pub fn oldest_pending(conn: &Connection, batch_id: &str) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE batch_id = ?1 AND status = 'pending'
             ORDER BY last_updated_at ASC, rowid ASC LIMIT 1",
            params![batch_id],
            JobRow::from_row,
        )
        .optional()?;
    row.map(JobRow::into_job).transpose()
}

/// `pending -> running`, binding the job to `worker_id`.
///
/// Returns false if the job is no longer pending.
pub fn mark_running(
    conn: &Connection,
    id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let ts = format_timestamp(now);
    let changed = conn.execute(
        "UPDATE jobs SET status = 'running', worker_id = ?2, start_time = ?3, last_updated_at = ?3
         WHERE id = ?1 AND status = 'pending'",
        params![id, worker_id, ts],
    )?;
    Ok(changed > 0)
}

/// `running -> pending` without spending a retry (claim handed back unprocessed).
pub fn release(
    conn: &Connection,
    id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'pending', worker_id = NULL, start_time = NULL,
         last_updated_at = ?3
         WHERE id = ?1 AND status = 'running' AND worker_id = ?2",
        params![id, worker_id, format_timestamp(now)],
    )?;
    Ok(changed > 0)
}

/// `running -> complete` with the result payload; clears any earlier error.
pub fn complete(
    conn: &Connection,
    id: &str,
    worker_id: &str,
    result: &JobResult,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let json = serde_json::to_string(result).map_err(|e| DatabaseError::Corrupt {
        row_id: id.to_string(),
        column: "result",
        value: e.to_string(),
    })?;
    let changed = conn.execute(
        "UPDATE jobs SET status = 'complete', result = ?3, error_code = NULL,
         error_message = NULL, worker_id = NULL, start_time = NULL, last_updated_at = ?4
         WHERE id = ?1 AND status = 'running' AND worker_id = ?2",
        params![id, worker_id, json, format_timestamp(now)],
    )?;
    Ok(changed > 0)
}

/// `running -> pending` spending one retry and recording the error.
pub fn requeue(
    conn: &Connection,
    id: &str,
    worker_id: &str,
    error: &JobError,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'pending', retry_count = retry_count + 1, worker_id = NULL,
         start_time = NULL, error_code = ?3, error_message = ?4, last_updated_at = ?5
         WHERE id = ?1 AND status = 'running' AND worker_id = ?2
           AND retry_count < max_retries",
        params![
            id,
            worker_id,
            error.code.as_str(),
            error.message,
            format_timestamp(now)
        ],
    )?;
    Ok(changed > 0)
}

/// `running -> failed` recording the error.
pub fn fail(
    conn: &Connection,
    id: &str,
    worker_id: &str,
    error: &JobError,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'failed', worker_id = NULL, start_time = NULL,
         error_code = ?3, error_message = ?4, last_updated_at = ?5
         WHERE id = ?1 AND status = 'running' AND worker_id = ?2",
        params![
            id,
            worker_id,
            error.code.as_str(),
            error.message,
            format_timestamp(now)
        ],
    )?;
    Ok(changed > 0)
}

/// `running -> cancelled` for an attempt that ended after its batch was cancelled.
pub fn cancel_running(
    conn: &Connection,
    id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'cancelled', worker_id = NULL, start_time = NULL,
         last_updated_at = ?3
         WHERE id = ?1 AND status = 'running' AND worker_id = ?2",
        params![id, worker_id, format_timestamp(now)],
    )?;
    Ok(changed > 0)
}

/// Cancels every pending job of a batch. Returns how many were cancelled.
pub fn cancel_pending(
    conn: &Connection,
    batch_id: &str,
    now: DateTime<Utc>,
) -> Result<u32, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'cancelled', last_updated_at = ?2
         WHERE batch_id = ?1 AND status = 'pending'",
        params![batch_id, format_timestamp(now)],
    )?;
    Ok(changed as u32)
}

/// Running jobs, across all batches, whose lease started before `cutoff`.
pub fn find_expired(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError> {
    collect_jobs(
        conn,
        "SELECT * FROM jobs WHERE status = 'running' AND start_time < ?1 ORDER BY start_time ASC",
        params![format_timestamp(cutoff)],
    )
}

/// Counts a batch's jobs in the given status.
pub fn count_by_status(
    conn: &Connection,
    batch_id: &str,
    status: JobStatus,
) -> Result<u32, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE batch_id = ?1 AND status = ?2",
        params![batch_id, status.as_str()],
        |r| r.get(0),
    )?;
    Ok(count)
}
