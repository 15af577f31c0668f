//! Batch repository: reads and atomic updates on the `batches` table.
//!
//! Functions take a `&Connection` so callers can compose them inside one
//! [`Database::with_transaction`](super::Database::with_transaction).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::model::{Batch, BatchStatus};

/// A raw batch row from the database.
#[derive(Debug, Clone)]
pub struct BatchRow {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub job_description: String,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled_count: u32,
    pub skipped_duplicates: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl BatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            status: row.get("status")?,
            job_description: row.get("job_description")?,
            total: row.get("total")?,
            completed: row.get("completed")?,
            failed: row.get("failed")?,
            cancelled_count: row.get("cancelled_count")?,
            skipped_duplicates: row.get("skipped_duplicates")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn into_batch(self) -> Result<Batch, DatabaseError> {
        let status = BatchStatus::parse(&self.status).ok_or_else(|| DatabaseError::Corrupt {
            row_id: self.id.clone(),
            column: "status",
            value: self.status.clone(),
        })?;
        let created_at = parse_timestamp(&self.created_at, &self.id, "created_at")?;
        let updated_at = parse_timestamp(&self.updated_at, &self.id, "updated_at")?;

        Ok(Batch {
            id: self.id,
            user_id: self.user_id,
            status,
            job_description: self.job_description,
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            cancelled_count: self.cancelled_count,
            skipped_duplicates: self.skipped_duplicates,
            created_at,
            updated_at,
        })
    }
}

/// Aggregate counters mutated by workers and the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchCounter {
    Completed,
    Failed,
    Cancelled,
}

impl BatchCounter {
    fn column(&self) -> &'static str {
        match self {
            BatchCounter::Completed => "completed",
            BatchCounter::Failed => "failed",
            BatchCounter::Cancelled => "cancelled_count",
        }
    }
}

/// Inserts a new batch row.
pub fn insert(conn: &Connection, batch: &Batch) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO batches (id, user_id, status, job_description, total, completed, failed,
         cancelled_count, skipped_duplicates, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            batch.id,
            batch.user_id,
            batch.status.as_str(),
            batch.job_description,
            batch.total,
            batch.completed,
            batch.failed,
            batch.cancelled_count,
            batch.skipped_duplicates,
            format_timestamp(batch.created_at),
            format_timestamp(batch.updated_at),
        ],
    )?;
    Ok(())
}

/// Finds a batch by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Batch>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM batches WHERE id = ?1",
            params![id],
            BatchRow::from_row,
        )
        .optional()?;
    row.map(BatchRow::into_batch).transpose()
}

/// Lists a user's batches, newest first.
pub fn list_by_user(
    conn: &Connection,
    user_id: &str,
    limit: u32,
) -> Result<Vec<Batch>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM batches WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![user_id, limit], BatchRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(BatchRow::into_batch).collect()
}

/// IDs of every batch in `status`, oldest first.
pub fn list_ids_by_status(
    conn: &Connection,
    status: BatchStatus,
) -> Result<Vec<String>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT id FROM batches WHERE status = ?1 ORDER BY created_at ASC, rowid ASC")?;
    let ids = stmt
        .query_map(params![status.as_str()], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Moves a batch from `from` to `to`. Returns false when the batch was not in `from`.
pub fn transition(
    conn: &Connection,
    id: &str,
    from: BatchStatus,
    to: BatchStatus,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE batches SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        params![id, from.as_str(), to.as_str(), format_timestamp(now)],
    )?;
    Ok(changed > 0)
}

/// Adds `by` to one counter in place.
pub fn increment(
    conn: &Connection,
    id: &str,
    counter: BatchCounter,
    by: u32,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let sql = format!(
        "UPDATE batches SET {col} = {col} + ?2, updated_at = ?3 WHERE id = ?1",
        col = counter.column()
    );
    conn.execute(&sql, params![id, by, format_timestamp(now)])?;
    Ok(())
}

/// Flips a running batch to `complete` once every job has settled.
///
/// Safe to call any number of times from any number of workers: only the
/// first caller that observes the settled counters changes the row.
pub fn complete_if_settled(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE batches SET status = 'complete', updated_at = ?2
         WHERE id = ?1 AND status = 'running'
           AND completed + failed + cancelled_count + skipped_duplicates
               >= total + skipped_duplicates",
        params![id, format_timestamp(now)],
    )?;
    Ok(changed > 0)
}
