//! Batch and job records as the engine sees them.
//!
//! These are read-only projections of the durable rows: the store is the
//! source of truth and every mutation goes through the repositories.

pub mod batch;
pub mod job;

pub use batch::{Batch, BatchAction, BatchStatus};
pub use job::{ErrorCode, Job, JobError, JobStatus};
