//! Retry-versus-fail policy for failed attempts.

use crate::inference::InferenceError;
use crate::model::{ErrorCode, JobError};

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `pending` with one more retry spent.
    Requeue(JobError),
    /// Terminal `failed`.
    Fail(JobError),
}

impl RetryDecision {
    pub fn error(&self) -> &JobError {
        match self {
            RetryDecision::Requeue(e) | RetryDecision::Fail(e) => e,
        }
    }
}

/// Decision after an analyzer error.
///
/// Permanent codes fail immediately and keep their own code. Transient codes
/// requeue until the budget is spent, then fail as `permanent_failure` with
/// the last error kept in the message.
pub fn decide(error: &InferenceError, retry_count: u32, max_retries: u32) -> RetryDecision {
    let code = error.code();
    let message = error.to_string();

    if code.is_permanent() {
        return RetryDecision::Fail(JobError::new(code, message));
    }
    if retry_count >= max_retries {
        return RetryDecision::Fail(JobError::new(
            ErrorCode::PermanentFailure,
            format!(
                "Gave up after {} retries; last error {}: {}",
                retry_count, code, message
            ),
        ));
    }
    RetryDecision::Requeue(JobError::new(code, message))
}

/// Decision after a lease expired.
pub fn decide_timeout(retry_count: u32, max_retries: u32, lease_secs: u64) -> RetryDecision {
    if retry_count >= max_retries {
        RetryDecision::Fail(JobError::new(
            ErrorCode::TimeoutFinal,
            format!(
                "Lease of {}s expired with no retries left ({}/{})",
                lease_secs, retry_count, max_retries
            ),
        ))
    } else {
        RetryDecision::Requeue(JobError::new(
            ErrorCode::TimeoutWatchdog,
            format!("Lease of {}s expired; requeued", lease_secs),
        ))
    }
}
