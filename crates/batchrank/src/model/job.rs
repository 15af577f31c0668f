use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::JobResult;

/// Lifecycle of a job.
///
/// `pending -> running -> {complete | pending | failed}` and
/// `pending -> cancelled`. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "complete" => Some(JobStatus::Complete),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable error codes stored on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    RateLimited,
    ServerUnavailable,
    NetworkTimeout,
    SchemaMismatch,
    TransientError,
    /// Lease expired, job requeued by the watchdog.
    TimeoutWatchdog,
    /// Lease expired with no retries left.
    TimeoutFinal,
    /// Retry budget exhausted in the worker loop.
    PermanentFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "transient.rate_limited",
            ErrorCode::ServerUnavailable => "transient.server_unavailable",
            ErrorCode::NetworkTimeout => "transient.network_timeout",
            ErrorCode::SchemaMismatch => "permanent.schema_mismatch",
            ErrorCode::TransientError => "transient_error",
            ErrorCode::TimeoutWatchdog => "timeout_watchdog",
            ErrorCode::TimeoutFinal => "timeout_final",
            ErrorCode::PermanentFailure => "permanent_failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient.rate_limited" => Some(ErrorCode::RateLimited),
            "transient.server_unavailable" => Some(ErrorCode::ServerUnavailable),
            "transient.network_timeout" => Some(ErrorCode::NetworkTimeout),
            "permanent.schema_mismatch" => Some(ErrorCode::SchemaMismatch),
            "transient_error" => Some(ErrorCode::TransientError),
            "timeout_watchdog" => Some(ErrorCode::TimeoutWatchdog),
            "timeout_final" => Some(ErrorCode::TimeoutFinal),
            "permanent_failure" => Some(ErrorCode::PermanentFailure),
            _ => None,
        }
    }

    /// Permanent codes are exactly the `permanent.*` family.
    pub fn is_permanent(&self) -> bool {
        self.as_str().starts_with("permanent.")
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ErrorCode::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code '{}'", s)))
    }
}

/// Last error recorded on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// One resume file within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub batch_id: String,
    pub filename: String,
    /// Blob reference handed to the analyzer.
    pub file_ref: String,
    pub fingerprint: Option<String>,
    pub status: JobStatus,
    /// Set iff `status == Running`.
    pub start_time: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    /// Set iff `status == Running`.
    pub worker_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Set iff `status == Complete`.
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
}
