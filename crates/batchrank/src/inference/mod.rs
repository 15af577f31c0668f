//! Boundary to the remote resume-analysis service.
//!
//! The engine never inspects error text. Implementations of [`ResumeAnalyzer`]
//! translate whatever their transport reports into an [`InferenceError`]
//! variant, and the variant alone decides the stored error code.

pub mod analysis;
pub mod http;

use thiserror::Error;

use crate::model::ErrorCode;

pub use analysis::{
    Contact, DebugInfo, DebugSource, Education, Experience, JobResult, Links, Project,
    ResumeAnalysis, ScoreBreakdown, ScorePack, RESULT_SCHEMA_VERSION,
};
pub use http::{HttpAnalyzer, HttpAnalyzerConfig};

/// Errors reported by the analysis service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// The service asked us to slow down (HTTP 429 or equivalent).
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The service or something in front of it is unavailable (HTTP 5xx).
    #[error("Service unavailable: {0}")]
    ServerUnavailable(String),

    /// The request timed out on the wire.
    #[error("Request timed out: {0}")]
    NetworkTimeout(String),

    /// The service answered, but the payload does not match the result schema.
    #[error("Response does not match schema: {0}")]
    SchemaMismatch(String),

    /// Anything the boundary could not recognize.
    #[error("{0}")]
    Other(String),
}

impl InferenceError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            InferenceError::RateLimited(_) => ErrorCode::RateLimited,
            InferenceError::ServerUnavailable(_) => ErrorCode::ServerUnavailable,
            InferenceError::NetworkTimeout(_) => ErrorCode::NetworkTimeout,
            InferenceError::SchemaMismatch(_) => ErrorCode::SchemaMismatch,
            InferenceError::Other(_) => ErrorCode::TransientError,
        }
    }
}

/// Scores one resume against one job description.
///
/// Calls may block for as long as the remote service takes; implementations
/// are expected to enforce their own request timeout.
pub trait ResumeAnalyzer: Send + Sync {
    fn analyze(
        &self,
        file_reference: &str,
        job_description: &str,
    ) -> Result<ResumeAnalysis, InferenceError>;

    /// Model identifier recorded next to every stored result.
    fn model_version(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            InferenceError::RateLimited("429".into()).code(),
            ErrorCode::RateLimited
        );
        assert_eq!(
            InferenceError::ServerUnavailable("503".into()).code(),
            ErrorCode::ServerUnavailable
        );
        assert_eq!(
            InferenceError::NetworkTimeout("deadline".into()).code(),
            ErrorCode::NetworkTimeout
        );
        assert_eq!(
            InferenceError::SchemaMismatch("missing scores".into()).code(),
            ErrorCode::SchemaMismatch
        );
        assert_eq!(
            InferenceError::Other("boom".into()).code(),
            ErrorCode::TransientError
        );
    }

    #[test]
    fn test_display_keeps_message() {
        let err = InferenceError::Other("model returned nothing".into());
        assert_eq!(err.to_string(), "model returned nothing");
    }
}
