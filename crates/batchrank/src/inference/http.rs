//! HTTP client for a remote analysis endpoint.

use std::time::Duration;

use serde::Serialize;

use super::{InferenceError, ResumeAnalysis, ResumeAnalyzer};

/// Longest slice of an error body kept in an error message.
const MAX_BODY_IN_ERROR: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpAnalyzerConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub model_version: String,
    pub api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    resume_url: &'a str,
    job_description: &'a str,
}

/// Blocking analyzer that POSTs `{resumeUrl, jobDescription}` and expects a
/// [`ResumeAnalysis`] JSON body back.
pub struct HttpAnalyzer {
    client: reqwest::blocking::Client,
    config: HttpAnalyzerConfig,
}

impl HttpAnalyzer {
    pub fn new(config: HttpAnalyzerConfig) -> Result<Self, InferenceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InferenceError::Other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

impl ResumeAnalyzer for HttpAnalyzer {
    fn analyze(
        &self,
        file_reference: &str,
        job_description: &str,
    ) -> Result<ResumeAnalysis, InferenceError> {
        let mut request = self.client.post(&self.config.endpoint).json(&AnalyzeRequest {
            resume_url: file_reference,
            job_description,
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let value: serde_json::Value = response.json().map_err(|e| {
            if e.is_timeout() {
                InferenceError::NetworkTimeout(e.to_string())
            } else {
                InferenceError::SchemaMismatch(e.to_string())
            }
        })?;

        ResumeAnalysis::from_json(value)
    }

    fn model_version(&self) -> &str {
        &self.config.model_version
    }
}

/// Maps a non-success HTTP status onto the error taxonomy.
///
/// Order matters: rate limiting wins over the generic server range.
pub fn classify_status(status: u16, body: &str) -> InferenceError {
    let message = format!("HTTP {}: {}", status, truncate(body));
    match status {
        429 => InferenceError::RateLimited(message),
        500..=599 => InferenceError::ServerUnavailable(message),
        408 => InferenceError::NetworkTimeout(message),
        _ => InferenceError::Other(message),
    }
}

fn classify_transport(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::NetworkTimeout(err.to_string())
    } else if err.is_connect() {
        InferenceError::ServerUnavailable(err.to_string())
    } else {
        InferenceError::Other(err.to_string())
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_IN_ERROR) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
