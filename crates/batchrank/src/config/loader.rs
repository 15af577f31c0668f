use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// One week. Longer leases leave crashed workers' jobs stuck for too long.
const MAX_LEASE_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// `~/.batchrank/config.json`, or `None` when there is no home directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".batchrank").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.workers.count == 0 {
        return Err(ConfigError::Validation {
            message: "workers.count must be at least 1".to_string(),
        });
    }

    if config.jobs.lease_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "jobs.lease_timeout_secs must be positive".to_string(),
        });
    }

    if config.jobs.lease_timeout_secs > MAX_LEASE_TIMEOUT_SECS {
        return Err(ConfigError::Validation {
            message: format!(
                "jobs.lease_timeout_secs must be at most {}: {}",
                MAX_LEASE_TIMEOUT_SECS, config.jobs.lease_timeout_secs
            ),
        });
    }

    // An analyzer call that may outlive its lease gets reaped while still running.
    if config.inference.timeout_secs >= config.jobs.lease_timeout_secs {
        log::warn!(
            "inference.timeout_secs ({}) is not below jobs.lease_timeout_secs ({}); slow calls will be reaped and retried",
            config.inference.timeout_secs,
            config.jobs.lease_timeout_secs
        );
    }

    let endpoint = &config.inference.endpoint;
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!("inference.endpoint must be an http(s) URL: {}", endpoint),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config_json = r#"
        {
            "version": "1.0",
            "inference": { "endpoint": "https://scoring.example.com/analyze" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.jobs.max_retries, 3);
        assert_eq!(config.jobs.lease_timeout_secs, 90);
        assert_eq!(config.watchdog.interval_secs, 30);
        assert_eq!(config.workers.error_backoff_ms, 1000);
        assert!(config.workers.count >= 1);
        assert_eq!(config.list_limit, 50);
        assert_eq!(config.inference.timeout_secs, 120);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/var/lib/batchrank/batchrank.db",
            "blob_directory": "/var/lib/batchrank/blobs",
            "list_limit": 20,
            "inference": {
                "endpoint": "http://localhost:8080/analyze",
                "timeout_secs": 60,
                "model_version": "scorer-2024-06",
                "api_key_env": "BATCHRANK_API_KEY"
            },
            "jobs": { "max_retries": 5, "lease_timeout_secs": 120 },
            "watchdog": { "interval_secs": 10 },
            "workers": { "count": 4, "error_backoff_ms": 250 }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.list_limit, 20);
        assert_eq!(config.jobs.max_retries, 5);
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.inference.model_version, "scorer-2024-06");
        assert_eq!(
            config.database_path().unwrap(),
            std::path::PathBuf::from("/var/lib/batchrank/batchrank.db")
        );
    }

    #[test]
    fn test_invalid_version() {
        let config_json = r#"
        {
            "version": "2.0",
            "inference": { "endpoint": "https://scoring.example.com" }
        }
        "#;

        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    fn test_missing_inference_is_schema_error() {
        let result = load_config_from_str(r#"{ "version": "1.0" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unknown_field_is_schema_error() {
        let config_json = r#"
        {
            "version": "1.0",
            "inference": { "endpoint": "https://scoring.example.com" },
            "wrokers": { "count": 2 }
        }
        "#;

        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "inference": { "endpoint": "https://scoring.example.com" },
            "workers": { "count": 0 }
        }
        "#;

        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    fn test_oversized_lease_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "inference": { "endpoint": "https://scoring.example.com" },
            "jobs": { "lease_timeout_secs": 18446744073709551615 }
        }
        "#;

        let err = load_config_from_str(config_json).unwrap_err();
        assert!(err.to_string().contains("jobs.lease_timeout_secs must be at most"));

        let week = r#"
        {
            "version": "1.0",
            "inference": { "endpoint": "https://scoring.example.com" },
            "jobs": { "lease_timeout_secs": 604800 }
        }
        "#;
        assert!(load_config_from_str(week).is_ok());
    }

    #[test]
    fn test_non_http_endpoint_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "inference": { "endpoint": "ftp://scoring.example.com" }
        }
        "#;

        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with(".batchrank/config.json"));
        }
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/definitely/not/here/batchrank.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
