// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the run client.
//!
//! This module provides strongly-typed errors for the protocol layer and for
//! configuration loading, using `thiserror` for definitions and `anyhow` for
//! propagation at the binary edge.

use thiserror::Error;

/// Errors that can occur while submitting, polling, or streaming a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Submit failed with HTTP {status}: {body}")]
    Submission { status: u16, body: String },

    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// The server reported the run as failed. Carries `detail.error`.
    #[error("{0}")]
    RunFailed(String),

    #[error("Timeout waiting for run after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Response parsing error: {0}")]
    Parse(String),

    #[error("Cancelled while waiting for run")]
    Cancelled,
}

impl RunError {
    /// Create a submission error from a status code and body text.
    pub fn submission(status: u16, body: impl Into<String>) -> Self {
        Self::Submission {
            status,
            body: body.into(),
        }
    }

    /// Create an API error from a status code and body text.
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Check if this error is worth retrying within a polling budget.
    ///
    /// Only transport failures qualify. An explicit `failed` status is
    /// authoritative and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this error is the poll timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout { .. } => "Still processing, check back later".to_string(),
            Self::RunFailed(message) => message.clone(),
            Self::Submission { body, .. } if !body.is_empty() => {
                format!("Could not start run: {}", body)
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for RunError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RunError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_error_retryable() {
        assert!(RunError::Transport("connection reset".to_string()).is_retryable());
        assert!(!RunError::RunFailed("boom".to_string()).is_retryable());
        assert!(!RunError::Timeout { elapsed_ms: 5000 }.is_retryable());
        assert!(!RunError::submission(500, "oops").is_retryable());
        assert!(!RunError::api(404, "not found").is_retryable());
    }

    #[test]
    fn test_run_failed_display_is_detail_error() {
        let err = RunError::RunFailed("invalid idea".to_string());
        assert_eq!(err.to_string(), "invalid idea");
    }

    #[test]
    fn test_timeout_display() {
        let err = RunError::Timeout { elapsed_ms: 5100 };
        assert!(err.to_string().starts_with("Timeout waiting for run"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_submission_carries_body() {
        let err = RunError::submission(422, r#"{"detail":"unknown intent"}"#);
        match &err {
            RunError::Submission { status, body } => {
                assert_eq!(*status, 422);
                assert!(body.contains("unknown intent"));
            }
            _ => panic!("Expected Submission"),
        }
        assert!(err.to_string().contains("422"));
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            RunError::Timeout { elapsed_ms: 1 }.user_message(),
            "Still processing, check back later"
        );
        assert_eq!(
            RunError::RunFailed("invalid idea".to_string()).user_message(),
            "invalid idea"
        );
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let config_err: ConfigError = result.unwrap_err().into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
