// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the on-disk configuration (all fields optional, JSON or YAML)
//! and the fully resolved configuration handed to the client.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_STREAM_PATH};
use crate::error::ConfigError;
use crate::idempotency::{IdempotencyKeyGenerator, KeyStrategy, DEFAULT_PREFIX};
use crate::poller::PollConfig;
use crate::stream::StreamConfig;

/// Default backend address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Upper bound for any configured duration (one day).
pub const MAX_DURATION_MS: u64 = 86_400_000;

/// Configuration as written in a config file.
/// Can be defined in .runtrack.json or .runtrack/config.json in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Backend base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Timeout for a single request/response call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Polling settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollSettings>,

    /// Event stream settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamSettings>,

    /// Idempotency key settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency: Option<IdempotencySettings>,

    /// Extra headers sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// Polling settings in a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Event stream settings in a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Stream path with a `{run_id}` placeholder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
}

/// Idempotency key settings in a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<KeyStrategy>,
}

/// Fully resolved configuration with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub poll: PollConfig,
    pub stream: StreamConfig,
    pub key_prefix: String,
    pub key_strategy: KeyStrategy,
    pub headers: HashMap<String, String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            poll: PollConfig::default(),
            stream: StreamConfig {
                path_template: DEFAULT_STREAM_PATH.to_string(),
                ..Default::default()
            },
            key_prefix: DEFAULT_PREFIX.to_string(),
            key_strategy: KeyStrategy::default(),
            headers: HashMap::new(),
        }
    }
}

impl ResolvedConfig {
    /// Key generator described by this configuration.
    pub fn key_generator(&self) -> IdempotencyKeyGenerator {
        IdempotencyKeyGenerator::new(self.key_prefix.clone(), self.key_strategy)
    }

    /// Reject values that would break polling or request building.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "baseUrl",
                format!("must start with http:// or https://, got {:?}", self.base_url),
            ));
        }
        if self.poll.interval.is_zero() {
            return Err(ConfigError::invalid("poll.intervalMs", "must be greater than 0"));
        }
        if self.poll.max_interval < self.poll.interval {
            return Err(ConfigError::invalid(
                "poll.maxIntervalMs",
                "must not be smaller than poll.intervalMs",
            ));
        }
        if !self.poll.backoff_factor.is_finite() || self.poll.backoff_factor < 1.0 {
            return Err(ConfigError::invalid("poll.backoffFactor", "must be at least 1.0"));
        }
        if self.poll.timeout.is_zero() {
            return Err(ConfigError::invalid("poll.timeoutMs", "must be greater than 0"));
        }
        let max = Duration::from_millis(MAX_DURATION_MS);
        let bounded = [
            ("requestTimeoutMs", self.request_timeout),
            ("poll.intervalMs", self.poll.interval),
            ("poll.maxIntervalMs", self.poll.max_interval),
            ("poll.timeoutMs", self.poll.timeout),
            ("stream.idleTimeoutMs", self.stream.idle_timeout.unwrap_or_default()),
        ];
        for (field, value) in bounded {
            if value > max {
                return Err(ConfigError::invalid(
                    field,
                    format!("must not exceed {}ms", MAX_DURATION_MS),
                ));
            }
        }
        if !self.stream.path_template.contains("{run_id}") {
            return Err(ConfigError::invalid(
                "stream.pathTemplate",
                "must contain a {run_id} placeholder",
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::invalid("idempotency.prefix", "must not be empty"));
        }
        Ok(())
    }
}
