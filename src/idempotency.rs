// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Idempotency key generation.
//!
//! Keys are a best-effort deduplication hint consumed by the backend. They
//! combine a prefix, the intent name and a time component:
//!
//! - [`KeyStrategy::Timestamp`]: `ui-{intent}-{unix_ms}`. Two identical
//!   submissions in the same millisecond produce the same key, which lets the
//!   backend collapse double-clicks.
//! - [`KeyStrategy::Monotonic`]: `ui-{intent}-{unix_ms}-{seq}`. Never repeats
//!   within a process.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Prefix used for keys generated on behalf of interactive callers.
pub const DEFAULT_PREFIX: &str = "ui";

/// Prefix used by the curl debug helper.
pub const DEBUG_PREFIX: &str = "debug";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// How the time component of a key is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    #[default]
    Timestamp,
    Monotonic,
}

impl std::str::FromStr for KeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "timestamp" | "time" => Ok(Self::Timestamp),
            "monotonic" | "sequence" => Ok(Self::Monotonic),
            other => Err(format!("unknown key strategy: {}", other)),
        }
    }
}

/// Produces idempotency keys for submissions.
#[derive(Debug, Clone)]
pub struct IdempotencyKeyGenerator {
    prefix: String,
    strategy: KeyStrategy,
}

impl Default for IdempotencyKeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, KeyStrategy::default())
    }
}

impl IdempotencyKeyGenerator {
    pub fn new(prefix: impl Into<String>, strategy: KeyStrategy) -> Self {
        Self {
            prefix: prefix.into(),
            strategy,
        }
    }

    /// Generator for debug reproductions (`debug-{intent}-{ms}`).
    pub fn debug() -> Self {
        Self::new(DEBUG_PREFIX, KeyStrategy::Timestamp)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    /// Generate a key for `intent` at the current time.
    pub fn generate(&self, intent: &str) -> String {
        self.generate_at(intent, Utc::now().timestamp_millis())
    }

    /// Generate a key for `intent` with an explicit millisecond timestamp.
    pub fn generate_at(&self, intent: &str, unix_ms: i64) -> String {
        match self.strategy {
            KeyStrategy::Timestamp => format!("{}-{}-{}", self.prefix, intent, unix_ms),
            KeyStrategy::Monotonic => {
                let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
                format!("{}-{}-{}-{}", self.prefix, intent, unix_ms, seq)
            }
        }
    }
}
