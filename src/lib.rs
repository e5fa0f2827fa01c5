// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtrack - client for long-running automation runs.
//!
//! Submits intent requests to an automation backend, then follows each run
//! to a terminal state over a server-sent event stream, or by polling with
//! exponential backoff when streaming is unavailable.
//!
//! # Architecture
//!
//! - [`types`] - Requests, run records, statuses and typed intent results
//! - [`error`] - Error types and result aliases
//! - [`config`] - Configuration loading and merging
//! - [`client`] - The [`RunBackend`] seam, the HTTP backend and [`AutomationClient`]
//! - [`poller`] - Backoff polling until a run is terminal
//! - [`stream`] - Event stream subscription with polling fallback
//! - [`registry`] - Shared run-state registry with change notifications
//! - [`idempotency`] - Idempotency key generation
//! - [`debug`] - `curl` reproductions of submissions
//! - [`telemetry`] - Tracing, metrics, and correlation IDs
//!
//! # Example
//!
//! ```rust,ignore
//! use runtrack::config::{load_config, CliOptions};
//! use runtrack::{AutomationClient, AutomationRequest};
//! use serde_json::json;
//!
//! let config = load_config(Path::new("."), CliOptions::default())?;
//! let client = AutomationClient::from_config(&config)?;
//! let result = client
//!     .submit_and_wait(AutomationRequest::new("ideation.generate", json!({"topic": "x"})))
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod debug;
pub mod error;
pub mod idempotency;
pub mod poller;
pub mod registry;
pub mod stream;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use client::{AutomationClient, HttpBackend, RunBackend, RunEventStream, SharedBackend};
pub use error::{ConfigError, Result, RunError};
pub use idempotency::{IdempotencyKeyGenerator, KeyStrategy};
pub use poller::{PollConfig, PollOptions};
pub use registry::{Applied, RegistryEvent, RunRegistry};
pub use stream::{StreamConfig, StreamOutcome};
pub use types::{
    AutomationRequest, IntentResult, RunDetail, RunOutcome, RunRecord, RunStatus, RunUpdate,
    SubmitResponse,
};

/// Runtrack version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
