// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry, tracing, and metrics infrastructure.
//!
//! - **Tracing**: structured logging through `tracing`, installed with
//!   [`init_telemetry`]
//! - **Metrics**: request latency and run outcome counters in [`GLOBAL_METRICS`]
//! - **Correlation IDs**: grouping chained submissions
//!
//! ```rust,ignore
//! use runtrack::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Public async entry points carry `#[instrument]` when the `telemetry`
//! feature is enabled. Record run ids, intents and delays as fields; never
//! payload contents.

mod correlation;
mod init;
pub mod metrics;

pub use correlation::CorrelationId;
pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    CounterSnapshot, Histogram, Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS,
};
