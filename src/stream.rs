// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Push-based run tracking over server-sent events.
//!
//! [`subscribe`] opens a run's event stream and merges each message into
//! the registry under a caller-chosen label. It stops as soon as a terminal
//! status is observed, without waiting for the server to close.
//!
//! Any transport problem ends the subscription with
//! [`StreamOutcome::Interrupted`]. Callers that still need the result must
//! fall back to polling; [`AutomationClient::watch_run`] does this.
//!
//! [`AutomationClient::watch_run`]: crate::client::AutomationClient::watch_run

use std::time::Duration;

use futures_util::StreamExt;

#[cfg(feature = "telemetry")]
use tracing::{debug, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::client::{RunBackend, DEFAULT_STREAM_PATH};
use crate::error::RunError;
use crate::registry::RunRegistry;
use crate::types::RunRecord;

/// Streaming settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Use the stream before polling in `watch_run`.
    pub enabled: bool,
    /// Path of the event stream, with a `{run_id}` placeholder.
    pub path_template: String,
    /// Give up on a silent stream after this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path_template: DEFAULT_STREAM_PATH.to_string(),
            idle_timeout: None,
        }
    }
}

/// How a subscription ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// A terminal status arrived. Holds the merged record.
    Terminal(RunRecord),
    /// The stream ended early. `last` is the last merged record, if any.
    Interrupted {
        reason: String,
        last: Option<RunRecord>,
    },
}

impl StreamOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    fn interrupted(reason: impl Into<String>, registry: &RunRegistry, label: &str) -> Self {
        Self::Interrupted {
            reason: reason.into(),
            last: registry.get(label),
        }
    }
}

/// Follow `run_id`'s event stream until a terminal status or an interruption.
#[cfg_attr(feature = "telemetry", tracing::instrument(skip(backend, registry, config)))]
pub async fn subscribe(
    backend: &dyn RunBackend,
    registry: &RunRegistry,
    run_id: &str,
    label: &str,
    config: &StreamConfig,
) -> StreamOutcome {
    let mut events = match backend.open_stream(run_id).await {
        Ok(events) => events,
        Err(e) => {
            #[cfg(feature = "telemetry")]
            warn!(error = %e, "Could not open run event stream");
            return StreamOutcome::interrupted(e.to_string(), registry, label);
        }
    };

    loop {
        let next = match config.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, events.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return StreamOutcome::interrupted(
                        format!("no event for {}ms", idle.as_millis()),
                        registry,
                        label,
                    );
                }
            },
            None => events.next().await,
        };

        match next {
            Some(Ok(update)) => {
                #[cfg(feature = "telemetry")]
                {
                    debug!(status = ?update.status, "Stream event");
                    GLOBAL_METRICS.record_stream_event();
                }

                registry.merge_update(label, run_id, update);
                if let Some(record) = registry.get(label) {
                    if record.run_id == run_id && record.is_terminal() {
                        // Dropping `events` closes the connection.
                        return StreamOutcome::Terminal(record);
                    }
                }
            }
            Some(Err(RunError::Parse(message))) => {
                #[cfg(feature = "telemetry")]
                warn!(%message, "Skipping malformed stream event");
                #[cfg(not(feature = "telemetry"))]
                let _ = message;
            }
            Some(Err(e)) => {
                #[cfg(feature = "telemetry")]
                warn!(error = %e, "Run event stream failed");
                return StreamOutcome::interrupted(e.to_string(), registry, label);
            }
            None => {
                return StreamOutcome::interrupted(
                    "stream closed before a terminal status",
                    registry,
                    label,
                );
            }
        }
    }
}
