// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Run polling with bounded exponential backoff.
//!
//! [`poll_run`] fetches a run until it reaches a terminal state or the
//! wall-clock budget runs out. The delay between fetches starts at
//! `interval` and grows by `backoff_factor` up to `max_interval`:
//!
//! ```text
//! 1500ms, 2100ms, 2940ms, 4116ms, 5762ms, 6000ms, 6000ms, ...
//! ```
//!
//! Transport failures during a fetch are retried within the same budget.
//! A `failed` status is authoritative and ends the loop immediately.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

#[cfg(feature = "telemetry")]
use tracing::{debug, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::client::RunBackend;
use crate::error::RunError;
use crate::registry::RunRegistry;
use crate::types::{RunOutcome, RunRecord, RunStatus};

/// Default delay before the second fetch.
pub const DEFAULT_INTERVAL_MS: u64 = 1500;

/// Default ceiling for the delay between fetches.
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 6000;

/// Default multiplier applied to the delay after each fetch.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.4;

/// Default wall-clock budget for a poll.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Polling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            max_interval: Duration::from_millis(DEFAULT_MAX_INTERVAL_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl PollConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Delay sequence for one poll.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.interval, self.max_interval, self.backoff_factor)
    }
}

/// Infinite iterator over backoff delays, with millisecond resolution.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    factor: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            next: initial.min(max),
            max,
            factor,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = (current.as_millis() as f64 * self.factor).round() as u64;
        self.next = Duration::from_millis(grown).min(self.max);
        Some(current)
    }
}

/// Callback invoked with every fetched record.
pub type StatusCallback = Arc<dyn Fn(&RunRecord) + Send + Sync>;

/// Per-call options for [`poll_run`].
#[derive(Clone, Default)]
pub struct PollOptions {
    /// Flipping the value to `true` stops the poll with [`RunError::Cancelled`].
    pub cancel: Option<watch::Receiver<bool>>,
    /// Observer for progress displays.
    pub on_status: Option<StatusCallback>,
}

impl PollOptions {
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn on_status(mut self, callback: impl Fn(&RunRecord) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Arc::new(callback));
        self
    }
}

/// Poll `run_id` until it succeeds, fails, or the budget runs out.
///
/// Every fetched record is written to `registry` under the run id. Returns
/// `detail.result` (or `null`) on success.
#[cfg_attr(feature = "telemetry", tracing::instrument(skip(backend, registry, config, options), fields(timeout_ms = config.timeout.as_millis() as u64)))]
pub async fn poll_run(
    backend: &dyn RunBackend,
    registry: &RunRegistry,
    run_id: &str,
    config: &PollConfig,
    options: PollOptions,
) -> Result<Value, RunError> {
    let PollOptions {
        mut cancel,
        on_status,
    } = options;
    let start = Instant::now();
    let mut backoff = config.backoff();
    let mut last_status: Option<RunStatus> = None;
    #[cfg(feature = "telemetry")]
    let mut attempt: u32 = 0;

    loop {
        if let Some(rx) = cancel.as_ref() {
            if *rx.borrow() {
                return Err(RunError::Cancelled);
            }
        }

        #[cfg(feature = "telemetry")]
        {
            attempt += 1;
        }
        match backend.get_run(run_id).await {
            Ok(record) => {
                #[cfg(feature = "telemetry")]
                debug!(attempt, status = %record.status, "Polled run");

                match last_status {
                    Some(prev) if !prev.can_advance_to(record.status) => {
                        // Keep the last forward state; the registry rejects it too.
                        #[cfg(feature = "telemetry")]
                        warn!(from = %prev, to = %record.status, "Ignoring status regression");
                    }
                    _ => last_status = Some(record.status),
                }

                registry.upsert(run_id, record.clone());
                if let Some(ref cb) = on_status {
                    cb(&record);
                }

                match record.outcome() {
                    RunOutcome::Succeeded(result) => {
                        #[cfg(feature = "telemetry")]
                        GLOBAL_METRICS.record_run_finished(RunStatus::Succeeded, start.elapsed());
                        return Ok(result);
                    }
                    RunOutcome::Failed(message) => {
                        #[cfg(feature = "telemetry")]
                        GLOBAL_METRICS.record_run_finished(RunStatus::Failed, start.elapsed());
                        return Err(RunError::RunFailed(message));
                    }
                    RunOutcome::Pending(_) => {}
                }
            }
            Err(e) if e.is_retryable() => {
                #[cfg(feature = "telemetry")]
                warn!(attempt, error = %e, "Transient error while polling, retrying");
            }
            Err(e) => return Err(e),
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            #[cfg(feature = "telemetry")]
            {
                warn!(attempt, elapsed_ms = elapsed.as_millis() as u64, "Timeout waiting for run");
                GLOBAL_METRICS.record_timeout();
            }
            return Err(RunError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        let delay = backoff.next().unwrap_or(config.max_interval);
        #[cfg(feature = "telemetry")]
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before next poll");
        let Some(wake_at) = Instant::now().checked_add(delay) else {
            // A wait the clock cannot represent never ends within the budget.
            return Err(RunError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        };
        match cancel.as_mut() {
            Some(rx) => loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake_at) => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            // A dropped sender can never cancel; finish the wait.
                            tokio::time::sleep_until(wake_at).await;
                            break;
                        }
                        if *rx.borrow() {
                            return Err(RunError::Cancelled);
                        }
                    }
                }
            },
            None => tokio::time::sleep_until(wake_at).await,
        }
    }
}

/// Resolves once `cancel` holds `true`. A dropped sender never cancels.
pub(crate) async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RunEventStream;
    use crate::types::{AutomationRequest, SubmitResponse};
    use async_trait::async_trait;

    /// Backend whose run never leaves `running`.
    struct StuckBackend;

    #[async_trait]
    impl RunBackend for StuckBackend {
        async fn submit(&self, _request: &AutomationRequest) -> Result<SubmitResponse, RunError> {
            Err(RunError::api(405, "read-only"))
        }

        async fn get_run(&self, run_id: &str) -> Result<RunRecord, RunError> {
            Ok(RunRecord {
                run_id: run_id.to_string(),
                status: RunStatus::Running,
                detail: None,
                correlation_id: None,
                created_at: None,
                meta: None,
            })
        }

        async fn recent_runs(&self, _limit: usize) -> Result<Vec<RunRecord>, RunError> {
            Ok(Vec::new())
        }

        async fn open_stream(&self, _run_id: &str) -> Result<RunEventStream, RunError> {
            Err(RunError::Transport("no stream".to_string()))
        }

        fn base_url(&self) -> &str {
            "http://localhost:8000"
        }
    }

    fn ms(d: Duration) -> u128 {
        d.as_millis()
    }

    #[test]
    fn test_default_config() {
        let config = PollConfig::default();
        assert_eq!(config.interval, Duration::from_millis(1500));
        assert_eq!(config.max_interval, Duration::from_millis(6000));
        assert_eq!(config.backoff_factor, 1.4);
        assert_eq!(config.timeout, Duration::from_millis(120_000));
    }

    #[test]
    fn test_backoff_sequence() {
        let delays: Vec<u128> = PollConfig::default().backoff().take(8).map(ms).collect();
        assert_eq!(delays, vec![1500, 2100, 2940, 4116, 5762, 6000, 6000, 6000]);
    }

    #[test]
    fn test_backoff_never_exceeds_max() {
        let config = PollConfig::default();
        assert!(config.backoff().take(100).all(|d| d <= config.max_interval));
    }

    #[test]
    fn test_backoff_initial_above_max_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(2), 2.0);
        assert_eq!(backoff.next(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_backoff_factor_one_is_constant() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 1.0);
        assert!(backoff.take(5).all(|d| d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_unrepresentable_delay_times_out() {
        let config = PollConfig {
            interval: Duration::MAX,
            max_interval: Duration::MAX,
            backoff_factor: 2.0,
            timeout: Duration::from_secs(1),
        };
        let registry = RunRegistry::new();

        let err = poll_run(&StuckBackend, &registry, "r1", &config, PollOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(registry.get("r1").unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_true() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(cancelled(rx));
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_ignores_dropped_sender() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let result = tokio::time::timeout(Duration::from_secs(60), cancelled(rx)).await;
        assert!(result.is_err());
    }
}
