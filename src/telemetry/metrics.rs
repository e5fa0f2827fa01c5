// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for run tracking.
//!
//! Provides lightweight in-process metrics without external dependencies:
//! per-operation request latency, run completion times, and counters for
//! submissions, outcomes, timeouts and stream fallbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::types::RunStatus;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Request latency by operation name.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Time from first poll to terminal status, by outcome.
    completions: RwLock<HashMap<RunStatus, OperationMetrics>>,

    counters: RunCounters,

    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            completions: RwLock::new(HashMap::new()),
            counters: RunCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record a request/response call.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string())
            .or_insert_with(OperationMetrics::new)
            .record(duration);
    }

    pub fn record_submission(&self) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run reaching a terminal status after `waited`.
    pub fn record_run_finished(&self, status: RunStatus, waited: Duration) {
        match status {
            RunStatus::Succeeded => self.counters.succeeded.fetch_add(1, Ordering::Relaxed),
            RunStatus::Failed => self.counters.failed.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };
        let mut completions = self.completions.write().unwrap_or_else(PoisonError::into_inner);
        completions
            .entry(status)
            .or_insert_with(OperationMetrics::for_runs)
            .record(waited);
    }

    pub fn record_timeout(&self) {
        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_event(&self) {
        self.counters.stream_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_fallback(&self) {
        self.counters.stream_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            completions: self
                .completions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            counters: self.counters.load(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.completions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.counters.reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    stream_events: AtomicU64,
    stream_fallbacks: AtomicU64,
}

impl RunCounters {
    fn load(&self) -> CounterSnapshot {
        CounterSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            stream_events: self.stream_events.load(Ordering::Relaxed),
            stream_fallbacks: self.stream_fallbacks.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.submitted,
            &self.succeeded,
            &self.failed,
            &self.timed_out,
            &self.stream_events,
            &self.stream_fallbacks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub stream_events: u64,
    pub stream_fallbacks: u64,
}

/// Generic operation metrics with histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    /// Number of operations.
    pub count: u64,

    /// Total duration.
    pub total_duration: Duration,

    /// Minimum duration.
    pub min_duration: Duration,

    /// Maximum duration.
    pub max_duration: Duration,

    /// Histogram buckets for latency distribution.
    pub histogram: Histogram,
}

impl OperationMetrics {
    /// Metrics with request-latency buckets.
    pub fn new() -> Self {
        Self::with_histogram(Histogram::default())
    }

    /// Metrics with buckets sized for whole-run wait times.
    pub fn for_runs() -> Self {
        Self::with_histogram(Histogram::for_runs())
    }

    fn with_histogram(histogram: Histogram) -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram,
        }
    }

    /// Record an operation.
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple histogram with fixed buckets for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in microseconds.
    buckets: Vec<u64>,

    /// Count per bucket, plus one overflow bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    /// Buckets for run wait times: 1s, 5s, 15s, 30s, 60s, 120s.
    pub fn for_runs() -> Self {
        Self::with_buckets(vec![
            1_000_000,
            5_000_000,
            15_000_000,
            30_000_000,
            60_000_000,
            120_000_000,
        ])
    }

    /// Record a duration value.
    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    /// Get counts for each bucket.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Calculate approximate percentile (p50, p90, p99, etc.).
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                // Overflow bucket reports 10x the last boundary
                let micros = if i < self.buckets.len() {
                    self.buckets[i]
                } else {
                    self.buckets.last().copied().unwrap_or(0) * 10
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 1ms, 10ms, 100ms, 1s, 10s
        Self::with_buckets(vec![1_000, 10_000, 100_000, 1_000_000, 10_000_000])
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub operations: HashMap<String, OperationMetrics>,
    pub completions: HashMap<RunStatus, OperationMetrics>,
    pub counters: CounterSnapshot,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Run Metrics ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Runs: {} submitted, {} succeeded, {} failed, {} timed out\n",
            self.counters.submitted,
            self.counters.succeeded,
            self.counters.failed,
            self.counters.timed_out
        ));
        report.push_str(&format!(
            "Stream: {} events, {} fallbacks to polling\n\n",
            self.counters.stream_events, self.counters.stream_fallbacks
        ));

        if !self.operations.is_empty() {
            report.push_str("Requests:\n");
            let mut names: Vec<_> = self.operations.keys().collect();
            names.sort();
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} calls, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        for (status, metrics) in &self.completions {
            report.push_str(&format!(
                "Wait until {}: {} runs, avg {:.2?}, p50 {:.2?}\n",
                status,
                metrics.count,
                metrics.avg_duration(),
                metrics.histogram.p50()
            ));
        }

        report
    }
}
