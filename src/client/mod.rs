// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Automation run client.
//!
//! [`RunBackend`] is the seam between the protocol logic and the transport.
//! [`HttpBackend`] talks to a real server; tests plug in scripted backends.
//!
//! [`AutomationClient`] ties a backend to an injected [`RunRegistry`], an
//! idempotency key generator, and polling/streaming settings:
//!
//! ```rust,ignore
//! use runtrack::client::AutomationClient;
//! use runtrack::types::AutomationRequest;
//! use serde_json::json;
//!
//! let client = AutomationClient::from_config(&config)?;
//! let request = AutomationRequest::new("research.validate_idea", json!({"idea": {"title": "X"}}));
//! let submitted = client.submit(request).await?;
//! let result = client.watch_run(&submitted.run_id, None).await?;
//! ```

pub mod http;

pub use http::{HttpBackend, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_STREAM_PATH};

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

#[cfg(feature = "telemetry")]
use std::time::Instant;
#[cfg(feature = "telemetry")]
use tracing::{info, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::config::ResolvedConfig;
use crate::debug::curl_command;
use crate::error::RunError;
use crate::idempotency::IdempotencyKeyGenerator;
use crate::poller::{cancelled, poll_run, PollConfig, PollOptions};
use crate::registry::RunRegistry;
use crate::stream::{subscribe, StreamConfig, StreamOutcome};
use crate::types::{AutomationRequest, RunOutcome, RunRecord, RunUpdate, SubmitResponse};

/// Stream of run updates from the server. Items are parse or transport errors
/// for individual messages.
pub type RunEventStream = BoxStream<'static, Result<RunUpdate, RunError>>;

/// Transport for the automation endpoints.
#[async_trait]
pub trait RunBackend: Send + Sync {
    /// `POST /automation/submit`. The request already carries its key.
    async fn submit(&self, request: &AutomationRequest) -> Result<SubmitResponse, RunError>;

    /// `GET /automation/runs/{run_id}`.
    async fn get_run(&self, run_id: &str) -> Result<RunRecord, RunError>;

    /// `GET /automation/recent?limit=N`, most recent first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, RunError>;

    /// Open the per-run event stream.
    async fn open_stream(&self, run_id: &str) -> Result<RunEventStream, RunError>;

    /// Base URL used for debug reproductions.
    fn base_url(&self) -> &str;
}

/// Shared, thread-safe backend.
pub type SharedBackend = Arc<dyn RunBackend>;

/// High-level client for submitting and tracking runs.
#[derive(Clone)]
pub struct AutomationClient {
    backend: SharedBackend,
    registry: RunRegistry,
    keys: IdempotencyKeyGenerator,
    poll: PollConfig,
    stream: StreamConfig,
}

impl AutomationClient {
    pub fn new(backend: SharedBackend, registry: RunRegistry) -> Self {
        Self {
            backend,
            registry,
            keys: IdempotencyKeyGenerator::default(),
            poll: PollConfig::default(),
            stream: StreamConfig::default(),
        }
    }

    /// Build an HTTP-backed client with a fresh registry.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, RunError> {
        let backend = HttpBackend::from_config(config)?;
        Ok(Self::new(Arc::new(backend), RunRegistry::new())
            .with_key_generator(config.key_generator())
            .with_poll_config(config.poll.clone())
            .with_stream_config(config.stream.clone()))
    }

    pub fn with_key_generator(mut self, keys: IdempotencyKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    /// Submit a request and register the new run.
    ///
    /// Generates an idempotency key when the caller did not supply one.
    /// Never retries: a non-2xx response surfaces as [`RunError::Submission`].
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self, request), fields(intent = %request.intent)))]
    pub async fn submit(&self, request: AutomationRequest) -> Result<SubmitResponse, RunError> {
        let request = self.prepare(request)?;

        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let response = self.backend.submit(&request).await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("submit", start.elapsed());

        let response = response?;

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_submission();
            info!(run_id = %response.run_id, status = %response.status, "Run submitted");
        }

        self.registry
            .upsert(&response.run_id, RunRecord::submitted(&response, &request));
        Ok(response)
    }

    /// Fetch a run once and record it.
    pub async fn get_run(&self, run_id: &str) -> Result<RunRecord, RunError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let record = self.backend.get_run(run_id).await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("get_run", start.elapsed());

        let record = record?;
        self.registry.upsert(run_id, record.clone());
        Ok(record)
    }

    /// Most recent runs, newest first. Not written to the registry.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, RunError> {
        self.backend.recent_runs(limit).await
    }

    /// Poll until terminal using the configured budget.
    pub async fn poll_run(&self, run_id: &str) -> Result<Value, RunError> {
        self.poll_run_with(run_id, PollOptions::default()).await
    }

    /// Poll with cancellation and/or a progress observer.
    pub async fn poll_run_with(
        &self,
        run_id: &str,
        options: PollOptions,
    ) -> Result<Value, RunError> {
        poll_run(
            self.backend.as_ref(),
            &self.registry,
            run_id,
            &self.poll,
            options,
        )
        .await
    }

    /// Subscribe to the run's event stream, updating the registry under
    /// `label` (the run id when `None`).
    pub async fn subscribe(&self, run_id: &str, label: Option<&str>) -> StreamOutcome {
        subscribe(
            self.backend.as_ref(),
            &self.registry,
            run_id,
            label.unwrap_or(run_id),
            &self.stream,
        )
        .await
    }

    /// Wait for a run to finish: stream first, poll if the stream breaks.
    pub async fn watch_run(&self, run_id: &str, label: Option<&str>) -> Result<Value, RunError> {
        self.watch_run_with(run_id, label, PollOptions::default())
            .await
    }

    /// [`watch_run`](Self::watch_run) with cancellation and a progress
    /// observer. `options.cancel` stops both the stream and the fallback;
    /// `options.on_status` only sees polled records.
    ///
    /// The stream and the fallback share one budget of `poll.timeout`: a
    /// stream that outlives it is abandoned, and polling after an
    /// interruption only gets what is left.
    pub async fn watch_run_with(
        &self,
        run_id: &str,
        label: Option<&str>,
        options: PollOptions,
    ) -> Result<Value, RunError> {
        if !self.stream.enabled {
            return self.poll_run_with(run_id, options).await;
        }

        let start = tokio::time::Instant::now();
        let stream = tokio::time::timeout(self.poll.timeout, self.subscribe(run_id, label));
        let outcome = match options.cancel.clone() {
            Some(cancel) => tokio::select! {
                outcome = stream => outcome,
                _ = cancelled(cancel) => {
                    #[cfg(feature = "telemetry")]
                    info!(run_id, "Watch cancelled while streaming");
                    return Err(RunError::Cancelled);
                }
            },
            None => stream.await,
        }
        .unwrap_or_else(|_| StreamOutcome::Interrupted {
            reason: "stream outlived the wait budget".to_string(),
            last: None,
        });

        match outcome {
            StreamOutcome::Terminal(record) => match record.outcome() {
                RunOutcome::Succeeded(result) => return Ok(result),
                RunOutcome::Failed(message) => return Err(RunError::RunFailed(message)),
                // Terminal outcomes are never pending.
                RunOutcome::Pending(_) => {}
            },
            StreamOutcome::Interrupted { reason, .. } => {
                #[cfg(feature = "telemetry")]
                {
                    warn!(run_id, %reason, "Stream interrupted, falling back to polling");
                    GLOBAL_METRICS.record_stream_fallback();
                }
                #[cfg(not(feature = "telemetry"))]
                let _ = reason;
            }
        }

        let remaining = self.poll.timeout.saturating_sub(start.elapsed());
        let config = self.poll.clone().with_timeout(remaining);
        poll_run(self.backend.as_ref(), &self.registry, run_id, &config, options).await
    }

    /// Submit and wait for the result.
    pub async fn submit_and_wait(&self, request: AutomationRequest) -> Result<Value, RunError> {
        let submitted = self.submit(request).await?;
        self.watch_run(&submitted.run_id, None).await
    }

    /// `curl` invocation reproducing `request` with a fresh debug key.
    pub fn curl_command(&self, request: &AutomationRequest) -> Result<String, RunError> {
        curl_command(self.backend.base_url(), request)
    }

    fn prepare(&self, mut request: AutomationRequest) -> Result<AutomationRequest, RunError> {
        request.validate()?;
        if request.idempotency_key.is_none() {
            request.idempotency_key = Some(self.keys.generate(&request.intent));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStatus;
    use futures_util::stream;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        submitted: Mutex<Vec<AutomationRequest>>,
    }

    #[async_trait]
    impl RunBackend for RecordingBackend {
        async fn submit(&self, request: &AutomationRequest) -> Result<SubmitResponse, RunError> {
            self.submitted.lock().unwrap().push(request.clone());
            Ok(SubmitResponse {
                run_id: "r1".to_string(),
                status: RunStatus::Queued,
            })
        }

        async fn get_run(&self, run_id: &str) -> Result<RunRecord, RunError> {
            Err(RunError::api(404, format!("no run {}", run_id)))
        }

        async fn recent_runs(&self, _limit: usize) -> Result<Vec<RunRecord>, RunError> {
            Ok(Vec::new())
        }

        async fn open_stream(&self, _run_id: &str) -> Result<RunEventStream, RunError> {
            Ok(Box::pin(stream::empty()))
        }

        fn base_url(&self) -> &str {
            "http://localhost:8000"
        }
    }

    #[tokio::test]
    async fn test_submit_fills_key_and_registers_run() {
        let backend = Arc::new(RecordingBackend::default());
        let client = AutomationClient::new(backend.clone(), RunRegistry::new());

        let response = client
            .submit(AutomationRequest::new("research.validate_idea", json!({"idea": {}})))
            .await
            .unwrap();
        assert_eq!(response.run_id, "r1");

        let sent = backend.submitted.lock().unwrap();
        let key = sent[0].idempotency_key.as_deref().unwrap();
        assert!(key.starts_with("ui-research.validate_idea-"));

        let record = client.registry().get("r1").unwrap();
        assert_eq!(record.status, RunStatus::Queued);
        assert_eq!(record.intent(), Some("research.validate_idea"));
    }

    #[tokio::test]
    async fn test_submit_keeps_caller_key() {
        let backend = Arc::new(RecordingBackend::default());
        let client = AutomationClient::new(backend.clone(), RunRegistry::new());
        client
            .submit(AutomationRequest::new("x.y", json!({})).with_idempotency_key("mine"))
            .await
            .unwrap();
        assert_eq!(
            backend.submitted.lock().unwrap()[0].idempotency_key.as_deref(),
            Some("mine")
        );
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let client = AutomationClient::new(backend.clone(), RunRegistry::new());
        let err = client
            .submit(AutomationRequest::new("", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::InvalidRequest(_)));
        assert!(backend.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_run_error_propagates() {
        let client = AutomationClient::new(Arc::new(RecordingBackend::default()), RunRegistry::new());
        let err = client.get_run("missing").await.unwrap_err();
        assert!(matches!(err, RunError::Api { status: 404, .. }));
        assert!(client.registry().is_empty());
    }

    #[test]
    fn test_curl_command_uses_backend_base_url() {
        let client = AutomationClient::new(Arc::new(RecordingBackend::default()), RunRegistry::new());
        let cmd = client
            .curl_command(&AutomationRequest::new("x.y", json!({"a": 1})))
            .unwrap();
        assert!(cmd.contains("http://localhost:8000/automation/submit"));
    }
}
