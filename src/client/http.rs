// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP transport for the automation endpoints.
//!
//! Request/response calls share a client with the configured request
//! timeout. The event stream uses a second client with only a connect
//! timeout, since a stream stays open for as long as the run is active.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

#[cfg(feature = "telemetry")]
use tracing::{debug, trace};

use crate::config::ResolvedConfig;
use crate::error::RunError;
use crate::types::{AutomationRequest, RecentRuns, RunRecord, RunUpdate, SubmitResponse};

use super::{RunBackend, RunEventStream};

/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Connect timeout for the event stream.
const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default stream path. `{run_id}` is substituted.
pub const DEFAULT_STREAM_PATH: &str = "/automation/runs/{run_id}/stream";

/// HTTP implementation of [`RunBackend`].
pub struct HttpBackend {
    client: Client,
    stream_client: Client,
    base_url: String,
    stream_path: String,
}

impl HttpBackend {
    /// Create a backend for `base_url` with default settings.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RunError> {
        Self::build(
            base_url.into(),
            Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            DEFAULT_STREAM_PATH.to_string(),
            &HashMap::new(),
        )
    }

    pub fn from_config(config: &ResolvedConfig) -> Result<Self, RunError> {
        Self::build(
            config.base_url.clone(),
            config.request_timeout,
            config.stream.path_template.clone(),
            &config.headers,
        )
    }

    fn build(
        base_url: String,
        request_timeout: Duration,
        stream_path: String,
        headers: &HashMap<String, String>,
    ) -> Result<Self, RunError> {
        let headers = build_headers(headers)?;

        let client = Client::builder()
            .timeout(request_timeout)
            .default_headers(headers.clone())
            .build()
            .map_err(|e| RunError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .map_err(|e| RunError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            stream_path,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn stream_url(&self, run_id: &str) -> String {
        self.url(&self.stream_path.replace("{run_id}", &urlencoding::encode(run_id)))
    }

    /// Decode a 2xx JSON body, or turn the response into an API error.
    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RunError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RunError::api(status.as_u16(), body));
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(RunError::from)
    }
}

#[async_trait]
impl RunBackend for HttpBackend {
    async fn submit(&self, request: &AutomationRequest) -> Result<SubmitResponse, RunError> {
        #[cfg(feature = "telemetry")]
        debug!(intent = %request.intent, "POST /automation/submit");

        let response = self
            .client
            .post(self.url("/automation/submit"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RunError::submission(status.as_u16(), body));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(RunError::from)
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord, RunError> {
        #[cfg(feature = "telemetry")]
        trace!(run_id, "GET /automation/runs");

        let response = self
            .client
            .get(self.url(&format!("/automation/runs/{}", urlencoding::encode(run_id))))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, RunError> {
        let response = self
            .client
            .get(self.url("/automation/recent"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        let recent: RecentRuns = Self::read_json(response).await?;
        Ok(recent.items)
    }

    async fn open_stream(&self, run_id: &str) -> Result<RunEventStream, RunError> {
        let url = self.stream_url(run_id);

        #[cfg(feature = "telemetry")]
        debug!(run_id, %url, "Opening run event stream");

        let response = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RunError::api(status.as_u16(), body));
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => Some(
                        serde_json::from_str::<RunUpdate>(&event.data).map_err(RunError::from),
                    ),
                    Err(e) => Some(Err(RunError::Transport(e.to_string()))),
                }
            });

        Ok(events.boxed())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn build_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, RunError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RunError::InvalidRequest(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RunError::InvalidRequest(format!("invalid header value: {}", e)))?;
        map.insert(name, value);
    }
    Ok(map)
}
