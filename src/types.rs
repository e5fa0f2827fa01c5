// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core type definitions for the automation run protocol.
//!
//! These types mirror the wire format used by the automation backend:
//! requests sent to `/automation/submit`, and run records returned by
//! `/automation/runs/{run_id}`, `/automation/recent` and the event stream.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::RunError;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a run.
///
/// Transitions only move forward: `queued -> running -> {succeeded | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[serde(alias = "pending")]
    Queued,
    Running,
    #[serde(alias = "success", alias = "completed")]
    Succeeded,
    #[serde(alias = "error")]
    Failed,
}

impl RunStatus {
    /// Position in the lifecycle. Both terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }

    /// Whether no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    ///
    /// Re-observing the same status is allowed. A terminal status can only
    /// be followed by itself.
    pub fn can_advance_to(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }

    /// Short label for progress displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A request to execute an automation intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRequest {
    /// Namespaced operation name, e.g. `research.validate_idea`.
    pub intent: String,

    /// Operation-specific arguments. Must be a JSON object.
    pub payload: Value,

    /// Deduplication hint for the backend. Filled in by the client when absent.
    pub idempotency_key: Option<String>,

    /// Links this submission to a parent run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AutomationRequest {
    /// Create a request with no idempotency key or correlation id.
    pub fn new(intent: impl Into<String>, payload: Value) -> Self {
        Self {
            intent: intent.into(),
            payload,
            idempotency_key: None,
            correlation_id: None,
        }
    }

    /// Use a caller-supplied idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Check the request is well-formed before it touches the network.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.intent.trim().is_empty() {
            return Err(RunError::InvalidRequest("intent must not be empty".to_string()));
        }
        if !self.payload.is_object() {
            return Err(RunError::InvalidRequest(
                "payload must be a JSON object".to_string(),
            ));
        }
        if matches!(self.idempotency_key.as_deref(), Some(k) if k.is_empty()) {
            return Err(RunError::InvalidRequest(
                "idempotency_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Body returned by a successful submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub run_id: String,
    pub status: RunStatus,
}

/// Body returned by `/automation/recent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentRuns {
    #[serde(default)]
    pub items: Vec<RunRecord>,
}

// ============================================================================
// Run records
// ============================================================================

/// Execution detail attached to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    /// Present once the run succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Present once the run failed. Usually a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<Value>,
}

impl RunDetail {
    /// Render `error` as a message, if present.
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| Some(Value::Object(obj.clone()).to_string())),
            other => Some(other.to_string()),
        }
    }

    fn merge(&mut self, patch: RunDetail) {
        if patch.intent.is_some() {
            self.intent = patch.intent;
        }
        if patch.result.is_some() {
            self.result = patch.result;
        }
        if patch.error.is_some() {
            self.error = patch.error;
        }
        if patch.executed.is_some() {
            self.executed = patch.executed;
        }
    }
}

/// Last known state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<RunDetail>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(
        default,
        alias = "ts",
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Interpretation of a record's status and detail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Still queued or running.
    Pending(RunStatus),
    /// Succeeded with `detail.result` (or `null`).
    Succeeded(Value),
    /// Failed with `detail.error` (or a generic message).
    Failed(String),
}

impl RunRecord {
    /// Create a record for a freshly submitted run.
    pub fn submitted(response: &SubmitResponse, request: &AutomationRequest) -> Self {
        Self {
            run_id: response.run_id.clone(),
            status: response.status,
            detail: Some(RunDetail {
                intent: Some(request.intent.clone()),
                ..Default::default()
            }),
            correlation_id: request.correlation_id.clone(),
            created_at: Some(Utc::now()),
            meta: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Intent recorded in the detail, if known.
    pub fn intent(&self) -> Option<&str> {
        self.detail.as_ref()?.intent.as_deref()
    }

    /// Classify the record into pending / succeeded / failed.
    pub fn outcome(&self) -> RunOutcome {
        match self.status {
            RunStatus::Succeeded => RunOutcome::Succeeded(
                self.detail
                    .as_ref()
                    .and_then(|d| d.result.clone())
                    .unwrap_or(Value::Null),
            ),
            RunStatus::Failed => RunOutcome::Failed(
                self.detail
                    .as_ref()
                    .and_then(RunDetail::error_message)
                    .unwrap_or_else(|| "Run failed".to_string()),
            ),
            status => RunOutcome::Pending(status),
        }
    }

    /// Result typed by intent family, once the run has succeeded.
    pub fn typed_result(&self) -> Option<IntentResult> {
        match self.outcome() {
            RunOutcome::Succeeded(value) => {
                Some(IntentResult::from_detail(self.intent().unwrap_or_default(), value))
            }
            _ => None,
        }
    }

    /// Apply a partial update.
    ///
    /// Returns `false` (and leaves the record untouched) when the update
    /// names a different run or would move the status backwards.
    pub fn merge(&mut self, update: RunUpdate) -> bool {
        if let Some(ref run_id) = update.run_id {
            if *run_id != self.run_id {
                return false;
            }
        }
        if let Some(status) = update.status {
            if !self.status.can_advance_to(status) {
                return false;
            }
            self.status = status;
        }
        if let Some(patch) = update.detail {
            match self.detail.as_mut() {
                Some(detail) => detail.merge(patch),
                None => self.detail = Some(patch),
            }
        }
        if update.correlation_id.is_some() {
            self.correlation_id = update.correlation_id;
        }
        if update.created_at.is_some() {
            self.created_at = update.created_at;
        }
        if update.meta.is_some() {
            self.meta = update.meta;
        }
        true
    }
}

/// A partial run record, as delivered by the event stream.
///
/// Every field is optional; absent fields keep their previous value when
/// merged into a [`RunRecord`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub detail: Option<RunDetail>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default, alias = "ts", deserialize_with = "deserialize_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl RunUpdate {
    /// Build a full record when no prior state exists.
    ///
    /// Needs a status; the run id falls back to `default_run_id`.
    pub fn into_record(self, default_run_id: &str) -> Option<RunRecord> {
        let status = self.status?;
        Some(RunRecord {
            run_id: self.run_id.unwrap_or_else(|| default_run_id.to_string()),
            status,
            detail: self.detail,
            correlation_id: self.correlation_id,
            created_at: self.created_at,
            meta: self.meta,
        })
    }
}

impl From<RunRecord> for RunUpdate {
    fn from(record: RunRecord) -> Self {
        Self {
            run_id: Some(record.run_id),
            status: Some(record.status),
            detail: record.detail,
            correlation_id: record.correlation_id,
            created_at: record.created_at,
            meta: record.meta,
        }
    }
}

/// Accepts RFC 3339 strings, or unix epoch seconds / milliseconds.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Value::Number(n)) => n.as_f64().and_then(|secs| {
            // Values past the year 33658 in seconds are assumed to be milliseconds.
            let millis = if secs > 1.0e12 { secs } else { secs * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }),
        _ => None,
    })
}

// ============================================================================
// Typed results
// ============================================================================

/// Result of a `research.*` intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchValidation {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of an `ideation.*` intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaGeneration {
    pub ideas: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Run result classified by intent family.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentResult {
    ResearchValidation(ResearchValidation),
    IdeaGeneration(IdeaGeneration),
    /// Unknown family, or a result that does not match its family's shape.
    Other(Value),
}

impl IntentResult {
    /// Classify `value` using the namespace of `intent`.
    pub fn from_detail(intent: &str, value: Value) -> Self {
        let family = intent.split('.').next().unwrap_or_default();
        match family {
            "research" => serde_json::from_value(value.clone())
                .map(Self::ResearchValidation)
                .unwrap_or(Self::Other(value)),
            "ideation" => serde_json::from_value(value.clone())
                .map(Self::IdeaGeneration)
                .unwrap_or(Self::Other(value)),
            _ => Self::Other(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_ordering() {
        use RunStatus::*;
        assert!(Queued.can_advance_to(Running));
        assert!(Queued.can_advance_to(Succeeded));
        assert!(Running.can_advance_to(Running));
        assert!(Running.can_advance_to(Failed));
        assert!(!Running.can_advance_to(Queued));
        assert!(!Succeeded.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Running));
        assert!(Succeeded.can_advance_to(Succeeded));
    }

    #[test]
    fn test_status_aliases() {
        let s: RunStatus = serde_json::from_value(json!("pending")).unwrap();
        assert_eq!(s, RunStatus::Queued);
        let s: RunStatus = serde_json::from_value(json!("completed")).unwrap();
        assert_eq!(s, RunStatus::Succeeded);
        assert_eq!(serde_json::to_value(RunStatus::Running).unwrap(), json!("running"));
    }

    #[test]
    fn test_request_validation() {
        assert!(AutomationRequest::new("research.validate_idea", json!({})).validate().is_ok());
        assert!(matches!(
            AutomationRequest::new("  ", json!({})).validate(),
            Err(RunError::InvalidRequest(_))
        ));
        assert!(matches!(
            AutomationRequest::new("x.y", json!([1, 2])).validate(),
            Err(RunError::InvalidRequest(_))
        ));
        assert!(AutomationRequest::new("x.y", json!({}))
            .with_idempotency_key("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_request_omits_missing_correlation_id() {
        let req = AutomationRequest::new("x.y", json!({"a": 1})).with_idempotency_key("k");
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["idempotency_key"], "k");
        assert!(body.get("correlation_id").is_none());
    }

    #[test]
    fn test_record_from_wire() {
        let record: RunRecord = serde_json::from_value(json!({
            "run_id": "r1",
            "status": "succeeded",
            "detail": {"intent": "research.validate_idea", "result": {"score": 42}},
            "ts": 1_700_000_000
        }))
        .unwrap();
        assert_eq!(record.run_id, "r1");
        assert_eq!(record.intent(), Some("research.validate_idea"));
        assert_eq!(record.outcome(), RunOutcome::Succeeded(json!({"score": 42})));
        assert_eq!(record.created_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_timestamp_formats() {
        let record: RunRecord = serde_json::from_value(json!({
            "run_id": "r1", "status": "queued", "created_at": "2026-01-02T03:04:05Z"
        }))
        .unwrap();
        assert_eq!(record.created_at.unwrap().to_rfc3339(), "2026-01-02T03:04:05+00:00");

        let record: RunRecord = serde_json::from_value(json!({
            "run_id": "r1", "status": "queued", "ts": 1_700_000_000_123_i64
        }))
        .unwrap();
        assert_eq!(record.created_at.unwrap().timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_failed_outcome_messages() {
        let mut record: RunRecord = serde_json::from_value(json!({
            "run_id": "r1", "status": "failed", "detail": {"error": "invalid idea"}
        }))
        .unwrap();
        assert_eq!(record.outcome(), RunOutcome::Failed("invalid idea".to_string()));

        record.detail = None;
        assert_eq!(record.outcome(), RunOutcome::Failed("Run failed".to_string()));

        record.detail = Some(RunDetail {
            error: Some(json!({"message": "quota"})),
            ..Default::default()
        });
        assert_eq!(record.outcome(), RunOutcome::Failed("quota".to_string()));
    }

    #[test]
    fn test_merge_partial_update() {
        let mut record: RunRecord = serde_json::from_value(json!({
            "run_id": "r1", "status": "queued", "detail": {"intent": "ideation.generate"}
        }))
        .unwrap();

        let applied = record.merge(RunUpdate {
            status: Some(RunStatus::Succeeded),
            detail: Some(RunDetail {
                result: Some(json!({"ideas": ["a"]})),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(applied);
        assert_eq!(record.status, RunStatus::Succeeded);
        // intent survives a patch that did not mention it
        assert_eq!(record.intent(), Some("ideation.generate"));
    }

    #[test]
    fn test_merge_rejects_regression_and_foreign_run() {
        let mut record: RunRecord =
            serde_json::from_value(json!({"run_id": "r1", "status": "running"})).unwrap();
        assert!(!record.merge(RunUpdate {
            status: Some(RunStatus::Queued),
            ..Default::default()
        }));
        assert_eq!(record.status, RunStatus::Running);

        assert!(!record.merge(RunUpdate {
            run_id: Some("r2".to_string()),
            status: Some(RunStatus::Succeeded),
            ..Default::default()
        }));
        assert_eq!(record.status, RunStatus::Running);
    }

    #[test]
    fn test_update_into_record() {
        let update: RunUpdate = serde_json::from_value(json!({"status": "running"})).unwrap();
        let record = update.into_record("r9").unwrap();
        assert_eq!(record.run_id, "r9");
        assert!(RunUpdate::default().into_record("r9").is_none());
    }

    #[test]
    fn test_intent_result_classification() {
        match IntentResult::from_detail("research.validate_idea", json!({"score": 42})) {
            IntentResult::ResearchValidation(r) => assert_eq!(r.score, 42.0),
            other => panic!("unexpected {:?}", other),
        }
        match IntentResult::from_detail("ideation.generate", json!({"ideas": [{"title": "X"}]})) {
            IntentResult::IdeaGeneration(g) => assert_eq!(g.ideas.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        // family matches but shape does not
        assert_eq!(
            IntentResult::from_detail("research.validate_idea", json!({"note": "n/a"})),
            IntentResult::Other(json!({"note": "n/a"}))
        );
        assert_eq!(
            IntentResult::from_detail("billing.charge", json!(1)),
            IntentResult::Other(json!(1))
        );
    }
}
