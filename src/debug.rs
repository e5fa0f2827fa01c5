// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Debug helpers for reproducing submissions outside the client.

use serde_json::json;

use crate::error::RunError;
use crate::idempotency::IdempotencyKeyGenerator;
use crate::types::AutomationRequest;

/// Render a `curl` command that re-submits `request`.
///
/// The body always carries a fresh `debug-{intent}-{ms}` idempotency key so
/// the reproduction is never collapsed into the original run. Arguments are
/// quoted for POSIX shells.
pub fn curl_command(base_url: &str, request: &AutomationRequest) -> Result<String, RunError> {
    request.validate()?;

    let mut body = json!({
        "intent": request.intent,
        "payload": request.payload,
        "idempotency_key": IdempotencyKeyGenerator::debug().generate(&request.intent),
    });
    if let Some(ref correlation_id) = request.correlation_id {
        body["correlation_id"] = json!(correlation_id);
    }
    let body = serde_json::to_string(&body)?;

    let url = format!("{}/automation/submit", base_url.trim_end_matches('/'));
    Ok(format!(
        "curl -X POST {} -H 'Content-Type: application/json' -d {}",
        shell_quote(&url)?,
        shell_quote(&body)?
    ))
}

fn shell_quote(s: &str) -> Result<String, RunError> {
    shlex::try_quote(s)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| RunError::InvalidRequest(format!("cannot quote for the shell: {}", e)))
}

/// Copy `text` to the system clipboard.
///
/// Best-effort: returns `false` when no clipboard is available. Callers are
/// expected to print the text as a fallback.
pub fn copy_to_clipboard(text: &str) -> bool {
    arboard::Clipboard::new()
        .and_then(|mut clipboard| clipboard.set_text(text))
        .is_ok()
}
