// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::time::Duration;

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
///
/// Environment variables are folded in by clap before they reach here.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub interval_ms: Option<u64>,
    pub no_stream: Option<bool>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options (and their environment variables)
/// 2. Local config (.runtrack.local.json)
/// 3. Workspace config (.runtrack.json)
/// 4. Global config (~/.runtrack/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, &config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(ref base_url) = config.base_url {
        result.base_url = base_url.trim_end_matches('/').to_string();
    }

    if let Some(ms) = config.request_timeout_ms {
        result.request_timeout = Duration::from_millis(ms);
    }

    if let Some(ref poll) = config.poll {
        if let Some(ms) = poll.interval_ms {
            result.poll.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = poll.max_interval_ms {
            result.poll.max_interval = Duration::from_millis(ms);
        }
        if let Some(factor) = poll.backoff_factor {
            result.poll.backoff_factor = factor;
        }
        if let Some(ms) = poll.timeout_ms {
            result.poll.timeout = Duration::from_millis(ms);
        }
    }

    if let Some(ref stream) = config.stream {
        if let Some(enabled) = stream.enabled {
            result.stream.enabled = enabled;
        }
        if let Some(ref path) = stream.path_template {
            result.stream.path_template = path.clone();
        }
        if let Some(ms) = stream.idle_timeout_ms {
            // 0 disables the idle timeout
            result.stream.idle_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
    }

    if let Some(ref idempotency) = config.idempotency {
        if let Some(ref prefix) = idempotency.prefix {
            result.key_prefix = prefix.clone();
        }
        if let Some(strategy) = idempotency.strategy {
            result.key_strategy = strategy;
        }
    }

    if let Some(ref headers) = config.headers {
        result.headers.extend(headers.clone());
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref base_url) = cli.base_url {
        result.base_url = base_url.trim_end_matches('/').to_string();
    }

    if let Some(ms) = cli.timeout_ms {
        result.poll.timeout = Duration::from_millis(ms);
    }

    if let Some(ms) = cli.interval_ms {
        result.poll.interval = Duration::from_millis(ms);
    }

    if cli.no_stream == Some(true) {
        result.stream.enabled = false;
    }
}
