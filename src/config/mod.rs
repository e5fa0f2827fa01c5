// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.runtrack/config.json
//! - Workspace config: .runtrack.json, .runtrack/config.json, runtrack.config.json or .runtrack.yaml
//! - Local config: .runtrack.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments and their environment variables
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_global_config_from, load_local_config,
    load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    IdempotencySettings, PollSettings, ResolvedConfig, StreamSettings, WorkspaceConfig,
    DEFAULT_BASE_URL,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate all configuration sources for a workspace.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global_dir = get_global_config_dir();
    load_config_with_global(global_dir.as_deref(), workspace_root, cli_options)
}

/// [`load_config`] with the global config read from `global_dir`
/// instead of the home directory. `None` skips the global layer.
pub fn load_config_with_global(
    global_dir: Option<&Path>,
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = match global_dir {
        Some(dir) => load_global_config_from(dir)?,
        None => None,
    };
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let config = merge_config(global, workspace, local, cli_options);
    config.validate()?;
    Ok(config)
}
