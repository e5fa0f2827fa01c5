// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{PollSettings, StreamSettings, WorkspaceConfig, DEFAULT_BASE_URL};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".runtrack.json",
    ".runtrack/config.json",
    "runtrack.config.json",
    ".runtrack.yaml",
];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".runtrack.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".runtrack";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.runtrack/config.json.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    match get_global_config_dir() {
        Some(dir) => load_global_config_from(&dir),
        None => Ok(None),
    }
}

/// Load `config.json` from an explicit global config directory.
pub fn load_global_config_from(dir: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = dir.join(GLOBAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the workspace root.
///
/// The first file from [`CONFIG_FILES`] that exists wins.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load local configuration from .runtrack.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Initialize a new config file with the example or provided configuration.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    let config = config.unwrap_or_else(get_example_config);
    save_workspace_config(workspace_root, &config, None)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        for filename in CONFIG_FILES {
            if current.join(filename).exists() {
                return Some(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration.
pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        base_url: Some(DEFAULT_BASE_URL.to_string()),
        poll: Some(PollSettings {
            interval_ms: Some(1500),
            max_interval_ms: Some(6000),
            backoff_factor: Some(1.4),
            timeout_ms: Some(120_000),
        }),
        stream: Some(StreamSettings {
            enabled: Some(true),
            path_template: Some("/automation/runs/{run_id}/stream".to_string()),
            idle_timeout_ms: None,
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_files_order() {
        assert_eq!(CONFIG_FILES.len(), 4);
        assert_eq!(CONFIG_FILES[0], ".runtrack.json");
    }

    #[test]
    fn test_global_config_dir() {
        if let Some(dir) = get_global_config_dir() {
            assert!(dir.ends_with(".runtrack"));
        }
    }

    #[test]
    fn test_load_workspace_config_not_found() {
        let temp = TempDir::new().unwrap();
        let result = load_workspace_config(temp.path());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_load_workspace_config_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".runtrack.json"),
            r#"{"baseUrl": "http://api.internal", "poll": {"timeoutMs": 5000}}"#,
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://api.internal"));
        assert_eq!(config.poll.unwrap().timeout_ms, Some(5000));
    }

    #[test]
    fn test_load_workspace_config_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".runtrack.yaml"),
            "baseUrl: http://yaml.internal\nstream:\n  enabled: false\n",
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://yaml.internal"));
        assert_eq!(config.stream.unwrap().enabled, Some(false));
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".runtrack.json"), "{not json").unwrap();
        assert!(matches!(
            load_workspace_config(temp.path()),
            Err(ConfigError::JsonError(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let config = WorkspaceConfig {
            base_url: Some("http://saved".to_string()),
            ..Default::default()
        };

        let path = save_workspace_config(temp.path(), &config, None).unwrap();
        assert!(path.exists());

        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded.base_url.as_deref(), Some("http://saved"));
    }

    #[test]
    fn test_find_workspace_root() {
        let temp = TempDir::new().unwrap();
        let subdir = temp.path().join("a").join("b");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(temp.path().join(".runtrack.json"), "{}").unwrap();

        assert_eq!(find_workspace_root(&subdir).unwrap(), temp.path());
    }

    #[test]
    fn test_init_config_writes_example() {
        let temp = TempDir::new().unwrap();
        let path = init_config(temp.path(), None).unwrap();
        assert_eq!(path.file_name().unwrap(), ".runtrack.json");
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("backoffFactor"));
    }
}
