// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in the working
//! directory and the user's home directory.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{ExporterConfig, FileConfig, MetricsFileConfig, SourceConfig, TracesFileConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[".signalpost.json", ".signalpost.yaml", "signalpost.config.json"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".signalpost";

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

/// Load global configuration from ~/.signalpost/config.json.
pub fn load_global_config() -> Result<Option<FileConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load configuration from the first config file found in `dir`.
pub fn load_local_config(dir: &Path) -> Result<Option<FileConfig>, ConfigError> {
    match find_config_file(dir) {
        Some(path) => load_config_file(&path).map(Some),
        None => Ok(None),
    }
}

/// First existing entry of [`CONFIG_FILES`] in `dir`.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Write `config` as pretty JSON to `dir`.
pub fn save_config(dir: &Path, config: &FileConfig, filename: Option<&str>) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = dir.join(filename);

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Write the example configuration unless a config file already exists.
pub fn init_config(dir: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(existing) = find_config_file(dir) {
        return Err(ConfigError::invalid(
            "config",
            format!("{} already exists", existing.display()),
        ));
    }
    save_config(dir, &get_example_config(), None)
}

/// An example configuration exercising both exporter variants.
pub fn get_example_config() -> FileConfig {
    FileConfig {
        service_name: Some("signalpost-demo".to_string()),
        service_version: Some("1.0.0".to_string()),
        endpoint: Some(super::types::DEFAULT_ENDPOINT.to_string()),
        sources: Some(vec![SourceConfig::new("signalpost.greeter", "1.0.0")]),
        metrics: Some(MetricsFileConfig {
            sources: Some(vec!["signalpost.greeter".to_string()]),
            export_interval_ms: Some(1_000),
            exporters: Some(vec![ExporterConfig::otlp(), ExporterConfig::Console]),
        }),
        traces: Some(TracesFileConfig {
            sources: Some(vec!["signalpost.greeter.activity".to_string()]),
            max_batch_size: Some(512),
            exporters: Some(vec![ExporterConfig::otlp()]),
        }),
        ..Default::default()
    }
}
