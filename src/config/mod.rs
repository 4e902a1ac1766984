// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for signalpost.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.signalpost/config.json
//! - Local config: .signalpost.json, .signalpost.yaml, or signalpost.config.json
//! - CLI options and `OTEL_*` environment variables
//!
//! Configuration is merged with precedence (CLI/env > local > global > defaults)
//! and validated once; a configuration error aborts startup.

mod loader;
mod merger;
mod types;

pub use loader::{
    find_config_file, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_local_config, save_config,
    CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, parse_resource_attributes, CliOptions};

pub use types::{
    validate_endpoint, AgentConfig, ExporterConfig, FileConfig, MetricsConfig, MetricsFileConfig,
    ServiceIdentity, SourceConfig, TelemetryConfig, TracesConfig, TracesFileConfig,
    DEFAULT_ENDPOINT, DEFAULT_EXPORT_INTERVAL_MS, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_SHUTDOWN_TIMEOUT_MS,
};

use std::path::Path;

use crate::error::ConfigError;

/// Load, merge and validate all configuration sources for `dir`.
///
/// This is the main entry point for configuration loading.
pub fn load_config(dir: &Path, cli_options: CliOptions) -> Result<TelemetryConfig, ConfigError> {
    let global = load_global_config()?;
    let local = load_local_config(dir)?;

    let config = merge_config(global, local, cli_options)?;
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`], but an explicit `file` replaces the local config
/// file search.
pub fn load_config_with_file(
    dir: &Path,
    file: Option<&Path>,
    cli_options: CliOptions,
) -> Result<TelemetryConfig, ConfigError> {
    let Some(file) = file else {
        return load_config(dir, cli_options);
    };

    let global = load_global_config()?;
    let local = load_config_file(file)?;

    let config = merge_config(global, Some(local), cli_options)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_local_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".signalpost.json"),
            r#"{"serviceName": "checkout", "serviceVersion": "2.1.0"}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert_eq!(config.service.name, "checkout");
        assert_eq!(config.service.version, "2.1.0");
    }

    #[test]
    fn test_load_config_cli_override() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".signalpost.json"),
            r#"{"endpoint": "http://file:4318"}"#,
        )
        .unwrap();

        let cli = CliOptions {
            endpoint: Some("http://cli:4318".to_string()),
            ..Default::default()
        };

        let config = load_config(temp.path(), cli).unwrap();
        assert_eq!(config.endpoint, "http://cli:4318");
    }

    #[test]
    fn test_load_config_rejects_malformed_endpoint() {
        let temp = TempDir::new().unwrap();
        let cli = CliOptions {
            endpoint: Some("collector:4318".to_string()),
            ..Default::default()
        };

        let err = load_config(temp.path(), cli).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedEndpoint { .. }));
    }

    #[test]
    fn test_load_config_explicit_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".signalpost.json"),
            r#"{"serviceName": "ignored"}"#,
        )
        .unwrap();
        let explicit = temp.path().join("staging.yaml");
        std::fs::write(&explicit, "serviceName: staging\nendpoint: http://staging:4318\n").unwrap();

        let config = load_config_with_file(temp.path(), Some(&explicit), CliOptions::default()).unwrap();
        assert_eq!(config.service.name, "staging");
        assert_eq!(config.endpoint, "http://staging:4318");

        let missing = temp.path().join("missing.json");
        assert!(load_config_with_file(temp.path(), Some(&missing), CliOptions::default()).is_err());
    }
}
