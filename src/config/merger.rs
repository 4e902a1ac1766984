// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::collections::BTreeMap;

use crate::error::ConfigError;

use super::types::{FileConfig, TelemetryConfig};

/// CLI options that can override configuration.
///
/// The binary fills these from flags or their `OTEL_*` environment
/// variables, so environment and CLI share one precedence level.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub endpoint: Option<String>,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    /// Raw `key=value,key=value` list.
    pub resource_attributes: Option<String>,
    pub metric_export_interval_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
    pub no_agent: bool,
}

/// Default configuration values.
pub fn default_config() -> TelemetryConfig {
    TelemetryConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options and `OTEL_*` environment variables
/// 2. Local config (.signalpost.json)
/// 3. Global config (~/.signalpost/config.json)
/// 4. Default values
pub fn merge_config(
    global: Option<FileConfig>,
    local: Option<FileConfig>,
    cli: CliOptions,
) -> Result<TelemetryConfig, ConfigError> {
    let mut result = default_config();

    if let Some(config) = global {
        apply_file_config(&mut result, config);
    }

    if let Some(config) = local {
        apply_file_config(&mut result, config);
    }

    apply_cli_options(&mut result, &cli)?;

    Ok(result)
}

fn apply_file_config(result: &mut TelemetryConfig, config: FileConfig) {
    if let Some(name) = config.service_name {
        result.service.name = name;
    }

    if let Some(version) = config.service_version {
        result.service.version = version;
    }

    if let Some(endpoint) = config.endpoint {
        result.endpoint = endpoint;
    }

    if let Some(attributes) = config.resource_attributes {
        result.resource_attributes.extend(attributes);
    }

    if let Some(sources) = config.sources {
        for source in sources {
            match result.sources.iter_mut().find(|s| s.name == source.name) {
                Some(existing) => existing.version = source.version,
                None => result.sources.push(source),
            }
        }
    }

    if let Some(metrics) = config.metrics {
        if let Some(sources) = metrics.sources {
            extend_unique(&mut result.metrics.sources, sources);
        }
        if let Some(interval) = metrics.export_interval_ms {
            result.metrics.export_interval_ms = interval;
        }
        // Exporter chains replace rather than merge.
        if let Some(exporters) = metrics.exporters {
            result.metrics.exporters = exporters;
        }
    }

    if let Some(traces) = config.traces {
        if let Some(sources) = traces.sources {
            extend_unique(&mut result.traces.sources, sources);
        }
        if let Some(size) = traces.max_batch_size {
            result.traces.max_batch_size = size;
        }
        if let Some(exporters) = traces.exporters {
            result.traces.exporters = exporters;
        }
    }

    if let Some(timeout) = config.shutdown_timeout_ms {
        result.shutdown_timeout_ms = timeout;
    }

    if config.agent.is_some() {
        result.agent = config.agent;
    }
}

fn apply_cli_options(result: &mut TelemetryConfig, cli: &CliOptions) -> Result<(), ConfigError> {
    if let Some(ref endpoint) = cli.endpoint {
        result.endpoint = endpoint.clone();
    }

    if let Some(ref name) = cli.service_name {
        result.service.name = name.clone();
    }

    if let Some(ref version) = cli.service_version {
        result.service.version = version.clone();
    }

    if let Some(ref raw) = cli.resource_attributes {
        result.resource_attributes.extend(parse_resource_attributes(raw)?);
    }

    if let Some(interval) = cli.metric_export_interval_ms {
        result.metrics.export_interval_ms = interval;
    }

    if let Some(timeout) = cli.shutdown_timeout_ms {
        result.shutdown_timeout_ms = timeout;
    }

    if cli.no_agent {
        if let Some(agent) = result.agent.as_mut() {
            agent.enabled = false;
        }
    }

    Ok(())
}

fn extend_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

/// Parse a `key=value,key=value` resource attribute list.
///
/// Blank entries are skipped. An entry without `=` or with an empty key is
/// an error.
pub fn parse_resource_attributes(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut attributes = BTreeMap::new();

    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ConfigError::invalid("resourceAttributes", format!("expected key=value, got '{}'", pair))
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::invalid(
                "resourceAttributes",
                format!("empty key in '{}'", pair),
            ));
        }
        attributes.insert(key.to_string(), value.trim().to_string());
    }

    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{AgentConfig, ExporterConfig, MetricsFileConfig};

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.service.name, "signalpost-demo");
        assert!(config.agent.is_none());
    }

    #[test]
    fn test_merge_config_precedence() {
        let global = FileConfig {
            service_name: Some("global".to_string()),
            endpoint: Some("http://global:4318".to_string()),
            shutdown_timeout_ms: Some(3_000),
            ..Default::default()
        };

        let local = FileConfig {
            endpoint: Some("http://local:4318".to_string()),
            ..Default::default()
        };

        let cli = CliOptions {
            service_name: Some("cli".to_string()),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(local), cli).unwrap();

        assert_eq!(result.service.name, "cli");
        assert_eq!(result.endpoint, "http://local:4318");
        assert_eq!(result.shutdown_timeout_ms, 3_000);
    }

    #[test]
    fn test_merge_sources_without_duplicates() {
        let global = FileConfig {
            metrics: Some(MetricsFileConfig {
                sources: Some(vec!["a".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let local = FileConfig {
            metrics: Some(MetricsFileConfig {
                sources: Some(vec!["b".to_string(), "a".to_string()]),
                exporters: Some(vec![ExporterConfig::Console]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(local), CliOptions::default()).unwrap();
        assert_eq!(result.metrics.sources, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.metrics.exporters, vec![ExporterConfig::Console]);
    }

    #[test]
    fn test_parse_resource_attributes() {
        let attrs = parse_resource_attributes("deployment.environment=dev, team = core,,").unwrap();
        assert_eq!(attrs.get("deployment.environment").map(String::as_str), Some("dev"));
        assert_eq!(attrs.get("team").map(String::as_str), Some("core"));
        assert_eq!(attrs.len(), 2);

        assert!(parse_resource_attributes("novalue").is_err());
        assert!(parse_resource_attributes("=x").is_err());
    }

    #[test]
    fn test_malformed_cli_attributes_fail_merge() {
        let cli = CliOptions {
            resource_attributes: Some("broken".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            merge_config(None, None, cli),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_no_agent_disables_configured_agent() {
        let local = FileConfig {
            agent: Some(AgentConfig {
                command: "otelcol".to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
                enabled: true,
            }),
            ..Default::default()
        };
        let cli = CliOptions {
            no_agent: true,
            ..Default::default()
        };

        let result = merge_config(None, Some(local), cli).unwrap();
        assert!(!result.agent_enabled());
    }
}
