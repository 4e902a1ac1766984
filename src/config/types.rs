// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`FileConfig`] is what a config file may contain; every field is optional.
//! [`TelemetryConfig`] is the resolved configuration after merging files,
//! environment and CLI options over the defaults.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::exporter::retry::RetryPolicy;

/// Default collector base address (OTLP/HTTP).
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4318";

/// Default service name reported in every batch.
pub const DEFAULT_SERVICE_NAME: &str = "signalpost-demo";

/// Default metric collection interval.
pub const DEFAULT_EXPORT_INTERVAL_MS: u64 = 1_000;

/// Default maximum number of spans per trace batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 512;

/// Default bound on provider disposal.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Default per-request exporter timeout.
pub const DEFAULT_EXPORT_TIMEOUT_MS: u64 = 10_000;

fn default_export_timeout_ms() -> u64 {
    DEFAULT_EXPORT_TIMEOUT_MS
}

/// Name and version of the emitting service, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVICE_NAME.to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// An instrumentation source declared at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// One entry of a provider's exporter chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ExporterConfig {
    /// Generic OTLP/HTTP exporter.
    Otlp {
        /// Overrides the top-level endpoint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default = "default_export_timeout_ms")]
        timeout_ms: u64,
        #[serde(default)]
        retry: RetryPolicy,
    },
    /// Vendor ingest exporter.
    Vendor {
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ingest_key: Option<String>,
        #[serde(default = "default_export_timeout_ms")]
        timeout_ms: u64,
        #[serde(default)]
        retry: RetryPolicy,
    },
    /// Writes batches to the log.
    Console,
}

impl ExporterConfig {
    /// An OTLP exporter using the top-level endpoint.
    pub fn otlp() -> Self {
        Self::Otlp {
            endpoint: None,
            headers: BTreeMap::new(),
            timeout_ms: DEFAULT_EXPORT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Otlp { .. } => "otlp",
            Self::Vendor { .. } => "vendor",
            Self::Console => "console",
        }
    }

    fn endpoint_override(&self) -> Option<&str> {
        match self {
            Self::Otlp { endpoint, .. } | Self::Vendor { endpoint, .. } => endpoint.as_deref(),
            Self::Console => None,
        }
    }
}

/// Metrics provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Metric source names the provider listens to.
    pub sources: Vec<String>,
    pub export_interval_ms: u64,
    pub exporters: Vec<ExporterConfig>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            export_interval_ms: DEFAULT_EXPORT_INTERVAL_MS,
            exporters: vec![ExporterConfig::otlp()],
        }
    }
}

/// Trace provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracesConfig {
    /// Trace source names the provider listens to.
    pub sources: Vec<String>,
    pub max_batch_size: usize,
    pub exporters: Vec<ExporterConfig>,
}

impl Default for TracesConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            exporters: vec![ExporterConfig::otlp()],
        }
    }
}

/// Out-of-process forwarding agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Fully resolved telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    pub service: ServiceIdentity,
    /// Base collector address shared by exporters without their own.
    pub endpoint: String,
    pub resource_attributes: BTreeMap<String, String>,
    /// Sources declared in the registry at startup.
    pub sources: Vec<SourceConfig>,
    pub metrics: MetricsConfig,
    pub traces: TracesConfig,
    pub shutdown_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service: ServiceIdentity::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            resource_attributes: BTreeMap::new(),
            sources: Vec::new(),
            metrics: MetricsConfig::default(),
            traces: TracesConfig::default(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            agent: None,
        }
    }
}

impl TelemetryConfig {
    /// Check everything that must hold before any provider is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::MissingField("service.name".to_string()));
        }
        if self.service.version.trim().is_empty() {
            return Err(ConfigError::MissingField("service.version".to_string()));
        }

        validate_endpoint(&self.endpoint)?;

        if self.metrics.export_interval_ms == 0 {
            return Err(ConfigError::invalid("metrics.exportIntervalMs", "must be greater than 0"));
        }
        if self.traces.max_batch_size == 0 {
            return Err(ConfigError::invalid("traces.maxBatchSize", "must be greater than 0"));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::invalid("shutdownTimeoutMs", "must be greater than 0"));
        }

        for exporter in self.metrics.exporters.iter().chain(&self.traces.exporters) {
            if let Some(endpoint) = exporter.endpoint_override() {
                validate_endpoint(endpoint)?;
            }
            if let ExporterConfig::Vendor { channel, .. } = exporter {
                if channel.trim().is_empty() {
                    return Err(ConfigError::MissingField("exporters[].channel".to_string()));
                }
            }
        }

        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::MissingField("sources[].name".to_string()));
            }
        }

        if let Some(agent) = &self.agent {
            if agent.enabled && agent.command.trim().is_empty() {
                return Err(ConfigError::MissingField("agent.command".to_string()));
            }
        }

        Ok(())
    }

    /// Declare a source and subscribe the matching provider to it.
    pub fn add_metric_source(&mut self, name: &str, version: &str) {
        self.declare_source(name, version);
        if !self.metrics.sources.iter().any(|s| s == name) {
            self.metrics.sources.push(name.to_string());
        }
    }

    /// Declare a source and subscribe the trace provider to it.
    pub fn add_trace_source(&mut self, name: &str, version: &str) {
        self.declare_source(name, version);
        if !self.traces.sources.iter().any(|s| s == name) {
            self.traces.sources.push(name.to_string());
        }
    }

    fn declare_source(&mut self, name: &str, version: &str) {
        if !self.sources.iter().any(|s| s.name == name) {
            self.sources.push(SourceConfig::new(name, version));
        }
    }

    /// Whether the forwarding agent should be started.
    pub fn agent_enabled(&self) -> bool {
        self.agent.as_ref().is_some_and(|a| a.enabled)
    }
}

/// Check that `endpoint` is an absolute http(s) URL with a host.
pub fn validate_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(endpoint).map_err(|e| ConfigError::endpoint(endpoint, e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::endpoint(
            endpoint,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::endpoint(endpoint, "missing host"));
    }

    Ok(url)
}

/// Metrics section of a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exporters: Option<Vec<ExporterConfig>>,
}

/// Traces section of a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracesFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exporters: Option<Vec<ExporterConfig>>,
}

/// Configuration as found in a global or local config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_attributes: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsFileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<TracesFileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TelemetryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint, "http://localhost:4318");
        assert_eq!(config.metrics.export_interval_ms, 1_000);
        assert_eq!(config.metrics.exporters, vec![ExporterConfig::otlp()]);
    }

    #[test]
    fn test_missing_identity_is_fatal() {
        let mut config = TelemetryConfig::default();
        config.service.name = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(f)) if f == "service.name"));

        let mut config = TelemetryConfig::default();
        config.service.version = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_malformed_endpoint_is_fatal() {
        for endpoint in ["localhost:4318", "not a url", "ftp://collector:21", "http://"] {
            let config = TelemetryConfig {
                endpoint: endpoint.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::MalformedEndpoint { .. })),
                "{endpoint} should be rejected"
            );
        }
    }

    #[test]
    fn test_exporter_endpoint_is_validated() {
        let mut config = TelemetryConfig::default();
        config.traces.exporters.push(ExporterConfig::Vendor {
            channel: "demo".to_string(),
            endpoint: Some("collector".to_string()),
            ingest_key: None,
            timeout_ms: 1_000,
            retry: RetryPolicy::default(),
        });
        assert!(matches!(config.validate(), Err(ConfigError::MalformedEndpoint { .. })));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = TelemetryConfig::default();
        config.metrics.export_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_agent_requires_command() {
        let mut config = TelemetryConfig::default();
        config.agent = Some(AgentConfig {
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            enabled: true,
        });
        assert!(config.validate().is_err());

        if let Some(agent) = config.agent.as_mut() {
            agent.enabled = false;
        }
        assert!(config.validate().is_ok());
        assert!(!config.agent_enabled());
    }

    #[test]
    fn test_exporter_config_tagged_union() {
        let json = r#"[
            {"type": "otlp", "endpoint": "http://collector:4318", "timeoutMs": 2000},
            {"type": "vendor", "channel": "demo", "ingestKey": "secret"},
            {"type": "console"}
        ]"#;
        let exporters: Vec<ExporterConfig> = serde_json::from_str(json).unwrap();

        assert_eq!(exporters.len(), 3);
        assert!(matches!(
            &exporters[0],
            ExporterConfig::Otlp { endpoint: Some(e), timeout_ms: 2000, .. } if e == "http://collector:4318"
        ));
        assert!(matches!(
            &exporters[1],
            ExporterConfig::Vendor { channel, ingest_key: Some(k), timeout_ms: 10_000, .. }
                if channel == "demo" && k == "secret"
        ));
        assert_eq!(exporters[2], ExporterConfig::Console);
        assert_eq!(exporters[1].kind(), "vendor");
    }

    #[test]
    fn test_add_sources_deduplicates() {
        let mut config = TelemetryConfig::default();
        config.add_metric_source("app", "1.0.0");
        config.add_metric_source("app", "1.0.0");
        config.add_trace_source("app.activity", "1.0.0");

        assert_eq!(config.metrics.sources, vec!["app".to_string()]);
        assert_eq!(config.traces.sources, vec!["app.activity".to_string()]);
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn test_file_config_yaml() {
        let yaml = r#"
serviceName: checkout
endpoint: https://otel.example.com
metrics:
  exportIntervalMs: 5000
  exporters:
    - type: console
"#;
        let config: FileConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.service_name.as_deref(), Some("checkout"));
        let metrics = config.metrics.unwrap();
        assert_eq!(metrics.export_interval_ms, Some(5000));
        assert_eq!(metrics.exporters, Some(vec![ExporterConfig::Console]));
    }
}
