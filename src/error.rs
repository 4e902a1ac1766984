// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the telemetry pipeline.
//!
//! Errors are split by how they are handled: configuration errors abort
//! startup, instrument errors reject a declaration, emission errors are
//! swallowed at the call site, and export errors stay inside the exporter
//! that produced them.

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
///
/// These are the only errors a user of the workload ever sees.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Malformed endpoint {endpoint}: {message}")]
    MalformedEndpoint { endpoint: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a malformed endpoint error.
    pub fn endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors raised when declaring instruments in the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("Counter {source_name}/{counter} already declared as {existing}, requested {requested}")]
    DomainConflict {
        source_name: String,
        counter: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("Instrument name must not be empty")]
    EmptyName,
}

/// Rejected emissions.
///
/// Never returned by the regular emission calls; only `Counter::try_add`
/// surfaces them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmitError {
    #[error("Counter {0} rejected negative delta {1}")]
    NegativeDelta(String, f64),

    #[error("Counter {0} rejected non-finite delta")]
    NonFinite(String),

    #[error("Counter {0} rejected delta that would overflow its total")]
    Overflow(String),
}

/// Errors produced by an exporter while transmitting a batch.
#[derive(Error, Debug, Clone)]
pub enum ExportError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Collector returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Export timed out after {0}ms")]
    Timeout(u64),

    #[error("Exporter already shut down")]
    Shutdown,
}

impl ExportError {
    /// Check if the failed transmission is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Encode(_) | Self::Shutdown => false,
        }
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(0)
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

/// Errors from the out-of-process forwarding agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to start forwarding agent: {0}")]
    StartupFailed(String),

    #[error("Forwarding agent is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
