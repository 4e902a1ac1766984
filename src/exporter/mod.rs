// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Exporter implementations.
//!
//! An [`Exporter`] is an independent sink for one telemetry kind. Every
//! exporter owns its own transport and [`RetryPolicy`]; a provider hands each
//! batch to every exporter in its chain without any shared state between
//! them.
//!
//! - [`otlp::OtlpExporter`] - OTLP/HTTP with the JSON encoding
//! - [`vendor::VendorExporter`] - vendor ingest endpoint with its own record format
//! - [`console::ConsoleExporter`] - writes batches to the log
//! - [`memory::InMemoryExporter`] - keeps batches in memory, for tests
//!
//! Exporter chains are built from configuration:
//!
//! ```rust,ignore
//! use signalpost::exporter::build_exporters;
//! use signalpost::instrument::MetricData;
//!
//! let exporters = build_exporters::<MetricData>(&config.metrics.exporters, &config.endpoint)?;
//! ```

pub mod console;
pub mod memory;
pub mod otlp;
pub mod retry;
pub mod vendor;

pub use console::ConsoleExporter;
pub use memory::InMemoryExporter;
pub use otlp::OtlpExporter;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use vendor::VendorExporter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ExporterConfig;
use crate::error::{ConfigError, ExportError};
use crate::resource::Resource;

/// Records exported together, tagged with the resource they came from.
#[derive(Debug)]
pub struct Batch<R> {
    pub resource: Arc<Resource>,
    pub records: Arc<Vec<R>>,
    /// Position of the batch in its provider's output, starting at 1.
    pub sequence: u64,
}

// Manual impl so `R` need not be `Clone`.
impl<R> Clone for Batch<R> {
    fn clone(&self) -> Self {
        Self {
            resource: Arc::clone(&self.resource),
            records: Arc::clone(&self.records),
            sequence: self.sequence,
        }
    }
}

impl<R> Batch<R> {
    pub fn new(resource: Arc<Resource>, records: Vec<R>, sequence: u64) -> Self {
        Self {
            resource,
            records: Arc::new(records),
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A sink for batches of `R`.
#[async_trait]
pub trait Exporter<R>: Send + Sync {
    /// Name used in logs and shutdown reports.
    fn name(&self) -> &str;

    /// Transmit one batch. Called once per attempt.
    async fn export(&self, batch: &Batch<R>) -> Result<(), ExportError>;

    /// Release transport resources. Called once, after the last export.
    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }

    /// Backoff applied to retryable failures of [`Exporter::export`].
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }
}

/// Shared exporter handle.
pub type BoxedExporter<R> = Arc<dyn Exporter<R>>;

/// Build an exporter chain from configuration, preserving order.
///
/// `endpoint` is used by exporters that do not set their own.
pub fn build_exporters<R>(
    configs: &[ExporterConfig],
    endpoint: &str,
) -> Result<Vec<BoxedExporter<R>>, ConfigError>
where
    R: 'static,
    OtlpExporter: Exporter<R>,
    VendorExporter: Exporter<R>,
    ConsoleExporter: Exporter<R>,
{
    configs
        .iter()
        .map(|config| build_exporter::<R>(config, endpoint))
        .collect()
}

fn build_exporter<R>(config: &ExporterConfig, endpoint: &str) -> Result<BoxedExporter<R>, ConfigError>
where
    R: 'static,
    OtlpExporter: Exporter<R>,
    VendorExporter: Exporter<R>,
    ConsoleExporter: Exporter<R>,
{
    let exporter: BoxedExporter<R> = match config {
        ExporterConfig::Otlp {
            endpoint: own,
            headers,
            timeout_ms,
            retry,
        } => Arc::new(OtlpExporter::new(
            own.as_deref().unwrap_or(endpoint),
            headers.clone(),
            *timeout_ms,
            retry.clone(),
        )?),
        ExporterConfig::Vendor {
            channel,
            endpoint: own,
            ingest_key,
            timeout_ms,
            retry,
        } => Arc::new(VendorExporter::new(
            channel,
            own.as_deref().unwrap_or(endpoint),
            ingest_key.clone(),
            *timeout_ms,
            retry.clone(),
        )?),
        ExporterConfig::Console => Arc::new(ConsoleExporter::new()),
    };
    Ok(exporter)
}

/// Build a `reqwest` client with a per-request timeout.
pub(crate) fn http_client(timeout_ms: u64) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| ConfigError::invalid("exporters", e.to_string()))
}

/// Turn a non-success HTTP response into an [`ExportError`].
pub(crate) async fn check_response(response: reqwest::Response) -> Result<(), ExportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_default();
    Err(ExportError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Map a send failure, keeping the configured timeout in the error.
pub(crate) fn send_error(err: reqwest::Error, timeout_ms: u64) -> ExportError {
    if err.is_timeout() {
        ExportError::Timeout(timeout_ms)
    } else {
        ExportError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{MetricData, SpanData};

    #[test]
    fn test_build_exporters_preserves_order() {
        let configs = vec![
            ExporterConfig::Console,
            ExporterConfig::otlp(),
            ExporterConfig::Vendor {
                channel: "demo".to_string(),
                endpoint: None,
                ingest_key: None,
                timeout_ms: 1_000,
                retry: RetryPolicy::none(),
            },
        ];

        let exporters = build_exporters::<MetricData>(&configs, "http://localhost:4318").unwrap();
        let names: Vec<&str> = exporters.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["console", "otlp", "vendor:demo"]);

        let exporters = build_exporters::<SpanData>(&configs, "http://localhost:4318").unwrap();
        assert_eq!(exporters.len(), 3);
    }

    #[test]
    fn test_batch_clone_shares_records() {
        let batch = Batch::new(Arc::new(Resource::default()), vec![1, 2, 3], 7);
        let clone = batch.clone();
        assert!(Arc::ptr_eq(&batch.records, &clone.records));
        assert_eq!(clone.sequence, 7);
        assert_eq!(clone.len(), 3);
    }
}
