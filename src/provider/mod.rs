// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics and trace providers.
//!
//! Both providers follow the same lifecycle ([`ProviderState`]): a builder
//! collects bound source names and exporters, `build()` starts the
//! background pipeline, and `shutdown()` exports whatever was accumulated
//! before it was called and closes every exporter, bounded by a timeout.

mod chain;
pub mod meter;
mod state;
pub mod tracer;

pub use chain::{ExporterOutcome, ExporterReport};
pub use meter::{MeterProvider, MeterProviderBuilder};
pub use state::ProviderState;
pub use tracer::{TracerProvider, TracerProviderBuilder};

use std::time::Duration;

use serde::Serialize;

/// What happened to each exporter when a provider was disposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderShutdown {
    /// `metrics` or `traces`.
    pub signal: &'static str,
    pub exporters: Vec<ExporterReport>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// The provider had already been disposed; nothing was done.
    pub already_disposed: bool,
}

impl ProviderShutdown {
    pub(crate) fn new(signal: &'static str, exporters: Vec<ExporterReport>, elapsed: Duration) -> Self {
        Self {
            signal,
            exporters,
            elapsed,
            already_disposed: false,
        }
    }

    pub(crate) fn already(signal: &'static str) -> Self {
        Self {
            signal,
            exporters: Vec::new(),
            elapsed: Duration::ZERO,
            already_disposed: true,
        }
    }

    /// Every exporter flushed.
    pub fn is_clean(&self) -> bool {
        self.exporters
            .iter()
            .all(|r| r.outcome == ExporterOutcome::Flushed)
    }

    /// Reports for exporters that did not flush.
    pub fn problems(&self) -> impl Iterator<Item = &ExporterReport> {
        self.exporters
            .iter()
            .filter(|r| r.outcome != ExporterOutcome::Flushed)
    }
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_report() {
        let report = ProviderShutdown::new(
            "metrics",
            vec![
                ExporterReport {
                    exporter: "otlp".to_string(),
                    outcome: ExporterOutcome::Flushed,
                },
                ExporterReport {
                    exporter: "vendor:demo".to_string(),
                    outcome: ExporterOutcome::TimedOut,
                },
            ],
            Duration::from_millis(42),
        );

        assert!(!report.is_clean());
        assert_eq!(report.problems().count(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed"], 42);
        assert_eq!(json["exporters"][1]["outcome"], "timed_out");
        assert_eq!(json["exporters"][1]["exporter"], "vendor:demo");

        assert!(ProviderShutdown::already("traces").is_clean());
    }
}
