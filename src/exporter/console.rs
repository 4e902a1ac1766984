// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Exporter that writes batches to the log.

use async_trait::async_trait;
use tracing::info;

use super::{Batch, Exporter};
use crate::error::ExportError;
use crate::instrument::{KeyValue, MetricData, SpanData};

/// Logs every record at `info` level under the `signalpost::console` target.
#[derive(Debug, Clone, Default)]
pub struct ConsoleExporter;

impl ConsoleExporter {
    pub fn new() -> Self {
        Self
    }
}

fn format_tags(tags: &[KeyValue]) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let inner: Vec<String> = tags.iter().map(|kv| format!("{}={}", kv.key, kv.value)).collect();
    format!("{{{}}}", inner.join(","))
}

#[async_trait]
impl Exporter<MetricData> for ConsoleExporter {
    fn name(&self) -> &str {
        "console"
    }

    async fn export(&self, batch: &Batch<MetricData>) -> Result<(), ExportError> {
        for metric in batch.records.iter() {
            for point in &metric.points {
                info!(
                    target: "signalpost::console",
                    batch = batch.sequence,
                    source = %metric.scope,
                    "{}{} = {}",
                    metric.name,
                    format_tags(&point.attributes),
                    point.value
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Exporter<SpanData> for ConsoleExporter {
    fn name(&self) -> &str {
        "console"
    }

    async fn export(&self, batch: &Batch<SpanData>) -> Result<(), ExportError> {
        for span in batch.records.iter() {
            info!(
                target: "signalpost::console",
                batch = batch.sequence,
                source = %span.scope,
                trace_id = %span.span_context.trace_id,
                span_id = %span.span_context.span_id,
                "{}{} took {:?}",
                span.name,
                format_tags(&span.tags),
                span.duration()
            );
        }
        Ok(())
    }
}
