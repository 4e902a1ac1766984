// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Vendor ingest exporter.
//!
//! Posts the crate's own record format to `{endpoint}/ingest/{metrics|traces}`:
//!
//! ```json
//! {"channel": "demo", "resource": {...}, "kind": "metrics", "sequence": 4, "records": [...]}
//! ```

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::retry::RetryPolicy;
use super::{check_response, http_client, send_error, Batch, Exporter};
use crate::error::{ConfigError, ExportError};
use crate::instrument::{MetricData, SpanData};
use crate::resource::Resource;

/// Header carrying the ingest key.
pub const INGEST_KEY_HEADER: &str = "x-ingest-key";

/// Vendor-specific exporter.
#[derive(Debug, Clone)]
pub struct VendorExporter {
    client: reqwest::Client,
    name: String,
    channel: String,
    base_url: String,
    ingest_key: Option<String>,
    timeout_ms: u64,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct IngestPayload<'a, R> {
    channel: &'a str,
    resource: &'a Resource,
    kind: &'static str,
    sequence: u64,
    records: &'a [R],
}

impl VendorExporter {
    pub fn new(
        channel: &str,
        endpoint: &str,
        ingest_key: Option<String>,
        timeout_ms: u64,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(timeout_ms)?,
            name: format!("vendor:{}", channel),
            channel: channel.to_string(),
            base_url: endpoint.trim_end_matches('/').to_string(),
            ingest_key,
            timeout_ms,
            retry,
        })
    }

    /// URL for records of `kind`.
    pub fn ingest_url(&self, kind: &str) -> String {
        format!("{}/ingest/{}", self.base_url, kind)
    }

    async fn send<R: Serialize + Sync>(&self, kind: &'static str, batch: &Batch<R>) -> Result<(), ExportError> {
        let payload = IngestPayload {
            channel: &self.channel,
            resource: &batch.resource,
            kind,
            sequence: batch.sequence,
            records: &batch.records,
        };

        let url = self.ingest_url(kind);
        debug!(exporter = %self.name, url = %url, batch = batch.sequence, records = batch.len(), "Posting ingest batch");

        let mut request = self.client.post(&url).json(&payload);
        if let Some(ref key) = self.ingest_key {
            request = request.header(INGEST_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout_ms))?;
        check_response(response).await
    }
}

#[async_trait]
impl Exporter<MetricData> for VendorExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, batch: &Batch<MetricData>) -> Result<(), ExportError> {
        self.send("metrics", batch).await
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }
}

#[async_trait]
impl Exporter<SpanData> for VendorExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, batch: &Batch<SpanData>) -> Result<(), ExportError> {
        self.send("traces", batch).await
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }
}
