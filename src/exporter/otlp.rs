// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OTLP/HTTP exporter using the JSON encoding.
//!
//! Metrics go to `{endpoint}/v1/metrics` as cumulative monotonic sums and
//! spans to `{endpoint}/v1/traces`. Records are grouped by instrumentation
//! scope within a single resource.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::retry::RetryPolicy;
use super::{check_response, http_client, send_error, Batch, Exporter};
use crate::error::{ConfigError, ExportError};
use crate::instrument::{
    InstrumentationScope, KeyValue, MetricData, NumberValue, SpanData, SpanStatus, Value,
};
use crate::resource::Resource;

const METRICS_PATH: &str = "v1/metrics";
const TRACES_PATH: &str = "v1/traces";

/// `AGGREGATION_TEMPORALITY_CUMULATIVE`
const CUMULATIVE: u8 = 2;

/// `SPAN_KIND_INTERNAL`
const SPAN_KIND_INTERNAL: u8 = 1;

/// Generic protocol exporter.
#[derive(Debug, Clone)]
pub struct OtlpExporter {
    client: reqwest::Client,
    metrics_url: String,
    traces_url: String,
    headers: BTreeMap<String, String>,
    timeout_ms: u64,
    retry: RetryPolicy,
}

impl OtlpExporter {
    /// Create an exporter for the collector at `endpoint`.
    ///
    /// `endpoint` is the collector base address; a trailing `/v1/metrics`
    /// or `/v1/traces` is tolerated and not duplicated.
    pub fn new(
        endpoint: &str,
        headers: BTreeMap<String, String>,
        timeout_ms: u64,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let base = base_endpoint(endpoint);
        Ok(Self {
            client: http_client(timeout_ms)?,
            metrics_url: format!("{}/{}", base, METRICS_PATH),
            traces_url: format!("{}/{}", base, TRACES_PATH),
            headers,
            timeout_ms,
            retry,
        })
    }

    pub fn metrics_url(&self) -> &str {
        &self.metrics_url
    }

    pub fn traces_url(&self) -> &str {
        &self.traces_url
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), ExportError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout_ms))?;
        check_response(response).await
    }
}

/// Strip trailing slashes and any signal path from `endpoint`.
fn base_endpoint(endpoint: &str) -> &str {
    let trimmed = endpoint.trim_end_matches('/');
    for suffix in [METRICS_PATH, TRACES_PATH] {
        if let Some(base) = trimmed.strip_suffix(suffix) {
            return base.trim_end_matches('/');
        }
    }
    trimmed
}

#[async_trait]
impl Exporter<MetricData> for OtlpExporter {
    fn name(&self) -> &str {
        "otlp"
    }

    async fn export(&self, batch: &Batch<MetricData>) -> Result<(), ExportError> {
        let request = encode_metrics(&batch.resource, &batch.records);
        debug!(url = %self.metrics_url, batch = batch.sequence, metrics = batch.len(), "Posting OTLP metrics");
        self.post(&self.metrics_url, &request).await
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }
}

#[async_trait]
impl Exporter<SpanData> for OtlpExporter {
    fn name(&self) -> &str {
        "otlp"
    }

    async fn export(&self, batch: &Batch<SpanData>) -> Result<(), ExportError> {
        let request = encode_spans(&batch.resource, &batch.records);
        debug!(url = %self.traces_url, batch = batch.sequence, spans = batch.len(), "Posting OTLP spans");
        self.post(&self.traces_url, &request).await
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }
}

// Wire types (OTLP JSON mapping).

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetricsRequest {
    resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceMetrics {
    resource: WireResource,
    scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeMetrics {
    scope: WireScope,
    metrics: Vec<WireMetric>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireMetric {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    sum: WireSum,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSum {
    data_points: Vec<NumberDataPoint>,
    aggregation_temporality: u8,
    is_monotonic: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NumberDataPoint {
    attributes: Vec<WireKeyValue>,
    start_time_unix_nano: String,
    time_unix_nano: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_int: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_double: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTraceRequest {
    resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSpans {
    resource: WireResource,
    scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeSpans {
    scope: WireScope,
    spans: Vec<WireSpan>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSpan {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    name: String,
    kind: u8,
    start_time_unix_nano: String,
    end_time_unix_nano: String,
    attributes: Vec<WireKeyValue>,
    status: WireStatus,
}

#[derive(Debug, Serialize)]
struct WireStatus {
    code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireResource {
    attributes: Vec<WireKeyValue>,
}

#[derive(Debug, Serialize)]
struct WireScope {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    version: String,
}

#[derive(Debug, Serialize)]
struct WireKeyValue {
    key: String,
    value: AnyValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum AnyValue {
    StringValue(String),
    BoolValue(bool),
    /// 64-bit integers travel as decimal strings.
    IntValue(String),
    DoubleValue(f64),
}

impl From<&Value> for AnyValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(v) => Self::BoolValue(*v),
            Value::I64(v) => Self::IntValue(v.to_string()),
            Value::F64(v) => Self::DoubleValue(*v),
            Value::String(v) => Self::StringValue(v.clone()),
        }
    }
}

fn wire_attributes(tags: &[KeyValue]) -> Vec<WireKeyValue> {
    tags.iter()
        .map(|kv| WireKeyValue {
            key: kv.key.clone(),
            value: AnyValue::from(&kv.value),
        })
        .collect()
}

fn wire_resource(resource: &Resource) -> WireResource {
    WireResource {
        attributes: resource
            .iter()
            .map(|(key, value)| WireKeyValue {
                key: key.to_string(),
                value: AnyValue::StringValue(value.to_string()),
            })
            .collect(),
    }
}

fn wire_scope(scope: &InstrumentationScope) -> WireScope {
    WireScope {
        name: scope.name.clone(),
        version: scope.version.clone(),
    }
}

fn unix_nanos(time: &DateTime<Utc>) -> String {
    time.timestamp_nanos_opt().unwrap_or_default().to_string()
}

/// Group records by scope, keeping first-seen order.
fn group_by_scope<'a, T>(
    records: &'a [T],
    scope_of: impl Fn(&T) -> &InstrumentationScope,
) -> Vec<(&'a InstrumentationScope, Vec<&'a T>)> {
    let mut groups: Vec<(&InstrumentationScope, Vec<&T>)> = Vec::new();
    for record in records {
        let scope = scope_of(record);
        match groups.iter_mut().find(|(s, _)| *s == scope) {
            Some((_, items)) => items.push(record),
            None => groups.push((scope, vec![record])),
        }
    }
    groups
}

/// Encode metrics as an OTLP `ExportMetricsServiceRequest`.
pub fn encode_metrics(resource: &Resource, metrics: &[MetricData]) -> ExportMetricsRequest {
    let scope_metrics = group_by_scope(metrics, |m| &m.scope)
        .into_iter()
        .map(|(scope, items)| ScopeMetrics {
            scope: wire_scope(scope),
            metrics: items.into_iter().map(wire_metric).collect(),
        })
        .collect();

    ExportMetricsRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: wire_resource(resource),
            scope_metrics,
        }],
    }
}

fn wire_metric(metric: &MetricData) -> WireMetric {
    let data_points = metric
        .points
        .iter()
        .map(|point| {
            let (as_int, as_double) = match point.value {
                NumberValue::Int(v) => (Some(v.to_string()), None),
                NumberValue::Double(v) => (None, Some(v)),
            };
            NumberDataPoint {
                attributes: wire_attributes(&point.attributes),
                start_time_unix_nano: unix_nanos(&point.start_time),
                time_unix_nano: unix_nanos(&point.time),
                as_int,
                as_double,
            }
        })
        .collect();

    WireMetric {
        name: metric.name.clone(),
        description: metric.description.clone(),
        sum: WireSum {
            data_points,
            aggregation_temporality: CUMULATIVE,
            is_monotonic: true,
        },
    }
}

/// Encode spans as an OTLP `ExportTraceServiceRequest`.
pub fn encode_spans(resource: &Resource, spans: &[SpanData]) -> ExportTraceRequest {
    let scope_spans = group_by_scope(spans, |s| &s.scope)
        .into_iter()
        .map(|(scope, items)| ScopeSpans {
            scope: wire_scope(scope),
            spans: items.into_iter().map(wire_span).collect(),
        })
        .collect();

    ExportTraceRequest {
        resource_spans: vec![ResourceSpans {
            resource: wire_resource(resource),
            scope_spans,
        }],
    }
}

fn wire_span(span: &SpanData) -> WireSpan {
    let status = match &span.status {
        SpanStatus::Unset => WireStatus { code: 0, message: None },
        SpanStatus::Ok => WireStatus { code: 1, message: None },
        SpanStatus::Error(message) => WireStatus {
            code: 2,
            message: Some(message.clone()),
        },
    };

    WireSpan {
        trace_id: span.span_context.trace_id.to_hex(),
        span_id: span.span_context.span_id.to_hex(),
        parent_span_id: span.parent_span_id.map(|id| id.to_hex()),
        name: span.name.clone(),
        kind: SPAN_KIND_INTERNAL,
        start_time_unix_nano: unix_nanos(&span.start_time),
        end_time_unix_nano: unix_nanos(&span.end_time),
        attributes: wire_attributes(&span.tags),
        status,
    }
}
