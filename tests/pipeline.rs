// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end pipeline tests through the public API.

use std::sync::Arc;
use std::time::Duration;

use signalpost::config::TelemetryConfig;
use signalpost::exporter::InMemoryExporter;
use signalpost::instrument::{Context, KeyValue, MetricData, NumberValue, SpanData, Value};
use signalpost::provider::{ExporterOutcome, MeterProvider, TracerProvider};
use signalpost::workload::{self, Greeter, RunMode};
use signalpost::{InstrumentationRegistry, ProviderState, Telemetry};

fn config() -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.add_metric_source("app", "1.0.0");
    config.add_trace_source("app.activity", "1.0.0");
    config.metrics.export_interval_ms = 3_600_000;
    config.shutdown_timeout_ms = 2_000;
    config
}

fn start(
    config: TelemetryConfig,
) -> (Telemetry, InMemoryExporter<MetricData>, InMemoryExporter<SpanData>) {
    let metrics = InMemoryExporter::new("metrics");
    let spans = InMemoryExporter::new("spans");
    let telemetry = Telemetry::start_with_exporters(
        config,
        vec![Arc::new(metrics.clone())],
        vec![Arc::new(spans.clone())],
    )
    .unwrap();
    (telemetry, metrics, spans)
}

#[tokio::test]
async fn requests_counter_exports_three() {
    let (telemetry, metrics, _spans) = start(config());
    let requests = telemetry
        .registry()
        .create_counter::<u64>("app", "requests", "Requests served")
        .unwrap();

    for _ in 0..3 {
        requests.add(1, &[]);
    }

    let report = telemetry.shutdown().await;
    assert!(report.is_clean());

    let exported = metrics.records();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].name, "requests");
    assert_eq!(exported[0].points[0].value, NumberValue::Int(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_sum_exactly() {
    let (telemetry, metrics, _spans) = start(config());
    let counter = telemetry
        .registry()
        .create_counter::<u64>("app", "work", "")
        .unwrap();

    std::thread::scope(|scope| {
        for worker in 0..8u64 {
            let counter = &counter;
            scope.spawn(move || {
                for i in 0..1_000u64 {
                    counter.add(i % 3 + worker, &[]);
                }
            });
        }
    });

    let expected: u64 = (0..8u64)
        .map(|worker| (0..1_000u64).map(|i| i % 3 + worker).sum::<u64>())
        .sum();

    telemetry.shutdown().await;
    assert_eq!(metrics.records()[0].points[0].value, NumberValue::Int(expected));
}

#[tokio::test]
async fn span_ended_twice_exports_once() {
    let (telemetry, _metrics, spans) = start(config());

    let span = telemetry
        .registry()
        .start_span("app.activity", "op", &Context::root());
    span.set_tag("k", "v");
    span.end();
    span.end();
    span.set_tag("late", "ignored");
    drop(span);

    telemetry.shutdown().await;

    let exported = spans.records();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].tags.len(), 1);
    assert_eq!(exported[0].tag("k"), Some(&Value::String("v".to_string())));
    assert!(exported[0].tag("late").is_none());
    assert!(exported[0].end_time >= exported[0].start_time);
}

#[tokio::test]
async fn span_closed_when_operation_fails() {
    let (telemetry, _metrics, spans) = start(config());
    let registry = telemetry.registry().clone();

    fn fallible(registry: &InstrumentationRegistry) -> Result<(), String> {
        let span = registry.start_span("app.activity", "fallible", &Context::root());
        span.set_tag("attempt", 1i64);
        let parsed: i64 = "not a number".parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
        span.set_tag("unreachable", parsed);
        Ok(())
    }

    assert!(fallible(&registry).is_err());
    telemetry.shutdown().await;

    let exported = spans.records();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].name, "fallible");
    assert!(exported[0].tag("unreachable").is_none());
}

#[tokio::test]
async fn nested_spans_link_to_parent() {
    let (telemetry, _metrics, spans) = start(config());
    let registry = telemetry.registry();

    let parent = registry.start_span("app.activity", "parent", &Context::root());
    let child = registry.start_span("app.activity", "child", &parent.context());
    child.end();
    parent.end();

    telemetry.shutdown().await;

    let exported = spans.records();
    let parent = exported.iter().find(|s| s.name == "parent").unwrap();
    let child = exported.iter().find(|s| s.name == "child").unwrap();
    assert_eq!(child.parent_span_id, Some(parent.span_context.span_id));
    assert_eq!(child.span_context.trace_id, parent.span_context.trace_id);
    assert!(parent.parent_span_id.is_none());
}

#[tokio::test]
async fn untraced_source_is_inert() {
    let (telemetry, _metrics, spans) = start(config());

    let span = telemetry
        .registry()
        .start_span("not.bound", "op", &Context::root());
    assert!(!span.is_recording());
    span.set_tag("k", "v");
    span.end();

    telemetry.shutdown().await;
    assert!(spans.records().is_empty());
}

#[tokio::test]
async fn failing_exporter_does_not_starve_the_other() {
    let registry = InstrumentationRegistry::new();
    let broken = InMemoryExporter::<SpanData>::failing("broken");
    let healthy = InMemoryExporter::<SpanData>::new("healthy");

    let provider = TracerProvider::builder(registry.clone())
        .add_source("app.activity")
        .with_exporter(Arc::new(broken.clone()))
        .with_exporter(Arc::new(healthy.clone()))
        .with_shutdown_timeout(Duration::from_secs(2))
        .build();

    for i in 0..5i64 {
        let span = registry.start_span("app.activity", "op", &Context::root());
        span.set_tag("i", i);
        span.end();
        provider.force_flush().await;
    }

    let report = provider.shutdown().await;
    assert_eq!(healthy.records().len(), 5);
    assert!(broken.attempts() >= 5);
    assert!(broken.records().is_empty());

    let broken_report = report.exporters.iter().find(|r| r.exporter == "broken").unwrap();
    assert!(matches!(broken_report.outcome, ExporterOutcome::Failed(_)));
    let healthy_report = report.exporters.iter().find(|r| r.exporter == "healthy").unwrap();
    assert_eq!(healthy_report.outcome, ExporterOutcome::Flushed);
}

#[tokio::test]
async fn dispose_with_pending_batch_flushes_first() {
    let registry = InstrumentationRegistry::new();
    let slow = InMemoryExporter::<MetricData>::new("slow").with_delay(Duration::from_millis(200));

    let provider = MeterProvider::builder(registry.clone())
        .add_source("app")
        .with_exporter(Arc::new(slow.clone()))
        .with_interval(Duration::from_secs(3600))
        .with_shutdown_timeout(Duration::from_secs(5))
        .build();

    registry
        .metric_source("app", "1.0.0")
        .u64_counter("pending", "")
        .unwrap()
        .add(7, &[KeyValue::new("route", "/")]);

    let report = provider.shutdown().await;
    assert!(report.is_clean());
    assert_eq!(provider.state(), ProviderState::Disposed);
    assert_eq!(slow.records()[0].total(), 7.0);
    assert!(slow.is_shut_down());
}

#[tokio::test]
async fn shutdown_timeout_bounds_a_stuck_exporter() {
    let registry = InstrumentationRegistry::new();
    let stuck = InMemoryExporter::<MetricData>::new("stuck").with_delay(Duration::from_secs(30));

    let provider = MeterProvider::builder(registry.clone())
        .add_source("app")
        .with_exporter(Arc::new(stuck))
        .with_interval(Duration::from_secs(3600))
        .with_shutdown_timeout(Duration::from_millis(200))
        .build();

    registry.create_counter::<u64>("app", "requests", "").unwrap().add(1, &[]);

    let started = std::time::Instant::now();
    let report = provider.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.exporters[0].outcome, ExporterOutcome::TimedOut);
    assert_eq!(provider.state(), ProviderState::Disposed);
}

#[tokio::test]
async fn greeter_workload_end_to_end() {
    let mut config = TelemetryConfig::default();
    workload::configure_sources(&mut config);
    config.metrics.export_interval_ms = 3_600_000;

    let (telemetry, metrics, spans) = start(config);
    let greeter = Greeter::new(telemetry.registry()).unwrap();
    assert_eq!(workload::run(&greeter, RunMode::Iterations(1)).await.unwrap(), 1);

    let report = telemetry.shutdown().await;
    assert!(report.is_clean());

    let spans = spans.records();
    assert_eq!(spans.len(), 2);
    assert!(spans.iter().all(|s| s.name == "GreeterActivity"));
    assert!(spans
        .iter()
        .all(|s| s.tag("greeting") == Some(&Value::String("Hello World!".to_string()))));

    let metrics = metrics.records();
    let greetings = metrics
        .iter()
        .find(|m| m.name == workload::GREETINGS_COUNTER)
        .unwrap();
    assert_eq!(greetings.points[0].value, NumberValue::Int(2));
    assert_eq!(greetings.scope.name, workload::GREETER_METER);
    assert!(metrics.iter().any(|m| m.name == workload::ANOTHER_COUNTER));
}
