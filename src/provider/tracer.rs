// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Trace provider.
//!
//! Subscribes a span sink to its bound trace sources at build time. A
//! pipeline task wakes on every finished span, drains whatever else is
//! already queued (up to the batch size) and dispatches the batch to the
//! exporter chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use super::chain::{deadline_after, ExporterChain, ExporterOutcome, ExporterReport};
use super::state::{ProviderState, StateCell};
use super::ProviderShutdown;
use crate::config::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use crate::exporter::{Batch, BoxedExporter};
use crate::instrument::{InstrumentationRegistry, SpanData};
use crate::resource::Resource;

const SIGNAL: &str = "traces";

type SpanReceiver = mpsc::UnboundedReceiver<SpanData>;

enum Control {
    Flush(tokio::time::Instant, oneshot::Sender<Vec<ExporterReport>>),
    Shutdown,
}

/// Builder for a [`TracerProvider`] (the `Building` state).
pub struct TracerProviderBuilder {
    registry: InstrumentationRegistry,
    sources: Vec<String>,
    exporters: Vec<BoxedExporter<SpanData>>,
    max_batch_size: usize,
    resource: Resource,
    shutdown_timeout: Duration,
}

impl TracerProviderBuilder {
    pub fn new(registry: InstrumentationRegistry) -> Self {
        Self {
            registry,
            sources: Vec::new(),
            exporters: Vec::new(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            resource: Resource::default(),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }

    /// Listen to the trace source called `name`.
    pub fn add_source(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.sources.contains(&name) {
            self.sources.push(name);
        }
        self
    }

    pub fn add_sources<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |builder, name| builder.add_source(name))
    }

    pub fn with_exporter(mut self, exporter: BoxedExporter<SpanData>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn with_exporters(mut self, exporters: Vec<BoxedExporter<SpanData>>) -> Self {
        self.exporters.extend(exporters);
        self
    }

    /// Most spans per batch. Zero is raised to one.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn state(&self) -> ProviderState {
        ProviderState::Building
    }

    /// Subscribe to the bound sources and start the pipeline.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> TracerProvider {
        let chain = ExporterChain::spawn(SIGNAL, self.exporters);
        let exporter_names = chain.names();

        let (sink, spans) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        self.registry.subscribe_traces(&self.sources, &sink);

        let pipeline = Pipeline {
            spans,
            control: control_rx,
            chain,
            resource: Arc::new(self.resource),
            max_batch_size: self.max_batch_size,
            sequence: 0,
        };
        let task = tokio::spawn(pipeline.run());

        info!(
            sources = ?self.sources,
            exporters = ?exporter_names,
            max_batch_size = self.max_batch_size,
            "Tracer provider running"
        );

        TracerProvider {
            registry: self.registry,
            sources: self.sources,
            exporter_names,
            sink,
            control,
            pipeline: Mutex::new(Some(task)),
            state: StateCell::new(ProviderState::Running),
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

struct Pipeline {
    spans: SpanReceiver,
    control: mpsc::UnboundedReceiver<Control>,
    chain: ExporterChain<SpanData>,
    resource: Arc<Resource>,
    max_batch_size: usize,
    sequence: u64,
}

impl Pipeline {
    /// Runs until told to shut down, then hands the chain back.
    async fn run(mut self) -> ExporterChain<SpanData> {
        loop {
            tokio::select! {
                biased;

                control = self.control.recv() => match control {
                    Some(Control::Flush(deadline, ack)) => {
                        self.drain();
                        let _ = ack.send(self.chain.flush(deadline).await);
                    }
                    Some(Control::Shutdown) | None => break,
                },
                Some(span) = self.spans.recv() => {
                    self.dispatch_from(span);
                }
            }
        }

        self.drain();
        // Spans ended from now on fail to send and are dropped.
        self.spans.close();
        self.drain();
        self.chain
    }

    fn dispatch_from(&mut self, first: SpanData) {
        let mut batch = Vec::with_capacity(self.max_batch_size.min(64));
        batch.push(first);
        while batch.len() < self.max_batch_size {
            match self.spans.try_recv() {
                Ok(span) => batch.push(span),
                Err(_) => break,
            }
        }
        self.send(batch);
    }

    /// Dispatch everything currently queued.
    fn drain(&mut self) {
        while let Ok(span) = self.spans.try_recv() {
            self.dispatch_from(span);
        }
    }

    fn send(&mut self, spans: Vec<SpanData>) {
        self.sequence += 1;
        self.chain
            .dispatch(Batch::new(Arc::clone(&self.resource), spans, self.sequence));
    }
}

/// A running trace provider.
pub struct TracerProvider {
    registry: InstrumentationRegistry,
    sources: Vec<String>,
    exporter_names: Vec<String>,
    sink: mpsc::UnboundedSender<SpanData>,
    control: mpsc::UnboundedSender<Control>,
    pipeline: Mutex<Option<JoinHandle<ExporterChain<SpanData>>>>,
    state: StateCell,
    shutdown_timeout: Duration,
}

impl TracerProvider {
    pub fn builder(registry: InstrumentationRegistry) -> TracerProviderBuilder {
        TracerProviderBuilder::new(registry)
    }

    pub fn state(&self) -> ProviderState {
        self.state.get()
    }

    /// Trace source names this provider listens to.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn exporter_names(&self) -> &[String] {
        &self.exporter_names
    }

    /// Dispatch every finished span and wait for the exporters to process it.
    pub async fn force_flush(&self) -> Vec<ExporterReport> {
        if self.state() != ProviderState::Running {
            return Vec::new();
        }

        let deadline = deadline_after(self.shutdown_timeout);
        let (ack, rx) = oneshot::channel();
        if self.control.send(Control::Flush(deadline, ack)).is_err() {
            return Vec::new();
        }
        match timeout_at(deadline, rx).await {
            Ok(Ok(reports)) => reports,
            Ok(Err(_)) => Vec::new(),
            Err(_) => self.reports_with(ExporterOutcome::TimedOut),
        }
    }

    /// Unsubscribe, export every span that ended before this call and close
    /// every exporter.
    ///
    /// Spans still open keep working but are dropped when they end.
    pub async fn shutdown(&self) -> ProviderShutdown {
        if !self
            .state
            .transition(ProviderState::Running, ProviderState::Disposing)
        {
            debug!("Tracer provider already disposed");
            return ProviderShutdown::already(SIGNAL);
        }

        let started = Instant::now();
        let deadline = deadline_after(self.shutdown_timeout);

        self.registry.unsubscribe_traces(&self.sources, &self.sink);
        let _ = self.control.send(Control::Shutdown);

        let task = self.pipeline.lock().await.take();
        let exporters = match task {
            Some(mut task) => match timeout_at(deadline, &mut task).await {
                Ok(Ok(chain)) => chain.shutdown(deadline).await,
                Ok(Err(e)) => {
                    warn!(error = %e, "Trace pipeline stopped unexpectedly");
                    self.reports_with(ExporterOutcome::Failed(e.to_string()))
                }
                Err(_) => {
                    task.abort();
                    self.reports_with(ExporterOutcome::TimedOut)
                }
            },
            None => Vec::new(),
        };

        self.state.set(ProviderState::Disposed);
        let report = ProviderShutdown::new(SIGNAL, exporters, started.elapsed());
        info!(elapsed_ms = report.elapsed.as_millis() as u64, "Tracer provider disposed");
        report
    }

    fn reports_with(&self, outcome: ExporterOutcome) -> Vec<ExporterReport> {
        self.exporter_names
            .iter()
            .map(|name| ExporterReport {
                exporter: name.clone(),
                outcome: outcome.clone(),
            })
            .collect()
    }
}

impl Drop for TracerProvider {
    fn drop(&mut self) {
        if !self
            .state
            .transition(ProviderState::Running, ProviderState::Disposing)
        {
            return;
        }

        warn!("Tracer provider dropped without shutdown; flushing in the background");
        self.registry.unsubscribe_traces(&self.sources, &self.sink);
        let _ = self.control.send(Control::Shutdown);

        let task = match self.pipeline.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let (Some(task), Ok(runtime)) = (task, tokio::runtime::Handle::try_current()) {
            let deadline = deadline_after(self.shutdown_timeout);
            runtime.spawn(async move {
                if let Ok(chain) = task.await {
                    chain.shutdown(deadline).await;
                }
            });
        }
        self.state.set(ProviderState::Disposed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::InMemoryExporter;
    use crate::instrument::{Context, KeyValue, Value};

    fn provider_with(registry: &InstrumentationRegistry, exporter: &InMemoryExporter<SpanData>) -> TracerProvider {
        TracerProvider::builder(registry.clone())
            .add_source("app.activity")
            .with_exporter(Arc::new(exporter.clone()))
            .with_shutdown_timeout(Duration::from_secs(5))
            .build()
    }

    #[tokio::test]
    async fn test_span_exported_once_with_single_tag() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter);

        let span = registry.start_span("app.activity", "op", &Context::root());
        span.set_tag("k", "v");
        span.end();
        span.end();
        drop(span);

        provider.shutdown().await;
        let spans = exporter.records();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].tags, vec![KeyValue::new("k", "v")]);
        assert!(spans[0].end_time >= spans[0].start_time);
    }

    #[tokio::test]
    async fn test_force_flush_delivers_ended_spans() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter);

        for i in 0..5 {
            let span = registry.start_span("app.activity", "op", &Context::root());
            span.set_tag("i", i);
        }

        let reports = provider.force_flush().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(exporter.records().len(), 5);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_batches_respect_max_size() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = TracerProvider::builder(registry.clone())
            .add_source("app.activity")
            .with_exporter(Arc::new(exporter.clone()))
            .with_max_batch_size(2)
            .build();

        for _ in 0..5 {
            registry.start_span("app.activity", "op", &Context::root()).end();
        }
        provider.shutdown().await;

        assert_eq!(exporter.records().len(), 5);
        assert!(exporter.batches().iter().all(|b| b.len() <= 2));
    }

    #[tokio::test]
    async fn test_spans_after_dispose_are_dropped() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter);

        let open = registry.start_span("app.activity", "straddles", &Context::root());
        provider.shutdown().await;
        assert_eq!(provider.state(), ProviderState::Disposed);

        open.set_tag("late", true);
        open.end();
        let after = registry.start_span("app.activity", "after", &Context::root());
        assert!(!after.is_recording());
        drop(after);

        assert!(exporter.records().is_empty());
    }

    #[tokio::test]
    async fn test_nested_spans_share_trace() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter);
        let source = registry.trace_source("app.activity", "1.0.0");

        {
            let parent = source.start_span("parent", &Context::root());
            let child = source.start_span("child", &parent.context());
            child.set_tag("depth", 1);
        }

        provider.shutdown().await;
        let spans = exporter.records();
        let child = spans.iter().find(|s| s.name == "child").unwrap();
        let parent = spans.iter().find(|s| s.name == "parent").unwrap();
        assert_eq!(child.parent_span_id, Some(parent.span_context.span_id));
        assert_eq!(child.tag("depth"), Some(&Value::I64(1)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter);

        assert!(!provider.shutdown().await.already_disposed);
        assert!(provider.shutdown().await.already_disposed);
        assert!(exporter.is_shut_down());
    }
}
