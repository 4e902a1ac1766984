// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics provider.
//!
//! Reads the cumulative totals of every counter in its bound metric sources
//! on a fixed interval and hands the snapshot to each exporter of its chain.
//! Counters keep accumulating in the registry regardless; once the provider
//! is disposed nothing reads them any more.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::chain::{deadline_after, ExporterChain, ExporterReport};
use super::state::{ProviderState, StateCell};
use super::ProviderShutdown;
use crate::config::{DEFAULT_EXPORT_INTERVAL_MS, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use crate::exporter::{Batch, BoxedExporter};
use crate::instrument::{InstrumentationRegistry, MetricData};
use crate::resource::Resource;

const SIGNAL: &str = "metrics";

/// Builder for a [`MeterProvider`]. This is the `Building` state: sources
/// and exporters can be added, nothing is collected yet.
pub struct MeterProviderBuilder {
    registry: InstrumentationRegistry,
    sources: Vec<String>,
    exporters: Vec<BoxedExporter<MetricData>>,
    interval: Duration,
    resource: Resource,
    shutdown_timeout: Duration,
}

impl MeterProviderBuilder {
    pub fn new(registry: InstrumentationRegistry) -> Self {
        Self {
            registry,
            sources: Vec::new(),
            exporters: Vec::new(),
            interval: Duration::from_millis(DEFAULT_EXPORT_INTERVAL_MS),
            resource: Resource::default(),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }

    /// Listen to the metric source called `name`.
    ///
    /// The source need not be declared yet; it is looked up at every
    /// collection.
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

    /// Append an exporter to the chain.
    pub fn with_exporter(mut self, exporter: BoxedExporter<MetricData>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn with_exporters(mut self, exporters: Vec<BoxedExporter<MetricData>>) -> Self {
        self.exporters.extend(exporters);
        self
    }

    /// Collection interval. Zero is raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    /// Upper bound for `force_flush` and `shutdown`.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn state(&self) -> ProviderState {
        ProviderState::Building
    }

    /// Start the exporter workers and the collection timer.
    ///
    /// Must be called inside a Tokio runtime. The exporter chain is fixed
    /// from here on.
    pub fn build(self) -> MeterProvider {
        let chain = ExporterChain::spawn(SIGNAL, self.exporters);
        let exporter_names = chain.names();

        let inner = Arc::new(MeterInner {
            registry: self.registry,
            sources: self.sources,
            resource: Arc::new(self.resource),
            sequence: AtomicU64::new(0),
            chain: Mutex::new(Some(chain)),
        });

        let ticker = tokio::spawn(run_ticker(Arc::clone(&inner), self.interval));

        info!(
            sources = ?inner.sources,
            exporters = ?exporter_names,
            interval_ms = self.interval.as_millis() as u64,
            "Meter provider running"
        );

        MeterProvider {
            inner,
            exporter_names,
            ticker: StdMutex::new(Some(ticker)),
            state: StateCell::new(ProviderState::Running),
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

struct MeterInner {
    registry: InstrumentationRegistry,
    sources: Vec<String>,
    resource: Arc<Resource>,
    sequence: AtomicU64,
    chain: Mutex<Option<ExporterChain<MetricData>>>,
}

impl MeterInner {
    /// Snapshot the bound sources and dispatch a batch. Returns the number
    /// of metrics dispatched.
    fn collect_into(&self, chain: &ExporterChain<MetricData>) -> usize {
        let metrics = self.registry.collect_metrics(&self.sources);
        if metrics.is_empty() {
            return 0;
        }

        let count = metrics.len();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        chain.dispatch(Batch::new(Arc::clone(&self.resource), metrics, sequence));
        count
    }
}

async fn run_ticker(inner: Arc<MeterInner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let guard = inner.chain.lock().await;
        match guard.as_ref() {
            Some(chain) => {
                inner.collect_into(chain);
            }
            None => break,
        }
    }
}

/// A running metrics provider.
pub struct MeterProvider {
    inner: Arc<MeterInner>,
    exporter_names: Vec<String>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
    state: StateCell,
    shutdown_timeout: Duration,
}

impl MeterProvider {
    pub fn builder(registry: InstrumentationRegistry) -> MeterProviderBuilder {
        MeterProviderBuilder::new(registry)
    }

    pub fn state(&self) -> ProviderState {
        self.state.get()
    }

    /// Metric source names this provider reads.
    pub fn sources(&self) -> &[String] {
        &self.inner.sources
    }

    /// Exporter names in chain order.
    pub fn exporter_names(&self) -> &[String] {
        &self.exporter_names
    }

    /// Collect now and wait until every exporter has processed the batch.
    ///
    /// Bounded by the shutdown timeout. Returns no reports once the provider
    /// is no longer running.
    pub async fn force_flush(&self) -> Vec<ExporterReport> {
        if self.state() != ProviderState::Running {
            return Vec::new();
        }

        let deadline = deadline_after(self.shutdown_timeout);
        let guard = self.inner.chain.lock().await;
        match guard.as_ref() {
            Some(chain) => {
                self.inner.collect_into(chain);
                chain.flush(deadline).await
            }
            None => Vec::new(),
        }
    }

    /// Stop collecting, export one final snapshot and close every exporter.
    ///
    /// Blocks until each exporter has acknowledged or the shutdown timeout
    /// has elapsed. Calling it again returns an empty report.
    pub async fn shutdown(&self) -> ProviderShutdown {
        if !self
            .state
            .transition(ProviderState::Running, ProviderState::Disposing)
        {
            debug!("Meter provider already disposed");
            return ProviderShutdown::already(SIGNAL);
        }

        let started = Instant::now();
        self.stop_ticker();

        // A concurrent flush may hold the chain; the final batch gets the
        // full timeout once it is released.
        let chain = self.inner.chain.lock().await.take();
        let deadline = deadline_after(self.shutdown_timeout);
        let exporters = match chain {
            Some(chain) => {
                let flushed = self.inner.collect_into(&chain);
                debug!(metrics = flushed, "Final metric collection dispatched");
                chain.shutdown(deadline).await
            }
            None => Vec::new(),
        };

        self.state.set(ProviderState::Disposed);
        let report = ProviderShutdown::new(SIGNAL, exporters, started.elapsed());
        info!(elapsed_ms = report.elapsed.as_millis() as u64, "Meter provider disposed");
        report
    }

    fn stop_ticker(&self) {
        if let Some(ticker) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            ticker.abort();
        }
    }
}

impl Drop for MeterProvider {
    fn drop(&mut self) {
        if !self
            .state
            .transition(ProviderState::Running, ProviderState::Disposing)
        {
            return;
        }

        warn!("Meter provider dropped without shutdown; flushing in the background");
        self.stop_ticker();

        let Ok(mut guard) = self.inner.chain.try_lock() else {
            return;
        };
        let Some(chain) = guard.take() else {
            return;
        };
        self.inner.collect_into(&chain);

        // Without a runtime the chain is dropped; workers still drain their
        // queues but exporters are not closed.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let deadline = deadline_after(self.shutdown_timeout);
            runtime.spawn(async move {
                chain.shutdown(deadline).await;
            });
        }
        self.state.set(ProviderState::Disposed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::InMemoryExporter;
    use crate::instrument::NumberValue;
    use crate::provider::ExporterOutcome;

    fn provider_with(
        registry: &InstrumentationRegistry,
        exporter: &InMemoryExporter<MetricData>,
        interval: Duration,
    ) -> MeterProvider {
        MeterProvider::builder(registry.clone())
            .add_source("app")
            .with_exporter(Arc::new(exporter.clone()))
            .with_interval(interval)
            .with_shutdown_timeout(Duration::from_secs(5))
            .build()
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_measurements() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter, Duration::from_secs(3600));

        let counter = registry.create_counter::<u64>("app", "requests", "").unwrap();
        counter.add(1, &[]);
        counter.add(1, &[]);
        counter.add(1, &[]);

        let report = provider.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(provider.state(), ProviderState::Disposed);

        let records = exporter.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].points[0].value, NumberValue::Int(3));
        assert!(exporter.is_shut_down());
    }

    #[tokio::test]
    async fn test_periodic_export() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter, Duration::from_millis(20));

        registry.create_counter::<u64>("app", "requests", "").unwrap().add(5, &[]);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(exporter.batch_count() >= 2);
        let sequences: Vec<u64> = exporter.batches().iter().map(|b| b.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_unbound_and_empty_sources_are_not_exported() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter, Duration::from_secs(3600));

        registry.create_counter::<u64>("other", "requests", "").unwrap().add(1, &[]);
        registry.create_counter::<u64>("app", "idle", "").unwrap();

        assert!(provider.force_flush().await.iter().all(|r| r.outcome == ExporterOutcome::Flushed));
        assert_eq!(exporter.batch_count(), 0);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter, Duration::from_secs(3600));

        let first = provider.shutdown().await;
        let second = provider.shutdown().await;

        assert!(!first.already_disposed);
        assert!(second.already_disposed);
        assert!(second.exporters.is_empty());
        assert!(provider.force_flush().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_export_after_dispose() {
        let registry = InstrumentationRegistry::new();
        let exporter = InMemoryExporter::new("mem");
        let provider = provider_with(&registry, &exporter, Duration::from_millis(10));
        let counter = registry.create_counter::<u64>("app", "requests", "").unwrap();

        provider.shutdown().await;
        let exported = exporter.batch_count();

        counter.add(10, &[]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(exporter.batch_count(), exported);
    }

    #[tokio::test]
    async fn test_shutdown_during_flush_gets_full_timeout() {
        let registry = InstrumentationRegistry::new();
        let slow = InMemoryExporter::new("slow").with_delay(Duration::from_millis(300));
        let provider = MeterProvider::builder(registry.clone())
            .add_source("app")
            .with_exporter(Arc::new(slow.clone()))
            .with_interval(Duration::from_secs(3600))
            .with_shutdown_timeout(Duration::from_millis(800))
            .build();

        let counter = registry.create_counter::<u64>("app", "requests", "").unwrap();
        counter.add(1, &[]);

        let (flushed, report) = tokio::join!(provider.force_flush(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.add(1, &[]);
            provider.shutdown().await
        });

        assert!(flushed.iter().all(|r| r.outcome == ExporterOutcome::Flushed));
        assert_eq!(report.exporters[0].outcome, ExporterOutcome::Flushed);
        assert_eq!(slow.batch_count(), 2);
        assert_eq!(slow.records()[1].points[0].value, NumberValue::Int(2));
        assert!(slow.is_shut_down());
    }

    #[tokio::test]
    async fn test_failing_exporter_reported() {
        let registry = InstrumentationRegistry::new();
        let broken = InMemoryExporter::failing("broken");
        let healthy = InMemoryExporter::new("healthy");
        let provider = MeterProvider::builder(registry.clone())
            .add_source("app")
            .with_exporters(vec![Arc::new(broken.clone()), Arc::new(healthy.clone())])
            .with_interval(Duration::from_secs(3600))
            .build();

        registry.create_counter::<u64>("app", "requests", "").unwrap().add(1, &[]);
        let report = provider.shutdown().await;

        assert!(!report.is_clean());
        assert!(matches!(report.exporters[0].outcome, ExporterOutcome::Failed(_)));
        assert_eq!(report.exporters[1].outcome, ExporterOutcome::Flushed);
        assert_eq!(healthy.batch_count(), 1);
    }
}
