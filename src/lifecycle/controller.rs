// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lifecycle controller.
//!
//! [`Telemetry`] owns everything built at startup and is threaded to the
//! shutdown path explicitly; there are no global provider handles.
//!
//! Startup: declare sources, build the metrics provider, build the trace
//! provider, then spawn the forwarding agent without waiting for it.
//! Shutdown: dispose the trace provider, then the metrics provider, then
//! stop the agent. Each disposal completes, flush included, before the next
//! one starts.

use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::agent::{AgentState, ForwardingAgent};
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::exporter::{build_exporters, BoxedExporter};
use crate::instrument::{InstrumentationRegistry, MetricData, SpanData};
use crate::provider::{MeterProvider, ProviderShutdown, TracerProvider};
use crate::resource::Resource;

/// Grace period for the agent to exit after the providers are disposed.
const AGENT_STOP_GRACE: Duration = Duration::from_secs(2);

struct AgentHandle {
    agent: ForwardingAgent,
    startup: JoinHandle<()>,
}

/// Everything the telemetry subsystem owns at runtime.
pub struct Telemetry {
    config: TelemetryConfig,
    registry: InstrumentationRegistry,
    meter: MeterProvider,
    tracer: TracerProvider,
    agent: Option<AgentHandle>,
    started: Instant,
}

/// Outcome of [`Telemetry::shutdown`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    pub traces: ProviderShutdown,
    pub metrics: ProviderShutdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentState>,
    pub uptime_ms: u64,
}

impl ShutdownReport {
    /// Both providers flushed every exporter.
    pub fn is_clean(&self) -> bool {
        self.traces.is_clean() && self.metrics.is_clean()
    }
}

impl Telemetry {
    /// Validate `config`, then build both providers with the exporters it
    /// describes and spawn the forwarding agent if one is enabled.
    ///
    /// Must be called inside a Tokio runtime. Fails only on configuration
    /// errors; nothing has been started when it does.
    pub fn start(config: TelemetryConfig) -> Result<Self> {
        config.validate().context("Invalid telemetry configuration")?;

        let metric_exporters = build_exporters::<MetricData>(&config.metrics.exporters, &config.endpoint)
            .context("Failed to build metric exporters")?;
        let span_exporters = build_exporters::<SpanData>(&config.traces.exporters, &config.endpoint)
            .context("Failed to build span exporters")?;

        Self::start_with_exporters(config, metric_exporters, span_exporters)
    }

    /// Like [`Telemetry::start`], with explicit exporter chains instead of
    /// the ones in `config`.
    pub fn start_with_exporters(
        config: TelemetryConfig,
        metric_exporters: Vec<BoxedExporter<MetricData>>,
        span_exporters: Vec<BoxedExporter<SpanData>>,
    ) -> Result<Self> {
        config.validate().context("Invalid telemetry configuration")?;
        let started = Instant::now();

        // 1. Registry and declared sources.
        let registry = InstrumentationRegistry::new();
        declare_sources(&registry, &config);
        let resource = Resource::new(&config.service, &config.resource_attributes);
        let shutdown_timeout = Duration::from_millis(config.shutdown_timeout_ms);

        // 2. Metrics provider.
        let meter = MeterProvider::builder(registry.clone())
            .add_sources(config.metrics.sources.iter().cloned())
            .with_exporters(metric_exporters)
            .with_interval(Duration::from_millis(config.metrics.export_interval_ms))
            .with_resource(resource.clone())
            .with_shutdown_timeout(shutdown_timeout)
            .build();

        // 3. Trace provider.
        let tracer = TracerProvider::builder(registry.clone())
            .add_sources(config.traces.sources.iter().cloned())
            .with_exporters(span_exporters)
            .with_max_batch_size(config.traces.max_batch_size)
            .with_resource(resource)
            .with_shutdown_timeout(shutdown_timeout)
            .build();

        // 4. Forwarding agent, not awaited.
        let agent = config
            .agent
            .as_ref()
            .filter(|agent| agent.enabled)
            .map(|agent_config| {
                let agent = ForwardingAgent::new(agent_config.clone());
                let starting = agent.clone();
                let startup = tokio::spawn(async move {
                    if let Err(e) = starting.start().await {
                        warn!(error = %e, "Forwarding agent unavailable; exporting directly");
                    }
                });
                AgentHandle { agent, startup }
            });

        info!(
            service = %config.service.name,
            version = %config.service.version,
            endpoint = %config.endpoint,
            agent = agent.is_some(),
            "Telemetry started"
        );

        Ok(Self {
            config,
            registry,
            meter,
            tracer,
            agent,
            started,
        })
    }

    /// Registry the workload emits into.
    pub fn registry(&self) -> &InstrumentationRegistry {
        &self.registry
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn meter_provider(&self) -> &MeterProvider {
        &self.meter
    }

    pub fn tracer_provider(&self) -> &TracerProvider {
        &self.tracer
    }

    /// Dispose the trace provider, then the metrics provider, then stop
    /// the agent.
    ///
    /// Each provider is bounded by the configured shutdown timeout and
    /// disposal proceeds even if an exporter fails or times out.
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!("Shutting down telemetry");

        let traces = self.tracer.shutdown().await;
        log_problems(&traces);

        let metrics = self.meter.shutdown().await;
        log_problems(&metrics);

        let agent = match self.agent.take() {
            Some(handle) => Some(stop_agent(handle).await),
            None => None,
        };

        ShutdownReport {
            traces,
            metrics,
            agent,
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Declare every configured source with its version.
///
/// Names bound to the trace provider become trace sources; all others
/// become metric sources.
fn declare_sources(registry: &InstrumentationRegistry, config: &TelemetryConfig) {
    for source in &config.sources {
        let traced = config.traces.sources.contains(&source.name);
        let metered = config.metrics.sources.contains(&source.name);

        if traced {
            registry.trace_source(&source.name, &source.version);
        }
        if metered || !traced {
            registry.metric_source(&source.name, &source.version);
        }
    }
}

async fn stop_agent(handle: AgentHandle) -> AgentState {
    // Startup may still be in flight; a half-started agent is killed on drop.
    if !handle.startup.is_finished() {
        handle.startup.abort();
    }

    if let Err(e) = handle.agent.stop(AGENT_STOP_GRACE).await {
        debug!(error = %e, "Forwarding agent not stopped");
    }
    handle.agent.state().await
}

fn log_problems(report: &ProviderShutdown) {
    for problem in report.problems() {
        warn!(
            signal = report.signal,
            exporter = %problem.exporter,
            outcome = %problem.outcome,
            "Exporter did not flush cleanly"
        );
    }
}
