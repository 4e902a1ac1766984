// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Signalpost - process-local telemetry with flush-before-exit shutdown.
//!
//! Counters and spans are emitted into an in-memory registry, batched by a
//! metrics provider and a trace provider, and fanned out to every exporter
//! attached to each provider. Shutdown disposes the trace provider, then the
//! metrics provider, and returns only once each has flushed (or timed out).
//!
//! # Architecture
//!
//! - [`error`] - Error types and result aliases
//! - [`config`] - Configuration loading, merging and validation
//! - [`logging`] - Diagnostic logging setup
//! - [`resource`] - Service identity attached to every batch
//! - [`instrument`] - Instrumentation registry, counters and spans
//! - [`exporter`] - Exporter trait, OTLP/vendor/console/in-memory sinks, retry
//! - [`provider`] - Metrics and trace providers and their exporter chains
//! - [`lifecycle`] - Startup/shutdown controller and the forwarding agent
//! - [`workload`] - Demo greeter workload
//!
//! # Example
//!
//! ```rust,ignore
//! use signalpost::config::TelemetryConfig;
//! use signalpost::instrument::Context;
//! use signalpost::Telemetry;
//!
//! let mut config = TelemetryConfig::default();
//! config.add_metric_source("app", "1.0.0");
//! config.add_trace_source("app.activity", "1.0.0");
//!
//! let telemetry = Telemetry::start(config)?;
//! let requests = telemetry.registry().create_counter::<u64>("app", "requests", "")?;
//! requests.add(1, &[]);
//! telemetry.registry().start_span("app.activity", "handle", &Context::root()).end();
//!
//! let report = telemetry.shutdown().await;
//! assert!(report.is_clean());
//! ```

pub mod config;
pub mod error;
pub mod exporter;
pub mod instrument;
pub mod lifecycle;
pub mod logging;
pub mod provider;
pub mod resource;
pub mod workload;

pub use error::{AgentError, ConfigError, EmitError, ExportError, InstrumentError, Result};
pub use exporter::{Batch, BoxedExporter, Exporter};
pub use instrument::{Context, Counter, InstrumentationRegistry, Span};
pub use lifecycle::{ShutdownReport, Telemetry};
pub use provider::{MeterProvider, ProviderShutdown, ProviderState, TracerProvider};
pub use resource::Resource;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
