// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instrumentation: the registry of named sources and the instruments they
//! hand out.
//!
//! - **Counters**: cumulative numeric series, integer or floating-point
//! - **Spans**: timed, taggable records of a unit of work, nested through an
//!   explicit [`Context`]
//!
//! Every emission call here is synchronous and never touches the network.
//! Counters accumulate in memory until a meter provider reads them; spans
//! are queued to the trace provider when they end.
//!
//! # Usage
//!
//! ```rust,ignore
//! use signalpost::instrument::{Context, InstrumentationRegistry, KeyValue};
//!
//! let registry = InstrumentationRegistry::new();
//! let requests = registry.metric_source("app", "1.0.0").u64_counter("requests", "Requests served")?;
//! requests.add(1, &[KeyValue::new("route", "/")]);
//!
//! let span = registry.start_span("app.activity", "handle", &Context::root());
//! span.set_tag("user", "42");
//! // ended on drop
//! ```

mod attributes;
mod context;
pub mod counter;
mod registry;
pub mod span;

pub use attributes::{AttributeSet, KeyValue, Value};
pub use context::{Context, SpanContext, SpanId, TraceId};
pub use counter::{Counter, CounterValue, DataPoint, MetricData, NumberDomain, NumberValue};
pub use registry::{InstrumentationRegistry, InstrumentationScope, MetricSource, TraceSource};
pub use span::{Span, SpanData, SpanStatus};
