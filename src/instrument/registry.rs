// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instrumentation registry.
//!
//! Named metric and trace sources live here for the whole process. Providers
//! bind to sources by name: the meter provider reads the counters of its
//! bound metric sources at collection time, and the trace provider installs
//! a span sink for each bound trace source. A trace source without a sink
//! hands out inert spans.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use super::context::Context;
use super::counter::{check_description, Counter, CounterCore, CounterValue, MetricData};
use super::span::{Span, SpanSink};
use crate::error::InstrumentError;

/// Identity of an instrumentation source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: String,
}

impl InstrumentationScope {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for InstrumentationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.version)
        }
    }
}

/// A named source of counters.
#[derive(Debug)]
pub struct MetricSource {
    scope: InstrumentationScope,
    counters: RwLock<HashMap<String, Arc<CounterCore>>>,
}

impl MetricSource {
    fn new(scope: InstrumentationScope) -> Self {
        Self {
            scope,
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Create or look up a counter.
    ///
    /// Declaring the same name twice with the same domain returns a handle to
    /// the same series. Declaring it with the other domain is an error.
    pub fn counter<T: CounterValue>(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Counter<T>, InstrumentError> {
        if name.trim().is_empty() {
            return Err(InstrumentError::EmptyName);
        }

        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(core) = counters.get(name) {
            if core.domain() != T::DOMAIN {
                return Err(InstrumentError::DomainConflict {
                    source_name: self.scope.name.clone(),
                    counter: name.to_string(),
                    existing: core.domain().as_str(),
                    requested: T::DOMAIN.as_str(),
                });
            }
            check_description(core, description);
            return Ok(Counter::from_core(Arc::clone(core)));
        }

        debug!(source = %self.scope, counter = %name, domain = %T::DOMAIN, "Declared counter");
        let core = Arc::new(CounterCore::new(name, description, T::DOMAIN));
        counters.insert(name.to_string(), Arc::clone(&core));
        Ok(Counter::from_core(core))
    }

    /// Create or look up an integer counter.
    pub fn u64_counter(&self, name: &str, description: &str) -> Result<Counter<u64>, InstrumentError> {
        self.counter::<u64>(name, description)
    }

    /// Create or look up a floating-point counter.
    pub fn f64_counter(&self, name: &str, description: &str) -> Result<Counter<f64>, InstrumentError> {
        self.counter::<f64>(name, description)
    }

    /// Snapshot every counter that has recorded something, ordered by name.
    pub fn collect(&self) -> Vec<MetricData> {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        let mut data: Vec<MetricData> = counters
            .values()
            .filter_map(|core| core.collect(&self.scope))
            .collect();
        data.sort_by(|a, b| a.name.cmp(&b.name));
        data
    }
}

/// A named source of spans.
#[derive(Debug, Clone)]
pub struct TraceSource {
    scope: Arc<InstrumentationScope>,
    registry: InstrumentationRegistry,
}

impl TraceSource {
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Start a span under `parent`. Inert when no trace provider listens.
    pub fn start_span(&self, name: &str, parent: &Context) -> Span {
        match self.registry.sink_for(&self.scope.name) {
            Some(sink) => Span::recording(name, Arc::clone(&self.scope), parent, sink),
            None => Span::inert(parent),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    metric_sources: RwLock<HashMap<String, Arc<MetricSource>>>,
    trace_sources: RwLock<HashMap<String, Arc<InstrumentationScope>>>,
    trace_sinks: RwLock<HashMap<String, SpanSink>>,
}

/// Registry of every instrumentation source in the process.
///
/// Cheap to clone; clones share the same sources.
#[derive(Debug, Clone, Default)]
pub struct InstrumentationRegistry {
    inner: Arc<RegistryInner>,
}

impl InstrumentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a metric source, or return the existing one with that name.
    pub fn metric_source(&self, name: &str, version: &str) -> Arc<MetricSource> {
        if let Some(source) = self
            .inner
            .metric_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            warn_version_mismatch(&source.scope, version);
            return Arc::clone(source);
        }

        let mut sources = self
            .inner
            .metric_sources
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sources.entry(name.to_string()).or_insert_with(|| {
            debug!(source = %name, version = %version, "Declared metric source");
            Arc::new(MetricSource::new(InstrumentationScope::new(name, version)))
        }))
    }

    /// Declare a trace source, or return the existing one with that name.
    pub fn trace_source(&self, name: &str, version: &str) -> TraceSource {
        let scope = {
            let mut sources = self
                .inner
                .trace_sources
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match sources.get(name) {
                Some(scope) => {
                    warn_version_mismatch(scope, version);
                    Arc::clone(scope)
                }
                None => {
                    debug!(source = %name, version = %version, "Declared trace source");
                    let scope = Arc::new(InstrumentationScope::new(name, version));
                    sources.insert(name.to_string(), Arc::clone(&scope));
                    scope
                }
            }
        };

        TraceSource {
            scope,
            registry: self.clone(),
        }
    }

    /// Create or look up a counter on a declared metric source.
    ///
    /// The source is declared with an empty version if it does not exist yet.
    pub fn create_counter<T: CounterValue>(
        &self,
        source: &str,
        counter: &str,
        description: &str,
    ) -> Result<Counter<T>, InstrumentError> {
        self.metric_source(source, "").counter::<T>(counter, description)
    }

    /// Start a span on a trace source.
    ///
    /// Returns an inert handle when no trace provider is subscribed to
    /// `source`.
    pub fn start_span(&self, source: &str, name: &str, parent: &Context) -> Span {
        let Some(sink) = self.sink_for(source) else {
            return Span::inert(parent);
        };

        let scope = self
            .inner
            .trace_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
            .unwrap_or_else(|| Arc::new(InstrumentationScope::new(source, "")));
        Span::recording(name, scope, parent, sink)
    }

    /// Whether a trace provider currently listens to `source`.
    pub fn is_traced(&self, source: &str) -> bool {
        self.sink_for(source).is_some()
    }

    fn existing_metric_source(&self, name: &str) -> Option<Arc<MetricSource>> {
        self.inner
            .metric_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn sink_for(&self, source: &str) -> Option<SpanSink> {
        self.inner
            .trace_sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .filter(|sink| !sink.is_closed())
            .cloned()
    }

    /// Route spans of `sources` to `sink`.
    pub(crate) fn subscribe_traces(&self, sources: &[String], sink: &SpanSink) {
        let mut sinks = self
            .inner
            .trace_sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for source in sources {
            if let Some(previous) = sinks.insert(source.clone(), sink.clone()) {
                if !previous.same_channel(sink) && !previous.is_closed() {
                    warn!(source = %source, "Trace source re-bound to a new provider");
                }
            }
        }
    }

    /// Stop routing spans of `sources` to `sink`. Bindings owned by another
    /// provider are left alone.
    pub(crate) fn unsubscribe_traces(&self, sources: &[String], sink: &SpanSink) {
        let mut sinks = self
            .inner
            .trace_sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for source in sources {
            if sinks.get(source).is_some_and(|bound| bound.same_channel(sink)) {
                sinks.remove(source);
            }
        }
    }

    /// Snapshot the counters of the named metric sources.
    ///
    /// Names with no declared source yield nothing; they may be declared later.
    pub(crate) fn collect_metrics(&self, sources: &[String]) -> Vec<MetricData> {
        sources
            .iter()
            .filter_map(|name| self.existing_metric_source(name))
            .flat_map(|source| source.collect())
            .collect()
    }

    /// Names of every declared metric source.
    pub fn metric_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .metric_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

fn warn_version_mismatch(scope: &InstrumentationScope, version: &str) {
    if !version.is_empty() && scope.version != version {
        warn!(
            source = %scope.name,
            existing = %scope.version,
            requested = %version,
            "Source re-declared with a different version, keeping the first"
        );
    }
}
