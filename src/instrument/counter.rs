// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cumulative counter instruments.
//!
//! A counter is shared by every thread that emits into it. Each distinct tag
//! set gets its own accumulator cell, updated with a single atomic operation,
//! so the exported total always equals the sum of accepted deltas no matter
//! how adds interleave.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::attributes::{AttributeSet, KeyValue};
use super::registry::InstrumentationScope;
use crate::error::EmitError;

/// Numeric domain of a counter, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberDomain {
    Integer,
    Float,
}

impl NumberDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
        }
    }
}

impl fmt::Display for NumberDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accumulated counter value as read at export time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NumberValue {
    Int(u64),
    Double(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Double(v) => *v,
        }
    }
}

impl fmt::Display for NumberValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u64 {}
    impl Sealed for f64 {}
}

/// Numeric types a [`Counter`] can accumulate.
pub trait CounterValue: sealed::Sealed + Copy + Send + Sync + fmt::Debug + 'static {
    const DOMAIN: NumberDomain;

    /// Reject deltas that would break cumulative semantics.
    fn check(self, counter: &str) -> Result<(), EmitError>;

    /// Add `self` into the raw cell.
    ///
    /// A delta that would push the total past the representable range is
    /// rejected and leaves the cell untouched.
    fn accumulate(self, cell: &AtomicU64, counter: &str) -> Result<(), EmitError>;

    /// Decode the raw cell.
    fn read(cell: &AtomicU64) -> NumberValue;
}

impl CounterValue for u64 {
    const DOMAIN: NumberDomain = NumberDomain::Integer;

    fn check(self, _counter: &str) -> Result<(), EmitError> {
        Ok(())
    }

    fn accumulate(self, cell: &AtomicU64, counter: &str) -> Result<(), EmitError> {
        cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| total.checked_add(self))
            .map(|_| ())
            .map_err(|_| EmitError::Overflow(counter.to_string()))
    }

    fn read(cell: &AtomicU64) -> NumberValue {
        NumberValue::Int(cell.load(Ordering::Relaxed))
    }
}

impl CounterValue for f64 {
    const DOMAIN: NumberDomain = NumberDomain::Float;

    fn check(self, counter: &str) -> Result<(), EmitError> {
        if !self.is_finite() {
            return Err(EmitError::NonFinite(counter.to_string()));
        }
        if self < 0.0 {
            return Err(EmitError::NegativeDelta(counter.to_string(), self));
        }
        Ok(())
    }

    fn accumulate(self, cell: &AtomicU64, counter: &str) -> Result<(), EmitError> {
        cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            let total = f64::from_bits(bits) + self;
            total.is_finite().then_some(total.to_bits())
        })
        .map(|_| ())
        .map_err(|_| EmitError::Overflow(counter.to_string()))
    }

    fn read(cell: &AtomicU64) -> NumberValue {
        NumberValue::Double(f64::from_bits(cell.load(Ordering::Relaxed)))
    }
}

/// One accumulated series of a counter (one tag set).
#[derive(Debug)]
struct Accumulator {
    cell: AtomicU64,
    start_time: DateTime<Utc>,
}

/// State shared by every handle to the same logical counter.
#[derive(Debug)]
pub(crate) struct CounterCore {
    name: String,
    description: String,
    domain: NumberDomain,
    series: RwLock<HashMap<AttributeSet, Arc<Accumulator>>>,
}

impl CounterCore {
    pub(crate) fn new(name: &str, description: &str, domain: NumberDomain) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            domain,
            series: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn domain(&self) -> NumberDomain {
        self.domain
    }

    pub(crate) fn description(&self) -> &str {
        &self.description
    }

    fn accumulator(&self, attributes: AttributeSet) -> Arc<Accumulator> {
        if let Some(acc) = self
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&attributes)
        {
            return Arc::clone(acc);
        }

        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(series.entry(attributes).or_insert_with(|| {
            Arc::new(Accumulator {
                cell: AtomicU64::new(0),
                start_time: Utc::now(),
            })
        }))
    }

    /// Read the cumulative value of every series.
    ///
    /// Returns `None` when nothing has been recorded yet.
    pub(crate) fn collect(&self, scope: &InstrumentationScope) -> Option<MetricData> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        if series.is_empty() {
            return None;
        }

        let now = Utc::now();
        let read: fn(&AtomicU64) -> NumberValue = match self.domain {
            NumberDomain::Integer => <u64 as CounterValue>::read,
            NumberDomain::Float => <f64 as CounterValue>::read,
        };

        let mut points: Vec<DataPoint> = series
            .iter()
            .map(|(attributes, acc)| DataPoint {
                attributes: attributes.to_vec(),
                start_time: acc.start_time,
                time: now,
                value: read(&acc.cell),
            })
            .collect();
        points.sort_by_key(|p| p.start_time);

        Some(MetricData {
            scope: scope.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            domain: self.domain,
            points,
        })
    }
}

/// A cumulative, monotonic counter.
///
/// Handles are cheap to clone; clones accumulate into the same series.
pub struct Counter<T: CounterValue> {
    core: Arc<CounterCore>,
    _value: PhantomData<T>,
}

impl<T: CounterValue> Clone for Counter<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _value: PhantomData,
        }
    }
}

impl<T: CounterValue> fmt::Debug for Counter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("name", &self.core.name)
            .field("domain", &self.core.domain)
            .finish()
    }
}

impl<T: CounterValue> Counter<T> {
    pub(crate) fn from_core(core: Arc<CounterCore>) -> Self {
        Self {
            core,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn description(&self) -> &str {
        &self.core.description
    }

    pub fn domain(&self) -> NumberDomain {
        self.core.domain
    }

    /// Add a measurement.
    ///
    /// Rejected deltas are logged and dropped; the caller never sees them.
    /// A delta that would overflow the total is rejected, so the exported
    /// value never goes down.
    pub fn add(&self, delta: T, tags: &[KeyValue]) {
        if let Err(e) = self.try_add(delta, tags) {
            debug!(counter = %self.core.name, error = %e, "Dropped counter measurement");
        }
    }

    /// Add a measurement, reporting rejection.
    pub fn try_add(&self, delta: T, tags: &[KeyValue]) -> Result<(), EmitError> {
        delta.check(&self.core.name)?;
        let acc = self.core.accumulator(AttributeSet::from_tags(tags));
        delta.accumulate(&acc.cell, &self.core.name)
    }

    /// Current cumulative value for one tag set.
    pub fn value(&self, tags: &[KeyValue]) -> Option<NumberValue> {
        let attributes = AttributeSet::from_tags(tags);
        self.core
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&attributes)
            .map(|acc| T::read(&acc.cell))
    }
}

/// Warn when a re-declared counter disagrees on its description.
pub(crate) fn check_description(core: &CounterCore, description: &str) {
    if core.description() != description {
        warn!(
            counter = %core.name,
            existing = %core.description(),
            requested = %description,
            "Counter re-declared with a different description, keeping the first"
        );
    }
}

/// One exported series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub attributes: Vec<KeyValue>,
    pub start_time: DateTime<Utc>,
    pub time: DateTime<Utc>,
    pub value: NumberValue,
}

/// A counter snapshot handed to exporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricData {
    pub scope: InstrumentationScope,
    pub name: String,
    pub description: String,
    pub domain: NumberDomain,
    pub points: Vec<DataPoint>,
}

impl MetricData {
    /// Sum of every series, handy for reports and tests.
    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.value.as_f64()).sum()
    }
}
