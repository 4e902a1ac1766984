// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scoped trace spans.
//!
//! A [`Span`] is an RAII guard: dropping it ends the span, so an early
//! return, a `?`, or a panic unwinding through the scope still records an
//! end time. Ending hands an immutable [`SpanData`] to the trace provider
//! through a non-blocking channel.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use super::attributes::{KeyValue, Value};
use super::context::{Context, SpanContext, SpanId, TraceId};
use super::registry::InstrumentationScope;

/// Channel end through which finished spans reach the trace provider.
pub(crate) type SpanSink = mpsc::UnboundedSender<SpanData>;

/// Outcome recorded on a span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "message", rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
}

#[derive(Debug)]
struct SpanState {
    tags: Vec<KeyValue>,
    status: SpanStatus,
    ended: bool,
}

#[derive(Debug)]
struct RecordingSpan {
    name: String,
    scope: Arc<InstrumentationScope>,
    span_context: SpanContext,
    parent_span_id: Option<SpanId>,
    start_time: DateTime<Utc>,
    started: Instant,
    state: Mutex<SpanState>,
    sink: SpanSink,
}

/// Handle to an open span.
///
/// Returned by `InstrumentationRegistry::start_span`. When no provider
/// listens to the source the handle is inert: every call is a no-op and
/// [`Span::context`] passes the caller's context through unchanged.
#[derive(Debug)]
pub struct Span {
    recording: Option<RecordingSpan>,
    passthrough: Context,
}

impl Span {
    pub(crate) fn recording(
        name: &str,
        scope: Arc<InstrumentationScope>,
        parent: &Context,
        sink: SpanSink,
    ) -> Self {
        let (trace_id, parent_span_id) = match parent.parent() {
            Some(p) => (p.trace_id, Some(p.span_id)),
            None => (TraceId::random(), None),
        };

        Self {
            recording: Some(RecordingSpan {
                name: name.to_string(),
                scope,
                span_context: SpanContext {
                    trace_id,
                    span_id: SpanId::random(),
                },
                parent_span_id,
                start_time: Utc::now(),
                started: Instant::now(),
                state: Mutex::new(SpanState {
                    tags: Vec::new(),
                    status: SpanStatus::Unset,
                    ended: false,
                }),
                sink,
            }),
            passthrough: *parent,
        }
    }

    pub(crate) fn inert(parent: &Context) -> Self {
        Self {
            recording: None,
            passthrough: *parent,
        }
    }

    /// Whether this span will be exported when it ends.
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Context to pass to child spans.
    pub fn context(&self) -> Context {
        match &self.recording {
            Some(span) => Context::with_parent(span.span_context),
            None => self.passthrough,
        }
    }

    /// Identity of this span, if it is recording.
    pub fn span_context(&self) -> Option<SpanContext> {
        self.recording.as_ref().map(|s| s.span_context)
    }

    /// Set a tag. Keys are unique; setting an existing key replaces its value
    /// in place. No-op once the span has ended.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<Value>) {
        let Some(span) = &self.recording else {
            return;
        };
        let mut state = span.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.ended {
            trace!(span = %span.name, "Ignoring tag on ended span");
            return;
        }

        let key = key.into();
        let value = value.into();
        match state.tags.iter_mut().find(|kv| kv.key == key) {
            Some(existing) => existing.value = value,
            None => state.tags.push(KeyValue { key, value }),
        }
    }

    /// Record the outcome of the work the span covers. No-op once ended.
    pub fn set_status(&self, status: SpanStatus) {
        let Some(span) = &self.recording else {
            return;
        };
        let mut state = span.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.ended {
            state.status = status;
        }
    }

    /// Set the status from a result, tagging the error message on failure.
    pub fn record_result<T, E: std::fmt::Display>(&self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.set_status(SpanStatus::Ok),
            Err(e) => self.set_status(SpanStatus::Error(e.to_string())),
        }
    }

    /// End the span. Only the first call has any effect.
    pub fn end(&self) {
        let Some(span) = &self.recording else {
            return;
        };

        let (tags, status) = {
            let mut state = span.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.ended {
                return;
            }
            state.ended = true;
            (std::mem::take(&mut state.tags), state.status.clone())
        };

        // End is derived from the monotonic clock so it can never precede start.
        let elapsed = span.started.elapsed();
        let end_time = span.start_time
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());

        let data = SpanData {
            scope: (*span.scope).clone(),
            name: span.name.clone(),
            span_context: span.span_context,
            parent_span_id: span.parent_span_id,
            start_time: span.start_time,
            end_time,
            tags,
            status,
        };

        // A closed receiver means the provider is disposed; the span is dropped.
        if span.sink.send(data).is_err() {
            trace!(span = %span.name, "Trace provider gone, dropping span");
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.end();
    }
}

/// A finished span as handed to exporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanData {
    pub scope: InstrumentationScope,
    pub name: String,
    pub span_context: SpanContext,
    pub parent_span_id: Option<SpanId>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tags: Vec<KeyValue>,
    pub status: SpanStatus,
}

impl SpanData {
    /// `end - start`, never negative.
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn tag(&self, key: &str) -> Option<&Value> {
        self.tags.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }
}
