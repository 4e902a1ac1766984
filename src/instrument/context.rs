// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Trace identifiers and explicit parent-span context.
//!
//! Parentage is never inferred from thread-local state. A unit of work that
//! wants its spans nested passes the [`Context`] of the enclosing span to
//! every `start_span` call it makes.

use std::fmt;

use serde::{Serialize, Serializer};
use uuid::Uuid;

/// 16-byte trace identifier shared by every span of one logical operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn random() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    /// Lowercase hex, as used on the wire.
    pub fn to_hex(self) -> String {
        hex_encode(&self.0)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self.to_hex())
    }
}

/// 8-byte span identifier, unique within a trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl SpanId {
    /// Generate a new random span ID.
    pub fn random() -> Self {
        let uuid = Uuid::new_v4();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&uuid.as_bytes()[..8]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(self) -> String {
        hex_encode(&self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self.to_hex())
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Identity of a span as seen by its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// Opaque context value threaded through a unit of work.
///
/// `Context::root()` starts a new trace; `span.context()` makes every span
/// started with it a child of `span`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    parent: Option<SpanContext>,
}

impl Context {
    /// A context with no parent span.
    pub fn root() -> Self {
        Self { parent: None }
    }

    /// A context whose spans become children of `parent`.
    pub fn with_parent(parent: SpanContext) -> Self {
        Self {
            parent: Some(parent),
        }
    }

    /// The span that new spans will be nested under, if any.
    pub fn parent(&self) -> Option<SpanContext> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
