//! Span contexts and their propagation header.
//!
//! A [`SpanContext`] is the part of a span that crosses process and queue
//! boundaries: trace id, span id, parent span id and the sampling flag. It is
//! carried in message properties under [`SpanContext::HEADER`] using the
//! `trace:span:parent:flags` hex layout.

use std::collections::HashMap;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub u128);

impl TraceId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().as_u128())
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

impl SpanId {
    pub fn random() -> Self {
        let (high, low) = uuid::Uuid::new_v4().as_u64_pair();
        // zero means "no parent" on the wire
        Self((high ^ low).max(1))
    }
}

impl Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity of one span, copied (never borrowed) by its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_id: Option<SpanId>,
    pub sampled: bool,
}

impl SpanContext {
    /// Property key the context travels under.
    pub const HEADER: &'static str = "uber-trace-id";

    pub fn to_header(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.trace_id,
            self.span_id,
            self.parent_id.unwrap_or(SpanId(0)),
            u8::from(self.sampled)
        )
    }

    pub fn from_header(value: &str) -> Option<Self> {
        let mut parts = value.trim().split(':');
        let trace_id = u128::from_str_radix(parts.next()?, 16).ok()?;
        let span_id = u64::from_str_radix(parts.next()?, 16).ok()?;
        let parent_id = u64::from_str_radix(parts.next()?, 16).ok()?;
        let flags = u8::from_str_radix(parts.next()?, 16).ok()?;
        if parts.next().is_some() || trace_id == 0 || span_id == 0 {
            return None;
        }

        Some(Self {
            trace_id: TraceId(trace_id),
            span_id: SpanId(span_id),
            parent_id: (parent_id != 0).then_some(SpanId(parent_id)),
            sampled: flags & 1 == 1,
        })
    }

    pub fn inject(&self, carrier: &mut HashMap<String, String>) {
        carrier.insert(Self::HEADER.to_string(), self.to_header());
    }

    /// Reads a context from `carrier`; absent or malformed headers yield `None`.
    pub fn extract(carrier: &HashMap<String, String>) -> Option<Self> {
        carrier.get(Self::HEADER).and_then(|v| Self::from_header(v))
    }
}
