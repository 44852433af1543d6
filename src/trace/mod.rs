//! # Distributed Tracing
//!
//! Spans for the order workflow and the context that links them across the
//! broker.
//!
//! The producing side opens a root span, injects its [`SpanContext`] into the
//! outgoing message properties and finishes the span when the publish returns.
//! The consuming side extracts that context and opens a child span in the same
//! trace. The child holds copied ids only, so the two spans can finish in any
//! order and in different processes.

mod context;
mod reporter;
mod span;
mod tracer;

pub use context::{SpanContext, SpanId, TraceId};
pub use reporter::{InMemoryReporter, LoggingReporter, Reporter};
pub use span::{FinishedSpan, Span};
pub use tracer::{Sampler, Tracer};
