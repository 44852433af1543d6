//! Span reporters.
//!
//! A reporter receives every finished, sampled span. [`LoggingReporter`] writes
//! spans out as structured `tracing` events addressed to the configured
//! collector; [`InMemoryReporter`] keeps them for assertions.

use super::span::FinishedSpan;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

pub trait Reporter: Send + Sync {
    fn report(&self, span: FinishedSpan);

    /// Flushes and releases the reporter. Called once, by `Tracer::close`.
    fn close(&self) {}
}

/// Emits finished spans through the application log.
#[derive(Debug)]
pub struct LoggingReporter {
    collector: String,
    log_spans: bool,
    reported: AtomicU64,
}

impl LoggingReporter {
    pub fn new(collector: impl Into<String>, log_spans: bool) -> Self {
        Self {
            collector: collector.into(),
            log_spans,
            reported: AtomicU64::new(0),
        }
    }

    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

impl Reporter for LoggingReporter {
    fn report(&self, span: FinishedSpan) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        if self.log_spans {
            info!(
                collector = %self.collector,
                service = %span.service,
                span = %span.name,
                trace_id = %span.context.trace_id,
                span_id = %span.context.span_id,
                parent_id = ?span.context.parent_id.map(|p| p.to_string()),
                duration_ms = span.duration().num_milliseconds(),
                "Reporting span"
            );
        }
    }

    fn close(&self) {
        info!(collector = %self.collector, reported = self.reported(), "Reporter closed");
    }
}

/// Collects finished spans in memory.
#[derive(Debug, Default)]
pub struct InMemoryReporter {
    spans: Mutex<Vec<FinishedSpan>>,
    closed: AtomicBool,
}

impl InMemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// All finished spans with the given name.
    pub fn named(&self, name: &str) -> Vec<FinishedSpan> {
        self.spans()
            .into_iter()
            .filter(|s| s.name == name)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Reporter for InMemoryReporter {
    fn report(&self, span: FinishedSpan) {
        self.spans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(span);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
