//! Spans.

use super::context::SpanContext;
use super::tracer::TracerInner;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One traced operation.
///
/// A span only knows its parent through the copied ids in its
/// [`SpanContext`]; finishing or dropping either side never affects the other.
pub struct Span {
    name: String,
    context: SpanContext,
    start: DateTime<Utc>,
    tags: Mutex<Vec<(String, String)>>,
    finished: AtomicBool,
    tracer: Arc<TracerInner>,
}

/// The immutable record handed to a reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedSpan {
    pub service: String,
    pub name: String,
    pub context: SpanContext,
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub tags: Vec<(String, String)>,
}

impl FinishedSpan {
    pub fn duration(&self) -> chrono::Duration {
        self.finish - self.start
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl Span {
    pub(super) fn new(name: String, context: SpanContext, tracer: Arc<TracerInner>) -> Self {
        Self {
            name,
            context,
            start: Utc::now(),
            tags: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
            tracer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> SpanContext {
        self.context
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl ToString) {
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.into(), value.to_string()));
    }

    /// Stamps the finish time and reports the span.
    ///
    /// Returns `false` (and reports nothing) if the span was already finished.
    pub fn finish(&self) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        let tags = std::mem::take(&mut *self.tags.lock().unwrap_or_else(|e| e.into_inner()));
        self.tracer.report(FinishedSpan {
            service: self.tracer.service_name.clone(),
            name: self.name.clone(),
            context: self.context,
            start: self.start,
            finish: Utc::now(),
            tags,
        });
        true
    }
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("finished", &self.is_finished())
            .finish()
    }
}
