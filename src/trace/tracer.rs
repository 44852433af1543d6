use super::context::{SpanContext, SpanId, TraceId};
use super::reporter::{LoggingReporter, Reporter};
use super::span::{FinishedSpan, Span};
use crate::config::TracerSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sampling decision for new root spans. Children inherit their parent's flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampler {
    Const(bool),
}

impl Sampler {
    fn decide(&self) -> bool {
        match self {
            Sampler::Const(sample) => *sample,
        }
    }
}

pub(super) struct TracerInner {
    pub(super) service_name: String,
    sampler: Sampler,
    reporter: Arc<dyn Reporter>,
    closed: AtomicBool,
}

impl TracerInner {
    pub(super) fn report(&self, span: FinishedSpan) {
        if !span.context.sampled {
            return;
        }
        if self.closed.load(Ordering::SeqCst) {
            warn!(span = %span.name, "Tracer closed, dropping span");
            return;
        }
        self.reporter.report(span);
    }
}

/// Handle to a tracer. Cloning is cheap and every clone reports to the same
/// reporter.
///
/// There is no process-global tracer: whoever needs to open spans is handed a
/// `Tracer` when it is built.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    pub fn new(service_name: impl Into<String>, sampler: Sampler, reporter: Arc<dyn Reporter>) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, ?sampler, "Tracer initialized");
        Self {
            inner: Arc::new(TracerInner {
                service_name,
                sampler,
                reporter,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Always-sampling tracer that logs spans for the configured collector.
    pub fn from_settings(settings: &TracerSettings) -> Self {
        let reporter = LoggingReporter::new(settings.agent_host_port.clone(), settings.log_spans);
        Self::new(
            settings.service_name.clone(),
            Sampler::Const(true),
            Arc::new(reporter),
        )
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn start_root_span(&self, name: impl Into<String>) -> Span {
        let context = SpanContext {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_id: None,
            sampled: self.inner.sampler.decide(),
        };
        Span::new(name.into(), context, self.inner.clone())
    }

    /// Starts a span in `parent`'s trace that records `parent` as its parent.
    pub fn start_child_span(&self, parent: &SpanContext, name: impl Into<String>) -> Span {
        let context = SpanContext {
            trace_id: parent.trace_id,
            span_id: SpanId::random(),
            parent_id: Some(parent.span_id),
            sampled: parent.sampled,
        };
        Span::new(name.into(), context, self.inner.clone())
    }

    /// Child of `parent` if there is one, otherwise a fresh root.
    pub fn start_span_from(&self, parent: Option<&SpanContext>, name: impl Into<String>) -> Span {
        match parent {
            Some(parent) => self.start_child_span(parent, name),
            None => self.start_root_span(name),
        }
    }

    /// Flushes the reporter. Returns `false` if the tracer was already closed.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Tracer already closed");
            return false;
        }
        self.inner.reporter.close();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("service_name", &self.inner.service_name)
            .field("sampler", &self.inner.sampler)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::InMemoryReporter;

    fn tracer() -> (Tracer, Arc<InMemoryReporter>) {
        let reporter = Arc::new(InMemoryReporter::new());
        (
            Tracer::new("shop", Sampler::Const(true), reporter.clone()),
            reporter,
        )
    }

    #[test]
    fn test_child_span_links_to_parent() {
        let (tracer, reporter) = tracer();
        let root = tracer.start_root_span("create_order");
        let child = tracer.start_child_span(&root.context(), "del_order");

        assert_eq!(child.context().trace_id, root.context().trace_id);
        assert_eq!(child.context().parent_id, Some(root.context().span_id));
        assert_ne!(child.context().span_id, root.context().span_id);

        // the parent may finish first
        assert!(root.finish());
        assert!(child.finish());
        assert_eq!(reporter.spans().len(), 2);
        assert_eq!(reporter.named("del_order")[0].service, "shop");
    }

    #[test]
    fn test_finish_is_idempotent() {
        let (tracer, reporter) = tracer();
        let span = tracer.start_root_span("once");
        span.set_tag("order_id", 42);
        assert!(span.finish());
        assert!(!span.finish());

        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].tag("order_id"), Some("42"));
        assert!(spans[0].duration() >= chrono::Duration::zero());
    }

    #[test]
    fn test_unsampled_spans_are_not_reported() {
        let reporter = Arc::new(InMemoryReporter::new());
        let tracer = Tracer::new("shop", Sampler::Const(false), reporter.clone());
        let root = tracer.start_root_span("quiet");
        let child = tracer.start_child_span(&root.context(), "quieter");
        assert!(!child.context().sampled);
        root.finish();
        child.finish();
        assert!(reporter.spans().is_empty());
    }

    #[test]
    fn test_close_flushes_once_and_drops_late_spans() {
        let (tracer, reporter) = tracer();
        let late = tracer.start_root_span("late");

        assert!(tracer.close());
        assert!(!tracer.clone().close());
        assert!(reporter.is_closed());

        late.finish();
        assert!(reporter.spans().is_empty());
    }

    #[test]
    fn test_start_span_from_without_parent_is_root() {
        let (tracer, _) = tracer();
        let span = tracer.start_span_from(None, "orphan");
        assert_eq!(span.context().parent_id, None);
    }
}
