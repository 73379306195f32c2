//! The closed set of span observers and the factories that create them.
use crate::metrics::{MetricsObserver, MetricsObserverFactory};
use crate::trace::span::{Span, SpanData};
use crate::trace::tracing_observer::{TracingObserver, TracingObserverFactory};
use std::error::Error;

/// A recorder attached to a span.
///
/// Each hook receives the span's data so observers only keep the state they
/// accumulate themselves.
#[derive(Debug)]
pub enum Observer {
    /// Builds a trace record for the tracing recorder.
    Tracing(TracingObserver),
    /// Times the span and emits metrics.
    Metrics(MetricsObserver),
}

impl Observer {
    /// True for the tracing variant.
    pub fn is_tracing(&self) -> bool {
        matches!(self, Observer::Tracing(_))
    }

    pub(crate) fn on_start(&mut self, span: &SpanData) {
        match self {
            Observer::Tracing(observer) => observer.on_start(span),
            Observer::Metrics(observer) => observer.on_start(span),
        }
    }

    pub(crate) fn on_set_tag(&mut self, span: &SpanData, key: &str, value: &str) {
        match self {
            Observer::Tracing(observer) => observer.on_set_tag(span, key, value),
            Observer::Metrics(_) => {}
        }
    }

    pub(crate) fn on_log(
        &mut self,
        span: &SpanData,
        name: &str,
        payload: Option<&serde_json::Value>,
    ) {
        match self {
            Observer::Tracing(observer) => observer.on_log(span, name, payload),
            Observer::Metrics(_) => {}
        }
    }

    pub(crate) fn on_finish(self, span: &SpanData, error: Option<&(dyn Error + 'static)>) {
        match self {
            Observer::Tracing(observer) => observer.on_finish(span, error),
            Observer::Metrics(observer) => observer.on_finish(span, error),
        }
    }

    pub(crate) fn on_sub_span_created(&self, span: &SpanData, child: &mut Span) {
        match self {
            Observer::Tracing(observer) => observer.on_sub_span_created(span, child),
            Observer::Metrics(observer) => observer.on_sub_span_created(span, child),
        }
    }
}

/// Creates an observer for each new root span.
#[derive(Clone, Debug)]
pub enum ObserverFactory {
    /// Attaches a tracing observer to sampled spans.
    Tracing(TracingObserverFactory),
    /// Attaches a `server.<name>` metrics observer.
    Metrics(MetricsObserverFactory),
}

impl ObserverFactory {
    /// An observer for `span`, or `None` to leave it unobserved.
    pub fn create(&self, span: &SpanData) -> Option<Observer> {
        match self {
            ObserverFactory::Tracing(factory) => factory.create(span).map(Observer::Tracing),
            ObserverFactory::Metrics(factory) => Some(Observer::Metrics(factory.create(span))),
        }
    }
}

impl From<TracingObserverFactory> for ObserverFactory {
    fn from(factory: TracingObserverFactory) -> Self {
        ObserverFactory::Tracing(factory)
    }
}

impl From<MetricsObserverFactory> for ObserverFactory {
    fn from(factory: MetricsObserverFactory) -> Self {
        ObserverFactory::Metrics(factory)
    }
}
