//! Turns span lifecycle events into a [`TraceRecord`].
//!
//! A server span gets `sr` on start and `ss` on finish, a client span `cs`
//! and `cr`. A local span gets no timing annotations; instead it carries an
//! `lc` binary annotation naming its component. Tags become binary
//! annotations and an error passed to `finish` becomes an `error` tag.
use crate::error::{DiagnosticsError, DiagnosticsResult};
use crate::trace::model::{
    Annotation, BinaryAnnotation, Endpoint, TraceRecord, CLIENT_RECV, CLIENT_SEND, ERROR,
    LOCAL_COMPONENT, SERVER_RECV, SERVER_SEND,
};
use crate::trace::observer::Observer;
use crate::trace::recorder::TracingRecorder;
use crate::trace::sampler::Sampler;
use crate::trace::span::{Span, SpanData, SpanKind};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Observer that records one span for the tracing backend.
#[derive(Debug)]
pub struct TracingObserver {
    endpoint: Endpoint,
    recorder: Arc<TracingRecorder>,
    timestamp: u64,
    started_at: Option<Instant>,
    annotations: Vec<Annotation>,
    binary_annotations: Vec<BinaryAnnotation>,
}

impl TracingObserver {
    /// Create an observer recording `span` for `service_name`.
    ///
    /// Fails when `service_name` is empty.
    pub fn new(
        span: &SpanData,
        service_name: &str,
        recorder: Arc<TracingRecorder>,
    ) -> DiagnosticsResult<Self> {
        if service_name.is_empty() {
            return Err(DiagnosticsError::Configuration(
                "tracing service name must not be empty".into(),
            ));
        }
        Ok(Self::with_endpoint(span, Endpoint::local(service_name), recorder))
    }

    pub(crate) fn with_endpoint(
        span: &SpanData,
        endpoint: Endpoint,
        recorder: Arc<TracingRecorder>,
    ) -> Self {
        let mut observer = TracingObserver {
            endpoint,
            recorder,
            timestamp: 0,
            started_at: None,
            annotations: Vec::new(),
            binary_annotations: Vec::new(),
        };
        if let (true, Some(component)) = (span.is_local(), span.component_name()) {
            observer.push_binary_annotation(LOCAL_COMPONENT, component);
        }
        observer
    }

    /// Timing annotations recorded so far.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Tags recorded so far.
    pub fn binary_annotations(&self) -> &[BinaryAnnotation] {
        &self.binary_annotations
    }

    pub(crate) fn on_start(&mut self, span: &SpanData) {
        self.timestamp = now_micros();
        self.started_at = Some(Instant::now());

        match span.kind() {
            SpanKind::Server => self.push_annotation(SERVER_RECV, self.timestamp),
            SpanKind::Client => self.push_annotation(CLIENT_SEND, self.timestamp),
            SpanKind::Local => {}
        }
    }

    pub(crate) fn on_set_tag(&mut self, _span: &SpanData, key: &str, value: &str) {
        self.push_binary_annotation(key, value);
    }

    pub(crate) fn on_log(
        &mut self,
        _span: &SpanData,
        _name: &str,
        _payload: Option<&serde_json::Value>,
    ) {
        // Logs are not part of the trace record.
    }

    pub(crate) fn on_finish(mut self, span: &SpanData, error: Option<&(dyn Error + 'static)>) {
        let duration = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO);
        let duration = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let finished_at = self.timestamp.saturating_add(duration);

        match span.kind() {
            SpanKind::Server => self.push_annotation(SERVER_SEND, finished_at),
            SpanKind::Client => self.push_annotation(CLIENT_RECV, finished_at),
            SpanKind::Local => {}
        }
        if let Some(error) = error {
            self.push_binary_annotation(ERROR, &error.to_string());
        }

        let context = span.context();
        let builder = TraceRecord::builder()
            .id(context.span_id().to_string())
            .trace_id(context.trace_id().to_string())
            .name(span.name())
            .timestamp(self.timestamp)
            .duration(duration)
            .annotations(self.annotations)
            .binary_annotations(self.binary_annotations);
        let record = match context.parent_id() {
            Some(parent_id) => builder.parent_id(parent_id.to_string()).build(),
            None => builder.build(),
        };
        self.recorder.record(record);
    }

    pub(crate) fn on_sub_span_created(&self, _span: &SpanData, child: &mut Span) {
        let observer =
            TracingObserver::with_endpoint(child.data(), self.endpoint.clone(), self.recorder.clone());
        child.add_observer(Observer::Tracing(observer));
    }

    fn push_annotation(&mut self, value: &str, timestamp: u64) {
        self.annotations.push(
            Annotation::builder()
                .value(value)
                .timestamp(timestamp)
                .endpoint(self.endpoint.clone())
                .build(),
        );
    }

    fn push_binary_annotation(&mut self, key: &str, value: &str) {
        self.binary_annotations.push(
            BinaryAnnotation::builder()
                .key(key)
                .value(value)
                .endpoint(self.endpoint.clone())
                .build(),
        );
    }
}

/// Attaches a [`TracingObserver`] to root spans that pass sampling.
///
/// Spans continuing an upstream trace follow the upstream decision instead of
/// drawing again.
#[derive(Clone, Debug)]
pub struct TracingObserverFactory {
    endpoint: Endpoint,
    recorder: Arc<TracingRecorder>,
    sampler: Sampler,
}

impl TracingObserverFactory {
    /// Create a factory for `service_name`. Fails when the name is empty.
    pub fn new(
        service_name: &str,
        recorder: Arc<TracingRecorder>,
        sampler: Sampler,
    ) -> DiagnosticsResult<Self> {
        if service_name.is_empty() {
            return Err(DiagnosticsError::Configuration(
                "tracing service name must not be empty".into(),
            ));
        }
        Ok(TracingObserverFactory {
            endpoint: Endpoint::local(service_name),
            recorder,
            sampler,
        })
    }

    /// Use a pre-resolved endpoint, so every span of a context shares one
    /// host lookup.
    pub fn with_endpoint(endpoint: Endpoint, recorder: Arc<TracingRecorder>, sampler: Sampler) -> Self {
        TracingObserverFactory {
            endpoint,
            recorder,
            sampler,
        }
    }

    /// An observer for `span`, or `None` when the span is not sampled.
    pub fn create(&self, span: &SpanData) -> Option<TracingObserver> {
        let sampled = match span.context().parent_id() {
            Some(_) => span.context().is_sampled(),
            None => self.sampler.should_sample(),
        };
        sampled.then(|| {
            TracingObserver::with_endpoint(span, self.endpoint.clone(), self.recorder.clone())
        })
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
