//! # Span
//!
//! A `Span` represents one unit of work in a request: the request itself
//! (server), an outbound call (client) or a piece of local code. Spans form a
//! tree sharing one trace id; every span fans its lifecycle events out to the
//! observers attached to it, in attachment order.
//!
//! A span moves through `Created -> Started -> Finished`. Finishing consumes
//! the span, so it cannot be tagged, logged or finished again afterwards.
//! Starting twice, or tagging, logging or finishing before `start`, are
//! programming errors and panic. A span dropped without `finish` publishes
//! nothing.
//!
//! A local span, root or sub span, needs a non empty component name:
//! `SpanBuilder::build` and `Span::create_sub_span` return
//! `DiagnosticsError::Configuration` without one.
use crate::error::{DiagnosticsError, DiagnosticsResult};
use crate::trace::id_generator::{IdGenerator, RandomIdGenerator, SpanId, TraceId};
use crate::trace::observer::{Observer, ObserverFactory};
use std::error::Error;
use std::sync::Arc;

/// The role a span plays in a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// A piece of local code.
    Local,
    /// Handling of an inbound request.
    #[default]
    Server,
    /// An outbound call to another service.
    Client,
}

/// Identity of a span within its trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_id: Option<SpanId>,
    sampled: bool,
}

impl TraceContext {
    /// Id shared by every span of the trace.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Id of this span. Equal to the trace id for a root span.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Id of the parent span, `None` only for the root.
    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    /// Whether this span is recorded by a tracing observer.
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }
}

/// Everything observers may read about a span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanData {
    name: String,
    kind: SpanKind,
    component_name: Option<String>,
    context: TraceContext,
}

impl SpanData {
    /// The span name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The span kind.
    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    /// True for spans of kind [`SpanKind::Local`].
    pub fn is_local(&self) -> bool {
        self.kind == SpanKind::Local
    }

    /// The component a local span belongs to.
    pub fn component_name(&self) -> Option<&str> {
        self.component_name.as_deref()
    }

    /// The span's identity within its trace.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SpanState {
    Created,
    Started,
}

/// Builder for a root span, or a span continuing a trace propagated from an
/// upstream service.
#[derive(Debug)]
pub struct SpanBuilder {
    name: String,
    kind: SpanKind,
    trace_id: Option<TraceId>,
    parent_id: Option<SpanId>,
    span_id: Option<SpanId>,
    component_name: Option<String>,
    sampled: bool,
    observer_factories: Vec<ObserverFactory>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl SpanBuilder {
    fn new(name: String) -> Self {
        SpanBuilder {
            name,
            kind: SpanKind::default(),
            trace_id: None,
            parent_id: None,
            span_id: None,
            component_name: None,
            sampled: true,
            observer_factories: Vec::new(),
            id_generator: None,
        }
    }

    /// Set the span kind. Defaults to [`SpanKind::Server`].
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Continue an existing trace instead of starting a new one.
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Set the id of the upstream span that caused this one.
    pub fn with_parent_id(mut self, parent_id: SpanId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the span id. Defaults to the trace id.
    pub fn with_span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Set the component name. Required for local spans.
    pub fn with_component_name(mut self, component_name: impl Into<String>) -> Self {
        self.component_name = Some(component_name.into());
        self
    }

    /// Carry the sampling decision made upstream. Only consulted when a
    /// parent id is set; defaults to `true`.
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = sampled;
        self
    }

    /// Factories asked for an observer when the span is built.
    pub fn with_observer_factories<I>(mut self, factories: I) -> Self
    where
        I: IntoIterator<Item = ObserverFactory>,
    {
        self.observer_factories.extend(factories);
        self
    }

    /// Generator used for the trace id and for sub-span ids.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Some(Arc::new(id_generator));
        self
    }

    /// Build the span and attach an observer from every factory that
    /// produces one.
    pub fn build(self) -> DiagnosticsResult<Span> {
        if self.name.is_empty() {
            return Err(DiagnosticsError::Configuration(
                "span name must not be empty".into(),
            ));
        }
        if self.kind == SpanKind::Local && !has_text(self.component_name.as_deref()) {
            return Err(DiagnosticsError::Configuration(format!(
                "local span `{}` requires a component name",
                self.name
            )));
        }

        let id_generator = self
            .id_generator
            .unwrap_or_else(|| Arc::new(RandomIdGenerator::default()));
        let trace_id = self
            .trace_id
            .unwrap_or_else(|| id_generator.new_trace_id());
        let span_id = self.span_id.unwrap_or_else(|| SpanId::from(trace_id));
        let sampled = self.parent_id.is_none() || self.sampled;

        let data = SpanData {
            name: self.name,
            kind: self.kind,
            component_name: self.component_name,
            context: TraceContext {
                trace_id,
                span_id,
                parent_id: self.parent_id,
                sampled,
            },
        };

        let observers = self
            .observer_factories
            .iter()
            .filter_map(|factory| factory.create(&data))
            .collect();

        Ok(Span::assemble(data, observers, id_generator))
    }
}

/// A timed unit of work whose lifecycle is reported to its observers.
#[derive(Debug)]
pub struct Span {
    data: SpanData,
    observers: Vec<Observer>,
    id_generator: Arc<dyn IdGenerator>,
    state: SpanState,
}

impl Span {
    /// Start building a span named `name`.
    pub fn builder(name: impl Into<String>) -> SpanBuilder {
        SpanBuilder::new(name.into())
    }

    fn assemble(
        mut data: SpanData,
        observers: Vec<Observer>,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        if !observers.iter().any(Observer::is_tracing) {
            data.context.sampled = false;
        }
        Span {
            data,
            observers,
            id_generator,
            state: SpanState::Created,
        }
    }

    /// What observers can see of this span.
    pub fn data(&self) -> &SpanData {
        &self.data
    }

    /// The span name.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// The span's identity within its trace.
    pub fn context(&self) -> &TraceContext {
        &self.data.context
    }

    /// Observers attached to this span, in attachment order.
    pub fn observers(&self) -> &[Observer] {
        &self.observers
    }

    /// Attach an observer after construction.
    ///
    /// Observers use this from `on_sub_span_created` to follow a request into
    /// its sub-spans. A span that gains a tracing observer becomes sampled.
    pub fn add_observer(&mut self, observer: Observer) {
        if observer.is_tracing() {
            self.data.context.sampled = true;
        }
        self.observers.push(observer);
    }

    /// Mark the span as started.
    ///
    /// # Panics
    ///
    /// Panics if the span was already started.
    pub fn start(&mut self) {
        assert!(
            self.state == SpanState::Created,
            "span `{}` started twice",
            self.data.name
        );
        self.state = SpanState::Started;
        for observer in &mut self.observers {
            observer.on_start(&self.data);
        }
    }

    /// Attach a key/value tag.
    ///
    /// # Panics
    ///
    /// Panics if the span was not started.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.assert_started("set_tag");
        let (key, value) = (key.into(), value.into());
        for observer in &mut self.observers {
            observer.on_set_tag(&self.data, &key, &value);
        }
    }

    /// Record a named event with an optional payload.
    ///
    /// # Panics
    ///
    /// Panics if the span was not started.
    pub fn log(&mut self, name: impl Into<String>, payload: Option<serde_json::Value>) {
        self.assert_started("log");
        let name = name.into();
        for observer in &mut self.observers {
            observer.on_log(&self.data, &name, payload.as_ref());
        }
    }

    /// Finish the span, optionally with the error that ended it.
    ///
    /// # Panics
    ///
    /// Panics if the span was not started.
    pub fn finish(self, error: Option<&(dyn Error + 'static)>) {
        self.assert_started("finish");
        let Span { data, observers, .. } = self;
        for observer in observers {
            observer.on_finish(&data, error);
        }
    }

    /// Create a child span in the same trace.
    ///
    /// The child gets a fresh span id and this span's id as its parent. It is
    /// [`SpanKind::Local`] when `is_local` is set and [`SpanKind::Client`]
    /// otherwise. Observer factories are not re-run; instead every observer of
    /// this span gets the chance to attach an observer to the child.
    pub fn create_sub_span(
        &self,
        name: impl Into<String>,
        component_name: Option<&str>,
        is_local: bool,
    ) -> DiagnosticsResult<Span> {
        let name = name.into();
        if name.is_empty() {
            return Err(DiagnosticsError::Configuration(
                "span name must not be empty".into(),
            ));
        }
        if is_local && !has_text(component_name) {
            return Err(DiagnosticsError::Configuration(format!(
                "local sub-span `{name}` requires a component name"
            )));
        }

        let data = SpanData {
            name,
            kind: if is_local {
                SpanKind::Local
            } else {
                SpanKind::Client
            },
            component_name: component_name.map(str::to_owned),
            context: TraceContext {
                trace_id: self.data.context.trace_id,
                span_id: self.id_generator.new_span_id(),
                parent_id: Some(self.data.context.span_id),
                sampled: self.data.context.sampled,
            },
        };
        let mut child = Span::assemble(data, Vec::new(), self.id_generator.clone());

        for observer in &self.observers {
            observer.on_sub_span_created(&self.data, &mut child);
        }
        Ok(child)
    }

    fn assert_started(&self, operation: &str) {
        assert!(
            self.state == SpanState::Started,
            "{operation} called on span `{}` before start",
            self.data.name
        );
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}
