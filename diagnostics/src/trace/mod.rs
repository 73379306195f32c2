//! # Trace
//!
//! Spans, the observers attached to them and the pipeline that ships
//! finished spans to a trace collector.
//!
//! * [`Span`] carries a request's identity and fans its lifecycle out to
//!   [`Observer`]s.
//! * [`TracingObserver`] turns a span into a [`TraceRecord`](model::TraceRecord).
//! * [`TracingRecorder`] batches records for a [`TraceCollector`].
mod collector;
mod id_generator;
pub mod model;
mod observer;
mod recorder;
mod sampler;
mod span;
mod tracing_observer;

pub use collector::{CollectResult, LogCollector, TraceCollector};
#[cfg(any(feature = "testing", test))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator, SpanId, TraceId};
pub use observer::{Observer, ObserverFactory};
pub use recorder::{BatchConfig, BatchConfigBuilder, TracingRecorder, TracingRecorderBuilder};
pub use sampler::Sampler;
pub use span::{Span, SpanBuilder, SpanData, SpanKind, TraceContext};
pub use tracing_observer::{TracingObserver, TracingObserverFactory};
