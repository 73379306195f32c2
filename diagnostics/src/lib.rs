//! Span based request instrumentation.
//!
//! Request handling code creates a tree of timed [`Span`]s. Every span fans
//! its lifecycle events out to zero or more observers: a tracing observer that
//! turns the span into a Zipkin style [`TraceRecord`] queued on a batching
//! [`TracingRecorder`], and a metrics observer that times the span and emits
//! statsd style lines through a [`MetricsClient`]. A [`retry()`] helper with
//! exponential backoff, full jitter and a time budget covers outbound calls.
//!
//! # Getting Started
//!
//! ```no_run
//! # #[cfg(feature = "rt-tokio")]
//! # {
//! use diagnostics::config::DiagnosticsConfig;
//! use diagnostics::runtime::Tokio;
//! use diagnostics::DiagnosticsContext;
//!
//! # async fn run() -> Result<(), diagnostics::DiagnosticsError> {
//! let config = DiagnosticsConfig::from_yaml(
//!     "tracing: { debug: true, serviceName: checkout }\nmetrics: { namespace: checkout, debug: true }",
//! )?
//! .with_env_overrides();
//! let context = DiagnosticsContext::init(config, Tokio)?;
//!
//! let mut span = context.span_builder("GET /orders").build()?;
//! span.start();
//! span.set_tag("http.method", "GET");
//!
//! let mut lookup = span.create_sub_span("lookup", Some("orders"), true)?;
//! lookup.start();
//! lookup.finish(None);
//!
//! span.finish(None);
//! context.shutdown().await?;
//! # Ok(())
//! # }
//! # }
//! ```
//!
//! # Crate Feature Flags
//!
//! * `rt-tokio`: the [`runtime::Tokio`] runtime used by the recorder loop and retry delays.
//! * `internal-logs`: routes the crate's own diagnostics through `tracing`.
//! * `testing`: in-memory collectors and transports plus a predictable id generator.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod config;
pub mod context;
pub mod error;
mod internal_logging;
pub mod metrics;
pub mod retry;
pub mod runtime;
#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "testing", test))))]
pub mod testing;
pub mod trace;

pub use context::DiagnosticsContext;
pub use error::{DiagnosticsError, DiagnosticsResult, StateError, TransportError};
pub use metrics::{Counter, MetricsClient, Timer};
pub use retry::{retry, retry_logic, AttemptError, RetryError, RetryPolicy, RetryTrigger};
pub use trace::model::TraceRecord;
pub use trace::{Span, SpanKind, TracingRecorder};

#[doc(hidden)]
pub mod _private {
    #[cfg(feature = "internal-logs")]
    pub use tracing::{debug, error, info, warn};
}
