//! Error types shared by the span, recorder and metrics pipelines.
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or driving the diagnostics pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DiagnosticsError {
    /// Invalid arguments or configuration, raised synchronously at setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The component was already shut down.
    #[error("already shut down")]
    AlreadyShutdown,

    /// The operation did not complete within the given duration.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Something unexpected happened inside the pipeline, such as a
    /// poisoned lock or a closed internal channel.
    #[error("internal failure: {0}")]
    InternalFailure(String),

    /// A flush handed data to a collector or transport that failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl<T> From<PoisonError<T>> for DiagnosticsError {
    fn from(err: PoisonError<T>) -> Self {
        DiagnosticsError::InternalFailure(format!("lock poisoned: {err}"))
    }
}

/// Result type used across this crate.
pub type DiagnosticsResult<T> = Result<T, DiagnosticsError>;

/// A metric instrument was driven out of order.
///
/// These are programming errors in the caller rather than runtime failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StateError {
    /// `start` was called on a timer that is already running or stopped.
    #[error("timer already started")]
    TimerAlreadyStarted,

    /// `stop` was called on a timer that was never started.
    #[error("timer not yet started")]
    TimerNotStarted,

    /// `stop` was called on a timer that is already stopped.
    #[error("timer already stopped")]
    TimerAlreadyStopped,
}

/// Failure to hand data to a trace collector or metrics sink.
///
/// The recorder and metrics client log these and carry on; they never reach
/// request handling code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// An I/O error from the underlying socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The collector or transport is no longer accepting data.
    #[error("transport closed")]
    Closed,

    /// Any other failure reported by a collector implementation.
    #[error("{0}")]
    Other(String),
}

impl<T> From<PoisonError<T>> for TransportError {
    fn from(err: PoisonError<T>) -> Self {
        TransportError::Other(format!("lock poisoned: {err}"))
    }
}
