//! Provides an abstraction of the async runtime.
//!
//! The trace recorder needs a periodic timer and a background task, and
//! [`retry`](crate::retry()) needs to sleep between attempts. Both go through
//! [`Runtime`] so the pipeline is not tied to a single executor. A builtin
//! implementation for [Tokio] is provided behind the `rt-tokio` feature.
//!
//! [Tokio]: https://crates.io/crates/tokio

use futures_util::{future::BoxFuture, stream::Stream};
use std::{fmt::Debug, future::Future, time::Duration};

/// A runtime is an abstraction of an async runtime like [Tokio]. It allows the
/// diagnostics pipeline to schedule its flush loop and retry delays on any
/// runtime implementation.
///
/// [Tokio]: https://crates.io/crates/tokio
pub trait Runtime: Clone + Send + Sync + Debug + 'static {
    /// A future stream, which returns items in a previously specified interval. The item type is
    /// not important.
    type Interval: Stream + Send;

    /// A future, which resolves after a previously specified amount of time. The output type is
    /// not important.
    type Delay: Future + Send + Unpin;

    /// Create a [futures_util::stream::Stream], which returns a new item every
    /// [std::time::Duration].
    fn interval(&self, duration: Duration) -> Self::Interval;

    /// Spawn a new task, which executes the given future.
    ///
    /// # Note
    ///
    /// This is used to run the trace recorder's flush loop in the background.
    /// The function does not return a handle; the loop is stopped through
    /// [`TracingRecorder::shutdown`](crate::trace::TracingRecorder::shutdown).
    fn spawn(&self, future: BoxFuture<'static, ()>);

    /// Return a new future, which resolves after the specified [std::time::Duration].
    fn delay(&self, duration: Duration) -> Self::Delay;
}

/// Runtime implementation, which works with Tokio's multi thread runtime.
#[cfg(feature = "rt-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "rt-tokio")))]
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokio;

#[cfg(feature = "rt-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "rt-tokio")))]
impl Runtime for Tokio {
    type Interval = tokio_stream::wrappers::IntervalStream;
    type Delay = ::std::pin::Pin<Box<tokio::time::Sleep>>;

    fn interval(&self, duration: Duration) -> Self::Interval {
        tokio_interval_stream(duration)
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        #[allow(clippy::let_underscore_future)]
        // we don't have to await on the returned future to execute
        let _ = tokio::spawn(future);
    }

    fn delay(&self, duration: Duration) -> Self::Delay {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Helper which wraps `tokio::time::interval` and makes it return a stream
#[cfg(feature = "rt-tokio")]
fn tokio_interval_stream(period: Duration) -> tokio_stream::wrappers::IntervalStream {
    let mut interval = tokio::time::interval(period);
    // A slow export should not cause a burst of catch-up ticks.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio_stream::wrappers::IntervalStream::new(interval)
}
