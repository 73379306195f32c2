//! # Tracing Recorder
//!
//! The [`TracingRecorder`] buffers finished [`TraceRecord`]s in an unbounded
//! FIFO queue and hands them to a [`TraceCollector`] in batches.
//!
//! A background loop, spawned on the configured [`Runtime`], wakes up every
//! `batch_interval` and exports at most `max_batch_size` records. An empty
//! queue makes the tick a no-op, and a failed export is logged and dropped;
//! in both cases the loop simply waits for the next tick.
//!
//! Timeline:
//!
//! ```ascii
//!   record()  record()        record() record() record()
//!      |         |               |        |        |
//!   ---+---------+-----tick------+--------+--------+-----tick------->
//!                       |                                   |
//!                 export [r1, r2]                   export [r3, r4, r5]
//! ```
//!
//! [`TracingRecorder::shutdown`] stops the loop and drains whatever is left,
//! one batch after the other. Records arriving after shutdown are dropped.
use crate::error::{DiagnosticsError, DiagnosticsResult};
use crate::runtime::Runtime;
use crate::trace::collector::TraceCollector;
use crate::trace::model::TraceRecord;
use crate::{diag_debug, diag_error, diag_warn};
use futures_channel::oneshot;
use futures_util::{
    future::{self, BoxFuture, Either, FutureExt},
    pin_mut,
    stream::{self, StreamExt},
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Default delay between two consecutive flushes.
pub(crate) const BATCH_INTERVAL_DEFAULT: Duration = Duration::from_millis(500);
/// Shortest delay the flush loop accepts between two flushes.
const MIN_BATCH_INTERVAL: Duration = Duration::from_millis(1);
/// Default maximum number of records exported per flush.
pub(crate) const MAX_BATCH_SIZE_DEFAULT: usize = 100;
/// Default maximum duration of a single export.
pub(crate) const MAX_EXPORT_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);

/// Batch settings of the [`TracingRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// The delay between two consecutive flushes. The default value is 500
    /// milliseconds.
    pub(crate) batch_interval: Duration,

    /// The maximum number of records exported per flush. Anything beyond it
    /// waits for the next tick. The default value is 100.
    pub(crate) max_batch_size: usize,

    /// The maximum duration of a single export.
    pub(crate) max_export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

impl BatchConfig {
    /// The delay between two consecutive flushes.
    pub fn batch_interval(&self) -> Duration {
        self.batch_interval
    }

    /// The maximum number of records exported per flush.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// The maximum duration of a single export.
    pub fn max_export_timeout(&self) -> Duration {
        self.max_export_timeout
    }
}

/// A builder for creating [`BatchConfig`] instances.
#[derive(Debug)]
pub struct BatchConfigBuilder {
    batch_interval: Duration,
    max_batch_size: usize,
    max_export_timeout: Duration,
}

impl Default for BatchConfigBuilder {
    fn default() -> Self {
        BatchConfigBuilder {
            batch_interval: BATCH_INTERVAL_DEFAULT,
            max_batch_size: MAX_BATCH_SIZE_DEFAULT,
            max_export_timeout: MAX_EXPORT_TIMEOUT_DEFAULT,
        }
    }
}

impl BatchConfigBuilder {
    /// Set the delay between two consecutive flushes.
    pub fn with_batch_interval(mut self, batch_interval: Duration) -> Self {
        self.batch_interval = batch_interval;
        self
    }

    /// Set the maximum number of records exported per flush.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Set the maximum duration of a single export.
    pub fn with_max_export_timeout(mut self, max_export_timeout: Duration) -> Self {
        self.max_export_timeout = max_export_timeout;
        self
    }

    /// Builds a `BatchConfig`. A batch size of zero is raised to one so a
    /// flush always makes progress, and a zero interval is raised to one
    /// millisecond since the flush loop cannot tick on a zero period.
    pub fn build(self) -> BatchConfig {
        BatchConfig {
            batch_interval: self.batch_interval.max(MIN_BATCH_INTERVAL),
            max_batch_size: self.max_batch_size.max(1),
            max_export_timeout: self.max_export_timeout,
        }
    }
}

type DelayFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

enum LoopMessage {
    Flush,
    Stop,
}

/// Batches finished trace records and ships them to a [`TraceCollector`].
pub struct TracingRecorder {
    queue: Mutex<VecDeque<TraceRecord>>,
    collector: Arc<dyn TraceCollector>,
    config: BatchConfig,
    delay: Option<DelayFn>,
    stop_sender: Mutex<Option<oneshot::Sender<()>>>,
    is_shutdown: AtomicBool,
    dropped_records_count: AtomicUsize,
}

impl fmt::Debug for TracingRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingRecorder")
            .field("collector", &self.collector)
            .field("config", &self.config)
            .field("is_shutdown", &self.is_shutdown)
            .finish()
    }
}

impl TracingRecorder {
    /// Start building a recorder whose flush loop runs on `runtime`.
    pub fn builder<C, R>(collector: C, runtime: R) -> TracingRecorderBuilder<R>
    where
        C: TraceCollector + 'static,
        R: Runtime,
    {
        Self::shared_builder(Arc::new(collector), runtime)
    }

    /// Like [`builder`](TracingRecorder::builder), for a collector that is
    /// also held elsewhere.
    pub fn shared_builder<R: Runtime>(
        collector: Arc<dyn TraceCollector>,
        runtime: R,
    ) -> TracingRecorderBuilder<R> {
        TracingRecorderBuilder {
            collector,
            runtime,
            config: BatchConfig::default(),
        }
    }

    /// A recorder without a flush loop or export timeout.
    ///
    /// Records only leave the queue through [`export_next_batch`],
    /// [`force_flush`] or [`shutdown`].
    ///
    /// [`export_next_batch`]: TracingRecorder::export_next_batch
    /// [`force_flush`]: TracingRecorder::force_flush
    /// [`shutdown`]: TracingRecorder::shutdown
    pub fn detached<C>(collector: C, config: BatchConfig) -> Self
    where
        C: TraceCollector + 'static,
    {
        Self::with_parts(Arc::new(collector), config, None, None)
    }

    fn with_parts(
        collector: Arc<dyn TraceCollector>,
        config: BatchConfig,
        delay: Option<DelayFn>,
        stop_sender: Option<oneshot::Sender<()>>,
    ) -> Self {
        TracingRecorder {
            queue: Mutex::new(VecDeque::new()),
            collector,
            config,
            delay,
            stop_sender: Mutex::new(stop_sender),
            is_shutdown: AtomicBool::new(false),
            dropped_records_count: AtomicUsize::new(0),
        }
    }

    /// The batch settings in use.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Queue a finished record for the next flush.
    pub fn record(&self, record: TraceRecord) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.drop_record("shutdown");
            return;
        }
        match self.queue.lock() {
            Ok(mut queue) => queue.push_back(record),
            Err(_) => self.drop_record("poisoned queue"),
        }
    }

    /// Number of records waiting to be exported.
    pub fn queued_len(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Number of records dropped because the recorder was shut down.
    pub fn dropped_records_count(&self) -> usize {
        self.dropped_records_count.load(Ordering::Relaxed)
    }

    /// Export up to `max_batch_size` records from the head of the queue as one
    /// batch. Returns how many records were handed to the collector; an empty
    /// queue does nothing and returns 0.
    pub async fn export_next_batch(&self) -> DiagnosticsResult<usize> {
        let batch: Vec<TraceRecord> = {
            let mut queue = self.queue.lock()?;
            let take = queue.len().min(self.config.max_batch_size);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        let export = self.collector.collect(batch);
        match &self.delay {
            None => export.await?,
            Some(delay) => {
                let timeout = delay(self.config.max_export_timeout);
                pin_mut!(export);
                pin_mut!(timeout);
                match future::select(export, timeout).await {
                    Either::Left((result, _)) => result?,
                    Either::Right((_, _)) => {
                        return Err(DiagnosticsError::Timeout(self.config.max_export_timeout))
                    }
                }
            }
        }
        diag_debug!(name: "TracingRecorder.BatchExported", records = count);
        Ok(count)
    }

    /// Export everything currently queued, one batch after the other.
    ///
    /// A failed batch is logged and the remaining batches are still attempted;
    /// the first error is returned.
    pub async fn force_flush(&self) -> DiagnosticsResult<()> {
        let mut first_error = None;
        loop {
            match self.export_next_batch().await {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    diag_error!(
                        name: "TracingRecorder.ExportError",
                        reason = format!("{err}")
                    );
                    if matches!(err, DiagnosticsError::InternalFailure(_)) {
                        return Err(err);
                    }
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop the flush loop, drain the queue and shut the collector down.
    ///
    /// Records arriving afterwards are dropped. Calling this twice returns
    /// [`DiagnosticsError::AlreadyShutdown`].
    pub async fn shutdown(&self) -> DiagnosticsResult<()> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(DiagnosticsError::AlreadyShutdown);
        }
        let stop = self.stop_sender.lock()?.take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }

        let flushed = self.force_flush().await;

        let dropped_records = self.dropped_records_count();
        if dropped_records > 0 {
            diag_warn!(
                name: "TracingRecorder.Shutdown",
                dropped_records = dropped_records,
                message = "Trace records arrived after shutdown and were dropped."
            );
        }
        if let Err(err) = self.collector.shutdown() {
            diag_error!(
                name: "TracingRecorder.CollectorShutdownError",
                reason = format!("{err}")
            );
        }
        flushed
    }

    fn drop_record(&self, reason: &'static str) {
        if self.dropped_records_count.fetch_add(1, Ordering::Relaxed) == 0 {
            diag_warn!(
                name: "TracingRecorder.RecordDroppingStarted",
                reason = reason,
                message = "Beginning to drop trace records. No further log will be emitted for further drops until Shutdown."
            );
        }
    }
}

/// Builder for a [`TracingRecorder`] with a background flush loop.
#[derive(Debug)]
pub struct TracingRecorderBuilder<R> {
    collector: Arc<dyn TraceCollector>,
    runtime: R,
    config: BatchConfig,
}

impl<R: Runtime> TracingRecorderBuilder<R> {
    /// Set the batch settings.
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        TracingRecorderBuilder { config, ..self }
    }

    /// Build the recorder and spawn its flush loop.
    pub fn build(self) -> Arc<TracingRecorder> {
        let TracingRecorderBuilder {
            collector,
            runtime,
            config,
        } = self;

        let delay_runtime = runtime.clone();
        let delay: DelayFn = Arc::new(move |duration| -> BoxFuture<'static, ()> {
            let runtime = delay_runtime.clone();
            Box::pin(async move {
                runtime.delay(duration).await;
            })
        });

        let (stop_sender, stop_receiver) = oneshot::channel();
        let recorder = Arc::new(TracingRecorder::with_parts(
            collector,
            config,
            Some(delay),
            Some(stop_sender),
        ));

        let weak = Arc::downgrade(&recorder);
        let loop_runtime = runtime.clone();
        runtime.spawn(Box::pin(async move {
            // The interval takes a reference to the current runtime, so it is
            // created inside the spawned task.
            run_flush_loop(weak, loop_runtime, config.batch_interval, stop_receiver).await;
        }));
        recorder
    }
}

async fn run_flush_loop<R: Runtime>(
    recorder: Weak<TracingRecorder>,
    runtime: R,
    batch_interval: Duration,
    stop: oneshot::Receiver<()>,
) {
    let ticker = runtime
        .interval(batch_interval)
        .skip(1) // The ticker fires immediately; the first flush is one interval out.
        .map(|_| LoopMessage::Flush);
    let stop = stop.into_stream().map(|_| LoopMessage::Stop);
    let mut messages = Box::pin(stream::select(ticker, stop));

    while let Some(message) = messages.next().await {
        match message {
            LoopMessage::Stop => break,
            LoopMessage::Flush => {
                let Some(recorder) = recorder.upgrade() else {
                    break;
                };
                if let Err(err) = recorder.export_next_batch().await {
                    diag_error!(
                        name: "TracingRecorder.ExportError",
                        reason = format!("{err}"),
                        message = "Failed during the export process"
                    );
                }
            }
        }
    }
    diag_debug!(name: "TracingRecorder.FlushLoopStopped");
}
