use crate::error::{DiagnosticsError, DiagnosticsResult, TransportError};
use crate::trace::model::TraceRecord;
use crate::trace::{CollectResult, TraceCollector};
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A trace collector that keeps every batch in memory.
///
/// Clones share storage, so a test can hand one clone to the recorder and
/// inspect the other.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTraceCollector {
    batches: Arc<Mutex<Vec<Vec<TraceRecord>>>>,
    failures_remaining: Arc<AtomicUsize>,
    is_shutdown: Arc<AtomicBool>,
}

impl InMemoryTraceCollector {
    /// Every batch received so far, in arrival order.
    pub fn get_collected_batches(&self) -> DiagnosticsResult<Vec<Vec<TraceRecord>>> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .map_err(DiagnosticsError::from)
    }

    /// Every record received so far, flattened across batches.
    pub fn get_collected_records(&self) -> DiagnosticsResult<Vec<TraceRecord>> {
        self.batches
            .lock()
            .map(|batches| batches.iter().flatten().cloned().collect())
            .map_err(DiagnosticsError::from)
    }

    /// Reject the next `count` batches with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Whether `shutdown` was called.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }
}

impl TraceCollector for InMemoryTraceCollector {
    fn collect(&self, batch: Vec<TraceRecord>) -> BoxFuture<'static, CollectResult> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result = if should_fail {
            Err(TransportError::Other("injected collector failure".into()))
        } else {
            self.batches
                .lock()
                .map(|mut batches| batches.push(batch))
                .map_err(TransportError::from)
        };
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&self) -> CollectResult {
        self.is_shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A root server record named `name` with fixed ids and timings.
pub fn new_test_record(name: &str) -> TraceRecord {
    TraceRecord::builder()
        .id("00000000000000aa")
        .trace_id("00000000000000aa")
        .name(name)
        .timestamp(1_502_787_600_000_000)
        .duration(1_000)
        .build()
}
