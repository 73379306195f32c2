use crate::error::{DiagnosticsError, DiagnosticsResult, TransportError};
use crate::metrics::MetricsTransport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A metrics transport that keeps every payload in memory.
///
/// Clones share storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetricsTransport {
    payloads: Arc<Mutex<Vec<String>>>,
    failures_remaining: Arc<AtomicUsize>,
}

impl InMemoryMetricsTransport {
    /// Every payload sent so far, in order.
    pub fn get_sent_payloads(&self) -> DiagnosticsResult<Vec<String>> {
        self.payloads
            .lock()
            .map(|payloads| payloads.clone())
            .map_err(DiagnosticsError::from)
    }

    /// Every line sent so far, with batched payloads split apart.
    pub fn get_sent_lines(&self) -> DiagnosticsResult<Vec<String>> {
        self.payloads
            .lock()
            .map(|payloads| {
                payloads
                    .iter()
                    .flat_map(|payload| payload.lines().map(str::to_owned))
                    .collect()
            })
            .map_err(DiagnosticsError::from)
    }

    /// Reject the next `count` payloads with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }
}

impl MetricsTransport for InMemoryMetricsTransport {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Other("injected transport failure".into()));
        }
        self.payloads.lock()?.push(payload.to_owned());
        Ok(())
    }
}
