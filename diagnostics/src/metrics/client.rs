use crate::error::DiagnosticsResult;
use crate::metrics::instruments::{normalize_name, Counter, MetricsBuffer, Timer};
use crate::metrics::transport::MetricsTransport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hands out namespaced timers and counters and delivers their lines.
///
/// Instruments are cached per name for the life of the client. With
/// `should_batch` set, lines are held until [`flush`](MetricsClient::flush)
/// and then sent as one newline separated payload; otherwise every line is
/// sent as soon as it is produced.
#[derive(Debug)]
pub struct MetricsClient {
    namespace: String,
    buffer: Arc<MetricsBuffer>,
    timers: Mutex<HashMap<String, Arc<Timer>>>,
    counters: Mutex<HashMap<String, Arc<Counter>>>,
}

impl MetricsClient {
    /// Create a client prefixing every metric with `namespace`.
    pub fn new<T>(namespace: impl Into<String>, transport: T, should_batch: bool) -> Self
    where
        T: MetricsTransport + 'static,
    {
        Self::with_shared_transport(namespace, Arc::new(transport), should_batch)
    }

    /// Like [`new`](MetricsClient::new), for a transport shared with other
    /// clients.
    pub fn with_shared_transport(
        namespace: impl Into<String>,
        transport: Arc<dyn MetricsTransport>,
        should_batch: bool,
    ) -> Self {
        MetricsClient {
            namespace: normalize_name(&namespace.into()),
            buffer: Arc::new(MetricsBuffer::new(transport, should_batch)),
            timers: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// The normalized namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The fully qualified name `namespace.name` with `name` normalized.
    pub fn metric_name(&self, name: &str) -> String {
        format!("{}.{}", self.namespace, normalize_name(name))
    }

    /// The cached timer for `name`.
    pub fn timer(&self, name: &str) -> DiagnosticsResult<Arc<Timer>> {
        let full_name = self.metric_name(name);
        let mut timers = self.timers.lock()?;
        let timer = timers
            .entry(full_name)
            .or_insert_with_key(|key| Arc::new(Timer::new(key.clone(), self.buffer.clone())));
        Ok(timer.clone())
    }

    /// A timer for `name` that is not cached, so it can be started even if a
    /// previous timer of the same name already ran.
    pub fn new_timer(&self, name: &str) -> Timer {
        Timer::new(self.metric_name(name), self.buffer.clone())
    }

    /// The cached counter for `name`.
    pub fn counter(&self, name: &str) -> DiagnosticsResult<Arc<Counter>> {
        let full_name = self.metric_name(name);
        let mut counters = self.counters.lock()?;
        let counter = counters
            .entry(full_name)
            .or_insert_with_key(|key| Arc::new(Counter::new(key.clone(), self.buffer.clone())));
        Ok(counter.clone())
    }

    /// Send one raw line, buffering it when batching.
    pub fn send(&self, message: impl Into<String>) {
        self.buffer.send(message.into());
    }

    /// Send all buffered lines as one payload. Does nothing when the buffer is
    /// empty.
    pub fn flush(&self) -> DiagnosticsResult<()> {
        self.buffer.flush()
    }

    /// Number of lines waiting for [`flush`](MetricsClient::flush).
    pub fn buffered_len(&self) -> usize {
        self.buffer.buffered_len()
    }
}
