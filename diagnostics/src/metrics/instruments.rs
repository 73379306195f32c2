use crate::diag_error;
use crate::error::{DiagnosticsResult, StateError};
use crate::metrics::transport::MetricsTransport;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Where instruments write their lines. Shared by a client and every
/// instrument it hands out.
pub(crate) struct MetricsBuffer {
    transport: Arc<dyn MetricsTransport>,
    should_batch: bool,
    lines: Mutex<Vec<String>>,
}

impl fmt::Debug for MetricsBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsBuffer")
            .field("transport", &self.transport)
            .field("should_batch", &self.should_batch)
            .finish()
    }
}

impl MetricsBuffer {
    pub(crate) fn new(transport: Arc<dyn MetricsTransport>, should_batch: bool) -> Self {
        MetricsBuffer {
            transport,
            should_batch,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn send(&self, line: String) {
        if !self.should_batch {
            self.deliver(&line);
            return;
        }
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(err) => {
                diag_error!(name: "MetricsClient.BufferPoisoned", reason = format!("{err}"));
            }
        }
    }

    pub(crate) fn flush(&self) -> DiagnosticsResult<()> {
        let lines = mem::take(&mut *self.lines.lock()?);
        if lines.is_empty() {
            return Ok(());
        }
        self.deliver(&lines.join("\n"));
        Ok(())
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.lines.lock().map(|lines| lines.len()).unwrap_or(0)
    }

    fn deliver(&self, payload: &str) {
        if let Err(err) = self.transport.send(payload) {
            diag_error!(
                name: "MetricsClient.SendError",
                reason = format!("{err}"),
                message = "Metric payload was dropped"
            );
        }
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`, so a name can
/// never break the line protocol.
pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug)]
enum TimerState {
    Unstarted,
    Running(Instant),
    Stopped,
}

/// Measures one elapsed time and emits it as `name:<ms>|ms`.
///
/// A timer runs once: `unstarted -> running -> stopped`.
#[derive(Debug)]
pub struct Timer {
    name: String,
    state: Mutex<TimerState>,
    buffer: Arc<MetricsBuffer>,
}

impl Timer {
    pub(crate) fn new(name: String, buffer: Arc<MetricsBuffer>) -> Self {
        Timer {
            name,
            state: Mutex::new(TimerState::Unstarted),
            buffer,
        }
    }

    /// The fully qualified metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start timing.
    pub fn start(&self) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            TimerState::Unstarted => {
                *state = TimerState::Running(Instant::now());
                Ok(())
            }
            TimerState::Running(_) | TimerState::Stopped => Err(StateError::TimerAlreadyStarted),
        }
    }

    /// Stop timing and emit the elapsed whole milliseconds.
    pub fn stop(&self) -> Result<Duration, StateError> {
        let elapsed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                TimerState::Unstarted => return Err(StateError::TimerNotStarted),
                TimerState::Stopped => return Err(StateError::TimerAlreadyStopped),
                TimerState::Running(started) => {
                    *state = TimerState::Stopped;
                    started.elapsed()
                }
            }
        };
        self.send(elapsed);
        Ok(elapsed)
    }

    fn send(&self, elapsed: Duration) {
        self.buffer
            .send(format!("{}:{}|ms", self.name, elapsed.as_millis()));
    }
}

/// Counts events as `name:<delta>|c`.
#[derive(Debug)]
pub struct Counter {
    name: String,
    buffer: Arc<MetricsBuffer>,
}

impl Counter {
    pub(crate) fn new(name: String, buffer: Arc<MetricsBuffer>) -> Self {
        Counter { name, buffer }
    }

    /// The fully qualified metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `by` to the counter.
    pub fn increment(&self, by: u64) {
        self.buffer.send(format!("{}:{}|c", self.name, by));
    }

    /// Subtract `by` from the counter.
    pub fn decrement(&self, by: u64) {
        self.buffer.send(format!("{}:-{}|c", self.name, by));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::metrics::InMemoryMetricsTransport;
    use rstest::rstest;

    fn unbatched() -> (InMemoryMetricsTransport, Arc<MetricsBuffer>) {
        let transport = InMemoryMetricsTransport::default();
        let buffer = Arc::new(MetricsBuffer::new(Arc::new(transport.clone()), false));
        (transport, buffer)
    }

    #[rstest]
    #[case("orders", "orders")]
    #[case("GET /orders/:id", "GET__orders__id")]
    #[case("a|b@c d", "a_b_c_d")]
    #[case("caf\u{e9}", "caf_")]
    #[case("ok.name-with_parts", "ok.name-with_parts")]
    fn names_are_normalized(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_name(raw), expected);
    }

    #[test]
    fn timer_emits_whole_milliseconds() {
        let (transport, buffer) = unbatched();
        let timer = Timer::new("shop.render".into(), buffer);

        timer.start().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = timer.stop().unwrap();

        let sent = transport.get_sent_payloads().unwrap();
        assert_eq!(sent, vec![format!("shop.render:{}|ms", elapsed.as_millis())]);
        assert!(elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn timer_rejects_out_of_order_use() {
        let (transport, buffer) = unbatched();
        let timer = Timer::new("shop.render".into(), buffer);

        assert_eq!(timer.stop(), Err(StateError::TimerNotStarted));
        timer.start().unwrap();
        assert_eq!(timer.start(), Err(StateError::TimerAlreadyStarted));
        timer.stop().unwrap();
        assert_eq!(timer.stop(), Err(StateError::TimerAlreadyStopped));
        assert_eq!(timer.start(), Err(StateError::TimerAlreadyStarted));
        assert_eq!(transport.get_sent_payloads().unwrap().len(), 1);
    }

    #[test]
    fn counter_emits_signed_deltas() {
        let (transport, buffer) = unbatched();
        let counter = Counter::new("shop.carts".into(), buffer);

        counter.increment(1);
        counter.increment(5);
        counter.decrement(2);

        assert_eq!(
            transport.get_sent_payloads().unwrap(),
            vec!["shop.carts:1|c", "shop.carts:5|c", "shop.carts:-2|c"]
        );
    }

    #[test]
    fn empty_flush_sends_nothing() {
        let transport = InMemoryMetricsTransport::default();
        let buffer = MetricsBuffer::new(Arc::new(transport.clone()), true);

        buffer.flush().unwrap();
        assert!(transport.get_sent_payloads().unwrap().is_empty());
    }

    #[test]
    fn failed_send_is_swallowed() {
        let transport = InMemoryMetricsTransport::default();
        transport.fail_next(1);
        let buffer = MetricsBuffer::new(Arc::new(transport.clone()), false);

        buffer.send("shop.carts:1|c".into());
        buffer.send("shop.carts:2|c".into());
        assert_eq!(transport.get_sent_payloads().unwrap(), vec!["shop.carts:2|c"]);
    }
}
