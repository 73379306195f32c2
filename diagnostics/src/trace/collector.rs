//! Trace Collector
//!
//! A [`TraceCollector`] receives batches of finished [`TraceRecord`]s from the
//! [`TracingRecorder`](crate::trace::TracingRecorder) and ships them to a trace
//! backend. Delivery is best effort: a failed batch is logged by the recorder
//! and not retried.
use crate::diag_info;
use crate::error::TransportError;
use crate::trace::model::TraceRecord;
use futures_util::future::BoxFuture;
use std::fmt::Debug;

/// Describes the result of handing a batch to a collector.
pub type CollectResult = Result<(), TransportError>;

/// `TraceCollector` defines the interface that trace sinks implement so they
/// can be plugged into the recorder.
///
/// The recorder calls `collect` with at most `max_batch_size` records at a
/// time and never concurrently from its flush loop, but `force_flush` may
/// overlap with a timed flush.
pub trait TraceCollector: Send + Sync + Debug {
    /// Ship one batch of records.
    ///
    /// Any retry logic is the collector's concern. Implementations should
    /// finish within a reasonable time; the recorder abandons an export after
    /// its configured timeout.
    fn collect(&self, batch: Vec<TraceRecord>) -> BoxFuture<'static, CollectResult>;

    /// Shuts down the collector. Called once, after the recorder drained its
    /// queue.
    fn shutdown(&self) -> CollectResult {
        Ok(())
    }
}

/// Collector used in debug mode: writes each batch as JSON to the internal
/// log instead of sending it anywhere.
#[derive(Debug, Clone, Default)]
pub struct LogCollector {
    endpoint: Option<String>,
}

impl LogCollector {
    /// Create a collector that logs batches addressed to `endpoint`.
    pub fn new(endpoint: Option<String>) -> Self {
        LogCollector { endpoint }
    }
}

impl TraceCollector for LogCollector {
    fn collect(&self, batch: Vec<TraceRecord>) -> BoxFuture<'static, CollectResult> {
        let result = serde_json::to_string(&batch)
            .map(|payload| {
                diag_info!(
                    name: "LogCollector.Batch",
                    endpoint = self.endpoint.as_deref().unwrap_or("-").to_owned(),
                    records = batch.len(),
                    payload = payload
                );
            })
            .map_err(TransportError::from);
        Box::pin(std::future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::{LogCollector, TraceCollector};
    use crate::trace::model::TraceRecord;

    #[tokio::test]
    async fn log_collector_accepts_batches() {
        let collector = LogCollector::new(Some("http://zipkin:9411/api/v1/spans".into()));
        let record = TraceRecord::builder()
            .id("01")
            .trace_id("01")
            .name("GET /")
            .timestamp(1)
            .duration(2)
            .build();

        assert!(collector.collect(vec![record]).await.is_ok());
        assert!(collector.collect(Vec::new()).await.is_ok());
        assert!(collector.shutdown().is_ok());
    }
}
