//! # Diagnostics Context
//!
//! [`DiagnosticsContext`] owns everything a service needs to instrument its
//! requests: the tracing recorder and its flush loop, the metrics clients,
//! the observer factories handed to every root span and the retry policy.
//! It is built once at startup from a [`DiagnosticsConfig`] and shut down
//! once before exit.
use crate::config::{DiagnosticsConfig, MetricsConfig, TracingConfig};
use crate::error::{DiagnosticsError, DiagnosticsResult};
use crate::metrics::{
    LogTransport, MetricsClient, MetricsObserverFactory, MetricsTransport, UdpTransport,
};
use crate::retry::{retry_logic, RetryLogic, RetryPolicy};
use crate::runtime::Runtime;
use crate::trace::model::Endpoint;
use crate::trace::{
    LogCollector, ObserverFactory, Span, SpanBuilder, TraceCollector, TracingObserverFactory,
    TracingRecorder,
};
use crate::{diag_debug, diag_info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The wired up pipeline of a service.
#[derive(Debug)]
pub struct DiagnosticsContext<R: Runtime> {
    runtime: R,
    recorder: Option<Arc<TracingRecorder>>,
    observer_metrics: Option<Arc<MetricsClient>>,
    metrics: Option<Arc<MetricsClient>>,
    observer_factories: Vec<ObserverFactory>,
    retry_policy: RetryPolicy,
    is_shutdown: AtomicBool,
}

impl<R: Runtime> DiagnosticsContext<R> {
    /// Build the pipeline described by `config`.
    ///
    /// Tracing outside debug mode needs a collector, which only
    /// [`builder`](DiagnosticsContext::builder) can supply, so this fails
    /// with a configuration error in that case.
    pub fn init(config: DiagnosticsConfig, runtime: R) -> DiagnosticsResult<Self> {
        Self::builder(config, runtime).build()
    }

    /// Start building a context with custom sinks.
    pub fn builder(config: DiagnosticsConfig, runtime: R) -> DiagnosticsContextBuilder<R> {
        DiagnosticsContextBuilder {
            config,
            runtime,
            trace_collector: None,
            metrics_transport: None,
        }
    }

    /// A builder for a root span observed by every configured observer.
    pub fn span_builder(&self, name: impl Into<String>) -> SpanBuilder {
        Span::builder(name).with_observer_factories(self.observer_factories.iter().cloned())
    }

    /// The metrics client for application code. Lines are sent as they are
    /// produced.
    pub fn metrics(&self) -> Option<&Arc<MetricsClient>> {
        self.metrics.as_ref()
    }

    /// The tracing recorder, when tracing is configured.
    pub fn recorder(&self) -> Option<&Arc<TracingRecorder>> {
        self.recorder.as_ref()
    }

    /// Retry helper bound to this context's runtime and policy.
    pub fn retry_logic(&self) -> RetryLogic<R> {
        retry_logic(self.runtime.clone(), self.retry_policy.clone())
    }

    /// Drain the trace queue, stop the flush loop and send any buffered
    /// metrics.
    ///
    /// Every stage runs even if an earlier one fails; the first error is
    /// returned.
    pub async fn shutdown(&self) -> DiagnosticsResult<()> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(DiagnosticsError::AlreadyShutdown);
        }
        diag_debug!(name: "DiagnosticsContext.Shutdown");

        let mut result = Ok(());
        if let Some(recorder) = &self.recorder {
            result = recorder.shutdown().await;
        }
        for client in [&self.observer_metrics, &self.metrics].into_iter().flatten() {
            let flushed = client.flush();
            if result.is_ok() {
                result = flushed;
            }
        }
        result
    }
}

/// Builder for a [`DiagnosticsContext`] with caller supplied sinks.
#[derive(Debug)]
pub struct DiagnosticsContextBuilder<R> {
    config: DiagnosticsConfig,
    runtime: R,
    trace_collector: Option<Arc<dyn TraceCollector>>,
    metrics_transport: Option<Arc<dyn MetricsTransport>>,
}

impl<R: Runtime> DiagnosticsContextBuilder<R> {
    /// Ship trace batches to `collector`, also in debug mode.
    pub fn with_trace_collector<C>(mut self, collector: C) -> Self
    where
        C: TraceCollector + 'static,
    {
        self.trace_collector = Some(Arc::new(collector));
        self
    }

    /// Send metrics through `transport` instead of the configured URL.
    pub fn with_metrics_transport<T>(mut self, transport: T) -> Self
    where
        T: MetricsTransport + 'static,
    {
        self.metrics_transport = Some(Arc::new(transport));
        self
    }

    /// Validate the config and build the context.
    pub fn build(self) -> DiagnosticsResult<DiagnosticsContext<R>> {
        let DiagnosticsContextBuilder {
            config,
            runtime,
            trace_collector,
            metrics_transport,
        } = self;
        config.validate()?;

        let mut observer_factories = Vec::new();

        let recorder = match &config.tracing {
            Some(tracing) => {
                let recorder = build_recorder(tracing, trace_collector, runtime.clone())?;
                // Resolved once; every span of the context reports this host.
                let endpoint = Endpoint::local(tracing.service_name.as_str());
                diag_info!(
                    name: "DiagnosticsContext.TracingEnabled",
                    service_name = tracing.service_name.clone(),
                    host = endpoint.ipv4().to_owned(),
                    debug = tracing.debug
                );
                observer_factories.push(
                    TracingObserverFactory::with_endpoint(
                        endpoint,
                        recorder.clone(),
                        tracing.sampler()?,
                    )
                    .into(),
                );
                Some(recorder)
            }
            None => None,
        };

        let (observer_metrics, metrics) = match &config.metrics {
            Some(metrics) => {
                let transport = match metrics_transport {
                    Some(transport) => transport,
                    None => build_transport(metrics)?,
                };
                let observer_client = Arc::new(MetricsClient::with_shared_transport(
                    metrics.namespace.as_str(),
                    transport.clone(),
                    true,
                ));
                let client = Arc::new(MetricsClient::with_shared_transport(
                    metrics.namespace.as_str(),
                    transport,
                    false,
                ));
                diag_info!(
                    name: "DiagnosticsContext.MetricsEnabled",
                    namespace = client.namespace().to_owned(),
                    debug = metrics.debug
                );
                observer_factories.push(MetricsObserverFactory::new(observer_client.clone()).into());
                (Some(observer_client), Some(client))
            }
            None => (None, None),
        };

        Ok(DiagnosticsContext {
            runtime,
            recorder,
            observer_metrics,
            metrics,
            observer_factories,
            retry_policy: config.retry,
            is_shutdown: AtomicBool::new(false),
        })
    }
}

fn build_recorder<R: Runtime>(
    config: &TracingConfig,
    collector: Option<Arc<dyn TraceCollector>>,
    runtime: R,
) -> DiagnosticsResult<Arc<TracingRecorder>> {
    let collector: Arc<dyn TraceCollector> = match collector {
        Some(collector) => collector,
        None if config.debug => Arc::new(LogCollector::new(config.endpoint.clone())),
        None => {
            return Err(DiagnosticsError::Configuration(
                "tracing outside debug mode needs a trace collector".into(),
            ))
        }
    };
    Ok(TracingRecorder::shared_builder(collector, runtime)
        .with_batch_config(config.batch_config())
        .build())
}

fn build_transport(config: &MetricsConfig) -> DiagnosticsResult<Arc<dyn MetricsTransport>> {
    if config.debug {
        return Ok(Arc::new(LogTransport::default()));
    }
    match config.url.as_deref() {
        Some(url) => Ok(Arc::new(UdpTransport::from_url(url)?)),
        None => Err(DiagnosticsError::Configuration(
            "metrics.url is required unless metrics.debug is set".into(),
        )),
    }
}

#[cfg(all(test, feature = "rt-tokio"))]
mod tests {
    use super::*;
    use crate::runtime::Tokio;
    use crate::testing::metrics::InMemoryMetricsTransport;
    use crate::testing::trace::InMemoryTraceCollector;

    const CONFIG: &str = r#"
tracing:
  serviceName: checkout
  endpoint: http://zipkin:9411/api/v1/spans
metrics:
  namespace: shop
  url: udp://127.0.0.1:8125
retry:
  attempts: 3
"#;

    fn context(
        collector: &InMemoryTraceCollector,
        transport: &InMemoryMetricsTransport,
    ) -> DiagnosticsContext<Tokio> {
        let config = DiagnosticsConfig::from_yaml(CONFIG).unwrap();
        DiagnosticsContext::builder(config, Tokio)
            .with_trace_collector(collector.clone())
            .with_metrics_transport(transport.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn request_tree_reaches_both_sinks() {
        let collector = InMemoryTraceCollector::default();
        let transport = InMemoryMetricsTransport::default();
        let context = context(&collector, &transport);

        let mut root = context.span_builder("GET /orders").build().unwrap();
        assert_eq!(root.observers().len(), 2);
        assert!(root.context().is_sampled());
        root.start();

        let mut lookup = root.create_sub_span("lookup", Some("orders"), true).unwrap();
        lookup.start();
        lookup.finish(None);

        assert!(transport.get_sent_payloads().unwrap().is_empty());
        root.finish(None);

        let lines = transport.get_sent_lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("shop.orders.lookup:"));
        assert!(lines[1].starts_with("shop.server.GET__orders:"));
        assert_eq!(transport.get_sent_payloads().unwrap().len(), 1);

        context.shutdown().await.unwrap();
        let records = collector.get_collected_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name(), "lookup");
        assert_eq!(records[1].name(), "GET /orders");
        assert_eq!(records[0].parent_id(), Some(records[1].id()));
        assert!(collector.is_shutdown());
    }

    #[tokio::test]
    async fn application_metrics_are_not_batched() {
        let collector = InMemoryTraceCollector::default();
        let transport = InMemoryMetricsTransport::default();
        let context = context(&collector, &transport);

        let metrics = context.metrics().unwrap();
        metrics.counter("cache miss").unwrap().increment(2);
        assert_eq!(
            transport.get_sent_payloads().unwrap(),
            vec!["shop.cache_miss:2|c".to_owned()]
        );
        assert_eq!(context.retry_logic().policy().attempts, 3);
        context.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_twice_fails() {
        let context = context(
            &InMemoryTraceCollector::default(),
            &InMemoryMetricsTransport::default(),
        );
        context.shutdown().await.unwrap();
        assert!(matches!(
            context.shutdown().await,
            Err(DiagnosticsError::AlreadyShutdown)
        ));
    }

    #[tokio::test]
    async fn tracing_without_collector_needs_debug() {
        let config = DiagnosticsConfig::from_yaml("tracing: { serviceName: checkout }").unwrap();
        assert!(matches!(
            DiagnosticsContext::init(config, Tokio),
            Err(DiagnosticsError::Configuration(_))
        ));

        let config =
            DiagnosticsConfig::from_yaml("tracing: { serviceName: checkout, debug: true }").unwrap();
        let context = DiagnosticsContext::init(config, Tokio).unwrap();
        assert!(context.recorder().is_some());
        assert!(context.metrics().is_none());
        context.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = DiagnosticsConfig::from_yaml("metrics: { namespace: shop }").unwrap();
        assert!(matches!(
            DiagnosticsContext::init(config, Tokio),
            Err(DiagnosticsError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn empty_config_leaves_spans_unobserved() {
        let context = DiagnosticsContext::init(DiagnosticsConfig::default(), Tokio).unwrap();
        let mut span = context.span_builder("GET /health").build().unwrap();
        assert!(span.observers().is_empty());
        assert!(!span.context().is_sampled());
        span.start();
        span.finish(None);
        context.shutdown().await.unwrap();
    }
}
