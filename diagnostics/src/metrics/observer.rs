use crate::diag_warn;
use crate::metrics::client::MetricsClient;
use crate::metrics::instruments::Timer;
use crate::trace::{Observer, Span, SpanData, SpanKind};
use std::error::Error;
use std::sync::Arc;

/// Times a span and reports it as `<namespace>.<metric name>:<ms>|ms`.
///
/// Each observer owns a fresh timer, so every request is timed independently.
/// Finishing a server span flushes the client, which sends the whole
/// request's metrics as one payload when the client batches.
#[derive(Debug)]
pub struct MetricsObserver {
    timer: Timer,
    client: Arc<MetricsClient>,
}

impl MetricsObserver {
    /// Observe `span` under `metric_name`.
    pub fn new(_span: &SpanData, metric_name: &str, client: Arc<MetricsClient>) -> Self {
        MetricsObserver {
            timer: client.new_timer(metric_name),
            client,
        }
    }

    /// The fully qualified metric name this observer reports under.
    pub fn metric_name(&self) -> &str {
        self.timer.name()
    }

    pub(crate) fn on_start(&mut self, _span: &SpanData) {
        if let Err(err) = self.timer.start() {
            diag_warn!(name: "MetricsObserver.TimerMisuse", reason = format!("{err}"));
        }
    }

    pub(crate) fn on_finish(self, span: &SpanData, _error: Option<&(dyn Error + 'static)>) {
        if let Err(err) = self.timer.stop() {
            diag_warn!(name: "MetricsObserver.TimerMisuse", reason = format!("{err}"));
        }
        if span.kind() == SpanKind::Server {
            if let Err(err) = self.client.flush() {
                diag_warn!(name: "MetricsObserver.FlushError", reason = format!("{err}"));
            }
        }
    }

    pub(crate) fn on_sub_span_created(&self, _span: &SpanData, child: &mut Span) {
        let data = child.data();
        let metric_name = match (data.kind(), data.component_name()) {
            (SpanKind::Local, Some(component)) => format!("{component}.{}", data.name()),
            _ => format!("clients.{}", data.name()),
        };
        let observer = MetricsObserver::new(data, &metric_name, self.client.clone());
        child.add_observer(Observer::Metrics(observer));
    }
}

/// Attaches a `server.<span name>` [`MetricsObserver`] to every root span.
#[derive(Debug, Clone)]
pub struct MetricsObserverFactory {
    client: Arc<MetricsClient>,
}

impl MetricsObserverFactory {
    /// Create a factory reporting through `client`.
    pub fn new(client: Arc<MetricsClient>) -> Self {
        MetricsObserverFactory { client }
    }

    /// An observer for `span`.
    pub fn create(&self, span: &SpanData) -> MetricsObserver {
        MetricsObserver::new(span, &format!("server.{}", span.name()), self.client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::metrics::InMemoryMetricsTransport;
    use crate::trace::ObserverFactory;

    fn metric_names(payload: &str) -> Vec<String> {
        payload
            .lines()
            .map(|line| line.split(':').next().unwrap_or_default().to_owned())
            .collect()
    }

    #[test]
    fn request_tree_is_flushed_as_one_payload_when_server_span_finishes() {
        let transport = InMemoryMetricsTransport::default();
        let client = Arc::new(MetricsClient::new("shop", transport.clone(), true));
        let factory: ObserverFactory = MetricsObserverFactory::new(client).into();

        let mut root = Span::builder("GET /orders")
            .with_observer_factories([factory])
            .build()
            .unwrap();
        root.start();

        let mut render = root.create_sub_span("render", Some("templates"), true).unwrap();
        render.start();
        render.finish(None);

        let mut call = root.create_sub_span("inventory", None, false).unwrap();
        call.start();
        call.finish(None);
        assert!(transport.get_sent_payloads().unwrap().is_empty());

        root.finish(None);
        let payloads = transport.get_sent_payloads().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            metric_names(&payloads[0]),
            vec![
                "shop.templates.render",
                "shop.clients.inventory",
                "shop.server.GET__orders"
            ]
        );
        assert!(payloads[0].lines().all(|line| line.ends_with("|ms")));
    }

    #[test]
    fn repeated_requests_get_fresh_timers() {
        let transport = InMemoryMetricsTransport::default();
        let client = Arc::new(MetricsClient::new("shop", transport.clone(), true));
        let factory: ObserverFactory = MetricsObserverFactory::new(client).into();

        for _ in 0..3 {
            let mut span = Span::builder("GET /")
                .with_observer_factories([factory.clone()])
                .build()
                .unwrap();
            span.start();
            span.finish(None);
        }
        assert_eq!(transport.get_sent_payloads().unwrap().len(), 3);
    }

    #[test]
    fn observer_names_follow_the_span_tree() {
        let client = Arc::new(MetricsClient::new("shop", InMemoryMetricsTransport::default(), true));
        let root = Span::builder("GET /orders")
            .with_observer_factories([ObserverFactory::from(MetricsObserverFactory::new(client))])
            .build()
            .unwrap();
        let render = root.create_sub_span("render", Some("templates"), true).unwrap();

        let Some(Observer::Metrics(observer)) = render.observers().first() else {
            panic!("expected a metrics observer");
        };
        assert_eq!(observer.metric_name(), "shop.templates.render");
    }
}
