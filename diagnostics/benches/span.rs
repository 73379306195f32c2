use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use diagnostics::metrics::{MetricsClient, MetricsObserverFactory};
use diagnostics::testing::metrics::InMemoryMetricsTransport;
use diagnostics::testing::trace::InMemoryTraceCollector;
use diagnostics::trace::model::Endpoint;
use diagnostics::trace::{
    BatchConfigBuilder, ObserverFactory, Sampler, Span, TracingObserverFactory, TracingRecorder,
};
use std::sync::Arc;

fn criterion_benchmark(c: &mut Criterion) {
    span_lifecycle_benchmark_group(c)
}

fn span_lifecycle_benchmark_group(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("span_lifecycle");
    group.bench_function("unobserved", |b| {
        b.iter(|| {
            let mut span = Span::builder("GET /orders").build().unwrap();
            span.start();
            span.finish(None);
        })
    });
    for (label, sampler) in [
        ("not_sampled", Sampler::new(false, 0.0).unwrap()),
        ("sampled", Sampler::always()),
    ] {
        group.bench_function(BenchmarkId::new("traced", label), |b| {
            let (recorder, factories) = observer_factories(sampler);
            b.iter(|| {
                let mut span = Span::builder("GET /orders")
                    .with_observer_factories(factories.iter().cloned())
                    .build()
                    .unwrap();
                span.start();
                span.set_tag("http.method", "GET");
                span.finish(None);
                drain(&runtime, &recorder);
            })
        });
    }
    group.bench_function(BenchmarkId::new("sub_spans", "4"), |b| {
        let (recorder, factories) = observer_factories(Sampler::always());
        b.iter(|| {
            let mut root = Span::builder("GET /orders")
                .with_observer_factories(factories.iter().cloned())
                .build()
                .unwrap();
            root.start();
            for name in ["cache", "db", "auth", "render"] {
                let mut child = root.create_sub_span(name, Some("orders"), true).unwrap();
                child.start();
                child.finish(None);
            }
            root.finish(None);
            drain(&runtime, &recorder);
        })
    });
    group.finish();
}

fn observer_factories(sampler: Sampler) -> (Arc<TracingRecorder>, Vec<ObserverFactory>) {
    let recorder = Arc::new(TracingRecorder::detached(
        InMemoryTraceCollector::default(),
        BatchConfigBuilder::default().build(),
    ));
    let endpoint = Endpoint::builder()
        .service_name("bench")
        .ipv4("127.0.0.1")
        .build();
    let client = Arc::new(MetricsClient::new(
        "bench",
        InMemoryMetricsTransport::default(),
        true,
    ));
    let factories = vec![
        TracingObserverFactory::with_endpoint(endpoint, recorder.clone(), sampler).into(),
        MetricsObserverFactory::new(client).into(),
    ];
    (recorder, factories)
}

// Keeps the queue from growing across iterations.
fn drain(runtime: &tokio::runtime::Runtime, recorder: &TracingRecorder) {
    if recorder.queued_len() >= recorder.config().max_batch_size() {
        runtime.block_on(recorder.export_next_batch()).unwrap();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
