//! Drives a few simulated requests through a debug mode pipeline: trace
//! batches and metric payloads are written to the log instead of a backend.
//!
//! Run with `RUST_LOG=debug` to also see the pipeline's own events. Point
//! `DIAGNOSTICS_CONFIG` at a YAML file to replace the built in config.
use diagnostics::config::DiagnosticsConfig;
use diagnostics::runtime::Tokio;
use diagnostics::{AttemptError, DiagnosticsContext, RetryError};
use serde_json::json;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CONFIG: &str = r#"
tracing:
  debug: true
  serviceName: orders
  endpoint: http://localhost:9411/api/v1/spans
  batchInterval: 200
  maxBatchSize: 10
metrics:
  debug: true
  namespace: orders
retry:
  attempts: 4
  backoff: 20
  budget: 500
  jitter: true
"#;

/// Fails every other call with a retryable condition.
#[derive(Debug, Default)]
struct FlakyInventory {
    calls: AtomicUsize,
}

impl FlakyInventory {
    async fn reserve(&self, sku: &str) -> Result<u32, AttemptError<String>> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if sku.is_empty() {
            return Err(AttemptError::Failed("empty sku".to_owned()));
        }
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return Err(AttemptError::RetryRequested);
        }
        Ok(3)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config() -> Result<DiagnosticsConfig, Box<dyn Error>> {
    let config = match std::env::var("DIAGNOSTICS_CONFIG") {
        Ok(path) => DiagnosticsConfig::from_yaml_file(path)?,
        Err(_) => DiagnosticsConfig::from_yaml(DEFAULT_CONFIG)?,
    };
    Ok(config.with_env_overrides())
}

async fn handle_order(
    context: &DiagnosticsContext<Tokio>,
    inventory: &FlakyInventory,
    sku: &str,
) -> Result<(), Box<dyn Error>> {
    let mut request = context.span_builder("POST /orders").build()?;
    request.start();
    request.set_tag("http.method", "POST");
    request.set_tag("order.sku", sku);

    let mut validate = request.create_sub_span("validate", Some("orders"), true)?;
    validate.start();
    validate.log("validated", Some(json!({ "sku": sku })));
    validate.finish(None);

    let mut reserve = request.create_sub_span("inventory.reserve", None, false)?;
    reserve.start();
    let trace_id = reserve.context().trace_id();
    let outcome = context
        .retry_logic()
        .run(|trigger| {
            info!(attempt = trigger.attempt(), %trace_id, "reserving inventory");
            inventory.reserve(sku)
        })
        .await;

    match outcome {
        Ok(units) => {
            reserve.set_tag("units", units.to_string());
            reserve.finish(None);
            request.set_tag("http.status_code", "201");
            request.finish(None);
        }
        Err(err) => {
            let err: Box<dyn Error> = match err {
                RetryError::Request(reason) => reason.into(),
                exhausted => exhausted.to_string().into(),
            };
            reserve.finish(Some(err.as_ref()));
            request.set_tag("http.status_code", "503");
            request.finish(Some(err.as_ref()));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config = load_config()?;
    let context = DiagnosticsContext::init(config, Tokio)?;
    let inventory = FlakyInventory::default();

    for sku in ["sku-1", "sku-2", ""] {
        handle_order(&context, &inventory, sku).await?;
    }

    if let Some(metrics) = context.metrics() {
        metrics.counter("orders.handled")?.increment(3);
    }

    // Give the flush loop one tick before shutting down.
    tokio::time::sleep(Duration::from_millis(250)).await;
    context.shutdown().await?;
    info!("all diagnostics flushed");
    Ok(())
}
