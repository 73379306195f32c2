//! # Configuration
//!
//! [`DiagnosticsConfig`] is read from YAML with camelCase keys. Durations are
//! given in milliseconds. Every section is optional:
//!
//! ```yaml
//! tracing:
//!   serviceName: checkout
//!   endpoint: http://zipkin:9411/api/v1/spans
//!   batchInterval: 500
//!   maxBatchSize: 100
//!   sampleRate: 0.25
//! metrics:
//!   namespace: checkout
//!   url: udp://statsd:8125
//! retry:
//!   attempts: 3
//!   backoff: 100
//!   jitter: true
//! ```
//!
//! Environment variables override file values when
//! [`with_env_overrides`](DiagnosticsConfig::with_env_overrides) is applied:
//!
//! * `DIAGNOSTICS_SERVICE_NAME`
//! * `DIAGNOSTICS_TRACE_ENDPOINT`
//! * `DIAGNOSTICS_BATCH_INTERVAL` (milliseconds)
//! * `DIAGNOSTICS_MAX_BATCH_SIZE`
//! * `DIAGNOSTICS_SAMPLE_RATE`
//! * `DIAGNOSTICS_METRICS_URL`
//! * `DIAGNOSTICS_METRICS_NAMESPACE`
use crate::diag_warn;
use crate::error::{DiagnosticsError, DiagnosticsResult};
use crate::retry::RetryPolicy;
use crate::trace::{BatchConfig, BatchConfigBuilder, Sampler};
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DIAGNOSTICS_SERVICE_NAME: &str = "DIAGNOSTICS_SERVICE_NAME";
const DIAGNOSTICS_TRACE_ENDPOINT: &str = "DIAGNOSTICS_TRACE_ENDPOINT";
const DIAGNOSTICS_BATCH_INTERVAL: &str = "DIAGNOSTICS_BATCH_INTERVAL";
const DIAGNOSTICS_MAX_BATCH_SIZE: &str = "DIAGNOSTICS_MAX_BATCH_SIZE";
const DIAGNOSTICS_SAMPLE_RATE: &str = "DIAGNOSTICS_SAMPLE_RATE";
const DIAGNOSTICS_METRICS_URL: &str = "DIAGNOSTICS_METRICS_URL";
const DIAGNOSTICS_METRICS_NAMESPACE: &str = "DIAGNOSTICS_METRICS_NAMESPACE";

/// Settings for the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosticsConfig {
    /// Tracing is disabled when absent.
    pub tracing: Option<TracingConfig>,
    /// Metrics are disabled when absent.
    pub metrics: Option<MetricsConfig>,
    /// Policy for [`DiagnosticsContext::retry_logic`](crate::DiagnosticsContext::retry_logic).
    pub retry: RetryPolicy,
}

/// Settings for the tracing observer and recorder.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TracingConfig {
    /// Log batches instead of sending them.
    pub debug: bool,
    /// Delay between two flushes.
    #[serde(deserialize_with = "millis")]
    pub batch_interval: Duration,
    /// Records exported per flush.
    pub max_batch_size: usize,
    /// Upper bound of a single export.
    #[serde(deserialize_with = "millis")]
    pub max_export_timeout: Duration,
    /// Where the trace collector listens.
    pub endpoint: Option<String>,
    /// Service name reported on every annotation.
    pub service_name: String,
    /// Trace every root span regardless of `sample_rate`.
    pub force_sampling: bool,
    /// Fraction of root spans traced, within `[0, 1]`.
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        let batch = BatchConfig::default();
        TracingConfig {
            debug: false,
            batch_interval: batch.batch_interval(),
            max_batch_size: batch.max_batch_size(),
            max_export_timeout: batch.max_export_timeout(),
            endpoint: None,
            service_name: String::new(),
            force_sampling: false,
            sample_rate: 1.0,
        }
    }
}

impl TracingConfig {
    /// Batch settings for the recorder.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfigBuilder::default()
            .with_batch_interval(self.batch_interval)
            .with_max_batch_size(self.max_batch_size)
            .with_max_export_timeout(self.max_export_timeout)
            .build()
    }

    /// Sampler for root spans.
    pub fn sampler(&self) -> DiagnosticsResult<Sampler> {
        Sampler::new(self.force_sampling, self.sample_rate)
    }
}

/// Settings for the metrics client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsConfig {
    /// Prefix of every metric name.
    pub namespace: String,
    /// `udp://host:port` of the statsd agent.
    pub url: Option<String>,
    /// Log payloads instead of sending them.
    pub debug: bool,
}

impl DiagnosticsConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> DiagnosticsResult<Self> {
        serde_yaml::from_str(yaml).map_err(|err| {
            DiagnosticsError::Configuration(format!("invalid diagnostics config: {err}"))
        })
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> DiagnosticsResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            DiagnosticsError::Configuration(format!(
                "cannot read diagnostics config {}: {err}",
                path.display()
            ))
        })?;
        Self::from_yaml(&contents)
    }

    /// Apply the `DIAGNOSTICS_*` environment variables on top of this
    /// config. A variable for a missing section creates that section.
    /// Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(service_name) = env_string(DIAGNOSTICS_SERVICE_NAME) {
            self.tracing_mut().service_name = service_name;
        }
        if let Some(endpoint) = env_string(DIAGNOSTICS_TRACE_ENDPOINT) {
            self.tracing_mut().endpoint = Some(endpoint);
        }
        if let Some(interval) = env_parse::<u64>(DIAGNOSTICS_BATCH_INTERVAL) {
            self.tracing_mut().batch_interval = Duration::from_millis(interval);
        }
        if let Some(max_batch_size) = env_parse::<usize>(DIAGNOSTICS_MAX_BATCH_SIZE) {
            self.tracing_mut().max_batch_size = max_batch_size;
        }
        if let Some(sample_rate) = env_parse::<f64>(DIAGNOSTICS_SAMPLE_RATE) {
            self.tracing_mut().sample_rate = sample_rate;
        }
        if let Some(url) = env_string(DIAGNOSTICS_METRICS_URL) {
            self.metrics_mut().url = Some(url);
        }
        if let Some(namespace) = env_string(DIAGNOSTICS_METRICS_NAMESPACE) {
            self.metrics_mut().namespace = namespace;
        }
        self
    }

    /// Check the settings that cannot be expressed in the types.
    pub fn validate(&self) -> DiagnosticsResult<()> {
        if let Some(tracing) = &self.tracing {
            if tracing.service_name.is_empty() {
                return Err(DiagnosticsError::Configuration(
                    "tracing.serviceName must not be empty".into(),
                ));
            }
            if tracing.max_batch_size == 0 {
                return Err(DiagnosticsError::Configuration(
                    "tracing.maxBatchSize must be at least 1".into(),
                ));
            }
            if tracing.batch_interval.is_zero() {
                return Err(DiagnosticsError::Configuration(
                    "tracing.batchInterval must be at least 1ms".into(),
                ));
            }
            tracing.sampler()?;
        }

        if let Some(metrics) = &self.metrics {
            if metrics.namespace.is_empty() {
                return Err(DiagnosticsError::Configuration(
                    "metrics.namespace must not be empty".into(),
                ));
            }
            if !metrics.debug {
                match metrics.url.as_deref() {
                    Some(url) if url.starts_with("udp://") => {}
                    Some(url) => {
                        return Err(DiagnosticsError::Configuration(format!(
                            "metrics.url {url:?} must use the udp:// scheme"
                        )))
                    }
                    None => {
                        return Err(DiagnosticsError::Configuration(
                            "metrics.url is required unless metrics.debug is set".into(),
                        ))
                    }
                }
            }
        }

        if self.retry.attempts == 0 {
            return Err(DiagnosticsError::Configuration(
                "retry.attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn tracing_mut(&mut self) -> &mut TracingConfig {
        self.tracing.get_or_insert_with(TracingConfig::default)
    }

    fn metrics_mut(&mut self) -> &mut MetricsConfig {
        self.metrics.get_or_insert_with(MetricsConfig::default)
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match T::from_str(raw.trim()) {
        Ok(value) => Some(value),
        Err(_) => {
            diag_warn!(
                name: "DiagnosticsConfig.InvalidEnvValue",
                variable = name.to_owned(),
                value = raw
            );
            None
        }
    }
}

/// Deserialize a duration given in whole milliseconds.
fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Deserialize an optional duration given in whole milliseconds.
pub(crate) fn optional_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
tracing:
  serviceName: checkout
  endpoint: http://zipkin:9411/api/v1/spans
  batchInterval: 250
  maxBatchSize: 50
  forceSampling: true
  sampleRate: 0.25
metrics:
  namespace: checkout
  url: udp://statsd:8125
retry:
  attempts: 3
  backoff: 100
  budget: 1000
  jitter: true
"#;

    #[test]
    fn parses_full_document() {
        let config = DiagnosticsConfig::from_yaml(FULL).unwrap();

        let tracing = config.tracing.as_ref().unwrap();
        assert_eq!(tracing.service_name, "checkout");
        assert_eq!(tracing.batch_interval, Duration::from_millis(250));
        assert_eq!(tracing.max_batch_size, 50);
        assert_eq!(tracing.max_export_timeout, Duration::from_secs(30));
        assert!(tracing.force_sampling);
        assert_eq!(tracing.sample_rate, 0.25);
        assert!(!tracing.debug);

        let metrics = config.metrics.as_ref().unwrap();
        assert_eq!(metrics.url.as_deref(), Some("udp://statsd:8125"));

        assert_eq!(
            config.retry,
            RetryPolicy {
                attempts: 3,
                backoff: Some(Duration::from_millis(100)),
                budget: Some(Duration::from_secs(1)),
                jitter: true,
            }
        );
        config.validate().unwrap();
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = DiagnosticsConfig::from_yaml("{}").unwrap();
        assert_eq!(config, DiagnosticsConfig::default());
        assert_eq!(config.retry.attempts, 1);
        config.validate().unwrap();

        let config = DiagnosticsConfig::from_yaml("tracing: { serviceName: a }").unwrap();
        let tracing = config.tracing.unwrap();
        assert_eq!(tracing.batch_interval, Duration::from_millis(500));
        assert_eq!(tracing.max_batch_size, 100);
        assert_eq!(tracing.sample_rate, 1.0);
    }

    #[test]
    fn malformed_yaml_is_a_configuration_error() {
        assert!(matches!(
            DiagnosticsConfig::from_yaml("tracing: [1, 2"),
            Err(DiagnosticsError::Configuration(_))
        ));
        assert!(matches!(
            DiagnosticsConfig::from_yaml_file("/nonexistent/diagnostics.yaml"),
            Err(DiagnosticsError::Configuration(_))
        ));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        temp_env::with_vars(
            [
                (DIAGNOSTICS_SERVICE_NAME, Some("billing")),
                (DIAGNOSTICS_BATCH_INTERVAL, Some("1000")),
                (DIAGNOSTICS_MAX_BATCH_SIZE, Some("not-a-number")),
                (DIAGNOSTICS_SAMPLE_RATE, Some("0.5")),
                (DIAGNOSTICS_METRICS_NAMESPACE, Some("billing")),
                (DIAGNOSTICS_TRACE_ENDPOINT, None),
                (DIAGNOSTICS_METRICS_URL, None),
            ],
            || {
                let config = DiagnosticsConfig::from_yaml(FULL).unwrap().with_env_overrides();
                let tracing = config.tracing.unwrap();
                assert_eq!(tracing.service_name, "billing");
                assert_eq!(tracing.batch_interval, Duration::from_secs(1));
                assert_eq!(tracing.max_batch_size, 50);
                assert_eq!(tracing.sample_rate, 0.5);
                assert_eq!(
                    tracing.endpoint.as_deref(),
                    Some("http://zipkin:9411/api/v1/spans")
                );
                assert_eq!(config.metrics.unwrap().namespace, "billing");
            },
        );
    }

    #[test]
    fn env_overrides_create_missing_sections() {
        temp_env::with_vars(
            [
                (DIAGNOSTICS_SERVICE_NAME, Some("billing")),
                (DIAGNOSTICS_METRICS_URL, Some("udp://127.0.0.1:8125")),
                (DIAGNOSTICS_TRACE_ENDPOINT, None),
                (DIAGNOSTICS_BATCH_INTERVAL, None),
                (DIAGNOSTICS_MAX_BATCH_SIZE, None),
                (DIAGNOSTICS_SAMPLE_RATE, None),
                (DIAGNOSTICS_METRICS_NAMESPACE, None),
            ],
            || {
                let config = DiagnosticsConfig::default().with_env_overrides();
                assert_eq!(config.tracing.unwrap().service_name, "billing");
                assert_eq!(
                    config.metrics.unwrap().url.as_deref(),
                    Some("udp://127.0.0.1:8125")
                );
            },
        );
    }

    #[test]
    fn zero_batch_interval_from_env_is_rejected() {
        temp_env::with_vars(
            [
                (DIAGNOSTICS_SERVICE_NAME, Some("billing")),
                (DIAGNOSTICS_BATCH_INTERVAL, Some("0")),
            ],
            || {
                let config = DiagnosticsConfig::default().with_env_overrides();
                assert_eq!(config.tracing.as_ref().unwrap().batch_interval, Duration::ZERO);
                assert!(matches!(
                    config.validate(),
                    Err(DiagnosticsError::Configuration(_))
                ));
            },
        );
    }

    #[test]
    fn validate_rejects_bad_values() {
        let cases = [
            "tracing: { serviceName: '' }",
            "tracing: { serviceName: a, sampleRate: 1.5 }",
            "tracing: { serviceName: a, maxBatchSize: 0 }",
            "tracing: { serviceName: a, batchInterval: 0 }",
            "metrics: { namespace: a, url: 'http://statsd:8125' }",
            "metrics: { namespace: a }",
            "metrics: { url: 'udp://statsd:8125' }",
            "retry: { attempts: 0 }",
        ];
        for yaml in cases {
            let config = DiagnosticsConfig::from_yaml(yaml).unwrap();
            assert!(
                matches!(config.validate(), Err(DiagnosticsError::Configuration(_))),
                "{yaml} should be rejected"
            );
        }

        let debug = DiagnosticsConfig::from_yaml("metrics: { namespace: a, debug: true }").unwrap();
        debug.validate().unwrap();
    }
}
