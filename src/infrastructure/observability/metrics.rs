//! Self-metrics for the relay
//!
//! Everything lives in a private registry, never the process default, so these
//! series cannot collide with the families being relayed. All metrics use the
//! `promrelay_` prefix.

use crate::domain::errors::GatherError;
use crate::domain::family::MetricFamily;
use crate::domain::ports::Gatherer;
use crate::infrastructure::exposition::parse_text;
use async_trait::async_trait;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder, linear_buckets,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Label added to receiver-side series to identify the originating device
pub const SOURCE_LABEL: &str = "source";

/// Static labels identifying this deployment (device, location, ...)
pub type Labels = BTreeMap<String, String>;

#[derive(Clone)]
pub struct RelayMetrics {
    registry: Arc<Registry>,
    default_labels: Arc<Labels>,
    /// Publish-to-broker-ack latency in milliseconds
    pub ack_latency_ms: HistogramVec,
    /// Unix time the relay was constructed
    pub start_time_unix: GaugeVec,
    /// Capture-to-receive latency in seconds, per source
    pub receive_latency_seconds: HistogramVec,
    /// Payloads that could not be decoded as a bundle
    pub decode_failures_total: IntCounterVec,
}

impl RelayMetrics {
    /// Create the registry; label keys are taken from `default_labels`
    pub fn new(default_labels: Labels) -> anyhow::Result<Self> {
        if default_labels.contains_key(SOURCE_LABEL) {
            anyhow::bail!(
                "Default label {:?} is reserved for receiver-side series",
                SOURCE_LABEL
            );
        }

        let registry = Registry::new();
        let keys: Vec<&str> = default_labels.keys().map(String::as_str).collect();
        let mut receive_keys = keys.clone();
        receive_keys.push(SOURCE_LABEL);

        let ack_latency_ms = HistogramVec::new(
            HistogramOpts::new(
                "promrelay_publish_ack_latency_ms",
                "Broker acknowledgment latency of published bundles in milliseconds",
            )
            .buckets(linear_buckets(50.0, 20.0, 20)?),
            &keys,
        )?;
        registry.register(Box::new(ack_latency_ms.clone()))?;

        let start_time_unix = GaugeVec::new(
            Opts::new(
                "promrelay_relay_start_unix",
                "Unix time at which the relay started",
            ),
            &keys,
        )?;
        registry.register(Box::new(start_time_unix.clone()))?;

        let receive_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "promrelay_receive_latency_seconds",
                "Capture-to-receive latency of bundles in seconds",
            )
            .buckets(linear_buckets(0.05, 0.05, 20)?),
            &receive_keys,
        )?;
        registry.register(Box::new(receive_latency_seconds.clone()))?;

        let decode_failures_total = IntCounterVec::new(
            Opts::new(
                "promrelay_receive_decode_failures_total",
                "Delivered payloads that could not be decoded as a bundle",
            ),
            &keys,
        )?;
        registry.register(Box::new(decode_failures_total.clone()))?;

        let metrics = Self {
            registry: Arc::new(registry),
            default_labels: Arc::new(default_labels),
            ack_latency_ms,
            start_time_unix,
            receive_latency_seconds,
            decode_failures_total,
        };
        metrics
            .start_time_unix
            .with_label_values(&metrics.default_values())
            .set(chrono::Utc::now().timestamp() as f64);
        Ok(metrics)
    }

    pub fn default_labels(&self) -> &Labels {
        &self.default_labels
    }

    fn default_values(&self) -> Vec<&str> {
        self.default_labels.values().map(String::as_str).collect()
    }

    /// Ack latency series for this deployment's labels
    pub fn ack_latency(&self) -> Histogram {
        self.ack_latency_ms
            .with_label_values(&self.default_values())
    }

    /// Receive latency series for one source
    pub fn receive_latency(&self, source: &str) -> Histogram {
        let mut values = self.default_values();
        values.push(source);
        self.receive_latency_seconds.with_label_values(&values)
    }

    pub fn observe_ack_latency(&self, latency_ms: f64) {
        self.ack_latency().observe(latency_ms);
    }

    pub fn observe_receive_latency(&self, source: &str, latency_secs: f64) {
        self.receive_latency(source).observe(latency_secs);
    }

    pub fn inc_decode_failures(&self) {
        self.decode_failures_total
            .with_label_values(&self.default_values())
            .inc();
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures_total
            .with_label_values(&self.default_values())
            .get()
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Gatherer for RelayMetrics {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let encoder = TextEncoder::new();
        let text = encoder
            .encode_to_string(&self.registry.gather())
            .map_err(|e| GatherError::Registry(e.to_string()))?;
        parse_text(&text).map_err(|e| GatherError::Registry(e.to_string()))
    }
}
