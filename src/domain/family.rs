//! Metric family snapshots.
//!
//! This is the unit of data a bundle carries. The relay never interprets a family
//! beyond concatenating it with others and, optionally, tagging it with its source,
//! so the shape simply mirrors the Prometheus exposition model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricKind {
    /// Name used on `# TYPE` lines
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "histogram" => Some(MetricKind::Histogram),
            "summary" => Some(MetricKind::Summary),
            "untyped" | "unknown" => Some(MetricKind::Untyped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

impl LabelPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Histogram {
        sample_count: u64,
        sample_sum: f64,
        buckets: Vec<Bucket>,
    },
    Summary {
        sample_count: u64,
        sample_sum: f64,
        quantiles: Vec<Quantile>,
    },
}

/// One sample of a family: a label set plus its value(s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub labels: Vec<LabelPair>,
    pub value: MetricValue,
    pub timestamp_ms: Option<i64>,
}

impl Metric {
    pub fn new(labels: Vec<LabelPair>, value: MetricValue) -> Self {
        Self {
            labels,
            value,
            timestamp_ms: None,
        }
    }

    /// Returns a copy carrying one more label. An existing label with the same
    /// name is overwritten.
    pub fn with_label(&self, name: &str, value: &str) -> Self {
        let mut metric = self.clone();
        match metric.labels.iter_mut().find(|l| l.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => metric.labels.push(LabelPair::new(name, value)),
        }
        metric
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            metrics: Vec::new(),
        }
    }

    /// Single-sample gauge family, mostly handy in tests
    pub fn gauge(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        let mut family = Self::new(name, help, MetricKind::Gauge);
        family
            .metrics
            .push(Metric::new(Vec::new(), MetricValue::Gauge(value)));
        family
    }

    /// Returns a copy with `name=value` added to every sample
    pub fn with_label(&self, name: &str, value: &str) -> Self {
        Self {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: self.kind,
            metrics: self
                .metrics
                .iter()
                .map(|m| m.with_label(name, value))
                .collect(),
        }
    }
}

/// Whether `name` matches `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Whether `name` matches `[a-zA-Z_][a-zA-Z0-9_]*`
pub fn is_valid_label_name(name: &str) -> bool {
    !name.contains(':') && is_valid_metric_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_label_appends_and_overwrites() {
        let metric = Metric::new(
            vec![LabelPair::new("job", "node")],
            MetricValue::Counter(3.0),
        );

        let tagged = metric.with_label("source", "dev-1");
        assert_eq!(tagged.label("job"), Some("node"));
        assert_eq!(tagged.label("source"), Some("dev-1"));

        let retagged = tagged.with_label("source", "dev-2");
        assert_eq!(retagged.labels.len(), 2);
        assert_eq!(retagged.label("source"), Some("dev-2"));
    }

    #[test]
    fn test_family_with_label_touches_every_sample() {
        let mut family = MetricFamily::new("up", "Target up", MetricKind::Gauge);
        family
            .metrics
            .push(Metric::new(vec![], MetricValue::Gauge(1.0)));
        family.metrics.push(Metric::new(
            vec![LabelPair::new("instance", "b")],
            MetricValue::Gauge(0.0),
        ));

        let tagged = family.with_label("source", "7");
        assert!(tagged.metrics.iter().all(|m| m.label("source") == Some("7")));
        assert_eq!(family.metrics[0].labels.len(), 0);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(MetricKind::parse("histogram"), Some(MetricKind::Histogram));
        assert_eq!(MetricKind::parse("unknown"), Some(MetricKind::Untyped));
        assert_eq!(MetricKind::parse("bogus"), None);
        assert_eq!(MetricKind::Summary.as_str(), "summary");
    }

    #[test]
    fn test_name_rules() {
        assert!(is_valid_metric_name("node:cpu_seconds_total"));
        assert!(!is_valid_metric_name("1up"));
        assert!(!is_valid_metric_name(""));

        assert!(is_valid_label_name("_device_id"));
        assert!(!is_valid_label_name("job:name"));
        assert!(!is_valid_label_name("dev-id"));
        assert!(!is_valid_label_name(""));
    }
}
