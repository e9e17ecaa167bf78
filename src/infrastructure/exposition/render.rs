use crate::domain::family::{LabelPair, MetricFamily, MetricValue};
use std::collections::HashMap;
use std::fmt::Write;
use tracing::warn;

/// Content type served alongside [`render_text`] output
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders families in the Prometheus text exposition format
pub fn render_text(families: &[MetricFamily]) -> String {
    let mut out = String::new();
    for family in families {
        // Writing into a String cannot fail
        let _ = render_family(&mut out, family);
    }
    out
}

/// Folds families sharing a name into one, keeping first-seen order.
///
/// A scrape must not repeat a family name, but several sources can legitimately
/// report the same family. The first occurrence's help and type win; a later
/// family of a different type is dropped.
pub fn merge_families(families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    let mut merged: Vec<MetricFamily> = Vec::with_capacity(families.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for family in families {
        match index.get(&family.name) {
            Some(&i) => {
                let target = &mut merged[i];
                if target.kind != family.kind {
                    warn!(
                        "Dropping family {}: type {} conflicts with {}",
                        family.name,
                        family.kind.as_str(),
                        target.kind.as_str()
                    );
                    continue;
                }
                target.metrics.extend(family.metrics);
            }
            None => {
                index.insert(family.name.clone(), merged.len());
                merged.push(family);
            }
        }
    }
    merged
}

fn render_family(out: &mut String, family: &MetricFamily) -> std::fmt::Result {
    if !family.help.is_empty() {
        writeln!(out, "# HELP {} {}", family.name, escape_help(&family.help))?;
    }
    writeln!(out, "# TYPE {} {}", family.name, family.kind.as_str())?;

    for metric in &family.metrics {
        let ts = metric
            .timestamp_ms
            .map(|t| format!(" {}", t))
            .unwrap_or_default();
        match &metric.value {
            MetricValue::Counter(v) | MetricValue::Gauge(v) | MetricValue::Untyped(v) => {
                writeln!(
                    out,
                    "{}{} {}{}",
                    family.name,
                    labels(&metric.labels, None),
                    format_float(*v),
                    ts
                )?;
            }
            MetricValue::Histogram {
                sample_count,
                sample_sum,
                buckets,
            } => {
                for bucket in buckets {
                    let le = format_float(bucket.upper_bound);
                    writeln!(
                        out,
                        "{}_bucket{} {}{}",
                        family.name,
                        labels(&metric.labels, Some(("le", &le))),
                        bucket.cumulative_count,
                        ts
                    )?;
                }
                render_sum_count(out, &family.name, &metric.labels, *sample_sum, *sample_count, &ts)?;
            }
            MetricValue::Summary {
                sample_count,
                sample_sum,
                quantiles,
            } => {
                for q in quantiles {
                    let quantile = format_float(q.quantile);
                    writeln!(
                        out,
                        "{}{} {}{}",
                        family.name,
                        labels(&metric.labels, Some(("quantile", &quantile))),
                        format_float(q.value),
                        ts
                    )?;
                }
                render_sum_count(out, &family.name, &metric.labels, *sample_sum, *sample_count, &ts)?;
            }
        }
    }
    Ok(())
}

fn render_sum_count(
    out: &mut String,
    name: &str,
    pairs: &[LabelPair],
    sum: f64,
    count: u64,
    ts: &str,
) -> std::fmt::Result {
    let rendered = labels(pairs, None);
    writeln!(out, "{}_sum{} {}{}", name, rendered, format_float(sum), ts)?;
    writeln!(out, "{}_count{} {}{}", name, rendered, count, ts)
}

fn labels(pairs: &[LabelPair], extra: Option<(&str, &str)>) -> String {
    let mut rendered: Vec<String> = pairs
        .iter()
        .map(|l| format!("{}=\"{}\"", l.name, escape_label_value(&l.value)))
        .collect();
    if let Some((name, value)) = extra {
        rendered.push(format!("{}=\"{}\"", name, value));
    }
    if rendered.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", rendered.join(","))
    }
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::family::{Bucket, Metric, MetricKind};
    use crate::infrastructure::exposition::parse_text;

    #[test]
    fn test_renders_gauge_with_labels() {
        let mut family = MetricFamily::new("temp_celsius", "Board temperature", MetricKind::Gauge);
        family.metrics.push(Metric::new(
            vec![LabelPair::new("sensor", "cpu \"0\"")],
            MetricValue::Gauge(41.5),
        ));

        let text = render_text(&[family]);
        assert_eq!(
            text,
            "# HELP temp_celsius Board temperature\n\
             # TYPE temp_celsius gauge\n\
             temp_celsius{sensor=\"cpu \\\"0\\\"\"} 41.5\n"
        );
    }

    #[test]
    fn test_renders_histogram_children() {
        let mut family = MetricFamily::new("lat", "", MetricKind::Histogram);
        family.metrics.push(Metric::new(
            vec![LabelPair::new("dev", "a")],
            MetricValue::Histogram {
                sample_count: 2,
                sample_sum: 0.3,
                buckets: vec![
                    Bucket {
                        upper_bound: 0.25,
                        cumulative_count: 1,
                    },
                    Bucket {
                        upper_bound: f64::INFINITY,
                        cumulative_count: 2,
                    },
                ],
            },
        ));

        let text = render_text(&[family]);
        assert!(!text.contains("# HELP"));
        assert!(text.contains("lat_bucket{dev=\"a\",le=\"0.25\"} 1\n"));
        assert!(text.contains("lat_bucket{dev=\"a\",le=\"+Inf\"} 2\n"));
        assert!(text.contains("lat_sum{dev=\"a\"} 0.3\n"));
        assert!(text.contains("lat_count{dev=\"a\"} 2\n"));
    }

    #[test]
    fn test_merge_folds_same_named_families() {
        let a = MetricFamily::gauge("up", "Target up", 1.0).with_label("source", "a");
        let b = MetricFamily::gauge("up", "", 0.0).with_label("source", "b");
        let other = MetricFamily::gauge("temp", "", 20.0);
        let conflicting = MetricFamily::new("up", "", MetricKind::Counter);

        let merged = merge_families(vec![a, other, b, conflicting]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "up");
        assert_eq!(merged[0].help, "Target up");
        assert_eq!(merged[0].metrics.len(), 2);
        assert_eq!(merged[0].metrics[1].label("source"), Some("b"));
        assert_eq!(merged[1].name, "temp");

        let text = render_text(&merged);
        assert_eq!(text.matches("# TYPE up gauge").count(), 1);
    }

    #[test]
    fn test_rendered_text_parses_back() {
        let source = "# HELP rpc_seconds RPC latency\n\
                      # TYPE rpc_seconds summary\n\
                      rpc_seconds{quantile=\"0.5\"} 0.2\n\
                      rpc_seconds_sum 4\n\
                      rpc_seconds_count 20\n\
                      # TYPE jobs_total counter\n\
                      jobs_total{queue=\"a\\nb\"} 7 1700000000000\n";
        let families = parse_text(source).unwrap();
        assert_eq!(parse_text(&render_text(&families)).unwrap(), families);
    }
}
