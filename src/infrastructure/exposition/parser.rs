use crate::domain::errors::ExpositionError;
use crate::domain::family::{
    Bucket, LabelPair, Metric, MetricFamily, MetricKind, MetricValue, Quantile,
    is_valid_label_name, is_valid_metric_name,
};
use std::collections::HashMap;

/// Parses the Prometheus text exposition format (0.0.4).
///
/// Families come back in order of first appearance. Families announced by
/// `# HELP` / `# TYPE` but without any sample are dropped.
pub fn parse_text(input: &str) -> Result<Vec<MetricFamily>, ExpositionError> {
    let mut parser = TextParser::default();
    for (idx, raw) in input.lines().enumerate() {
        parser.line(idx + 1, raw)?;
    }
    Ok(parser.finish())
}

/// Histogram or summary sample being assembled from its `_bucket`/`_sum`/`_count` lines
#[derive(Debug, Default)]
struct Composite {
    labels: Vec<LabelPair>,
    count: Option<u64>,
    sum: Option<f64>,
    buckets: Vec<Bucket>,
    quantiles: Vec<Quantile>,
    timestamp_ms: Option<i64>,
}

#[derive(Debug)]
struct FamilyBuilder {
    name: String,
    help: String,
    kind: Option<MetricKind>,
    simple: Vec<Metric>,
    composites: Vec<Composite>,
}

impl FamilyBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            help: String::new(),
            kind: None,
            simple: Vec::new(),
            composites: Vec::new(),
        }
    }

    fn has_samples(&self) -> bool {
        !self.simple.is_empty() || !self.composites.is_empty()
    }

    fn composite(&mut self, labels: Vec<LabelPair>) -> &mut Composite {
        let pos = match self.composites.iter().position(|c| c.labels == labels) {
            Some(pos) => pos,
            None => {
                self.composites.push(Composite {
                    labels,
                    ..Composite::default()
                });
                self.composites.len() - 1
            }
        };
        &mut self.composites[pos]
    }

    fn build(self) -> MetricFamily {
        let kind = self.kind.unwrap_or(MetricKind::Untyped);
        let mut metrics = self.simple;
        for c in self.composites {
            let value = match kind {
                MetricKind::Histogram => {
                    let inf_count = c
                        .buckets
                        .iter()
                        .find(|b| b.upper_bound == f64::INFINITY)
                        .map(|b| b.cumulative_count);
                    MetricValue::Histogram {
                        sample_count: c.count.or(inf_count).unwrap_or(0),
                        sample_sum: c.sum.unwrap_or(0.0),
                        buckets: c.buckets,
                    }
                }
                _ => MetricValue::Summary {
                    sample_count: c.count.unwrap_or(0),
                    sample_sum: c.sum.unwrap_or(0.0),
                    quantiles: c.quantiles,
                },
            };
            metrics.push(Metric {
                labels: c.labels,
                value,
                timestamp_ms: c.timestamp_ms,
            });
        }
        MetricFamily {
            name: self.name,
            help: self.help,
            kind,
            metrics,
        }
    }
}

#[derive(Debug, Default)]
struct TextParser {
    families: Vec<FamilyBuilder>,
    by_name: HashMap<String, usize>,
}

impl TextParser {
    fn family(&mut self, name: &str) -> &mut FamilyBuilder {
        let idx = match self.by_name.get(name) {
            Some(idx) => *idx,
            None => {
                self.families.push(FamilyBuilder::new(name));
                let idx = self.families.len() - 1;
                self.by_name.insert(name.to_string(), idx);
                idx
            }
        };
        &mut self.families[idx]
    }

    fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.by_name
            .get(name)
            .and_then(|idx| self.families[*idx].kind)
    }

    fn line(&mut self, line_no: usize, raw: &str) -> Result<(), ExpositionError> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }
        if let Some(comment) = line.strip_prefix('#') {
            return self.comment(line_no, comment.trim_start());
        }
        self.sample(line_no, line)
    }

    fn comment(&mut self, line_no: usize, comment: &str) -> Result<(), ExpositionError> {
        let (keyword, after_keyword) = next_token(comment);
        if keyword != "HELP" && keyword != "TYPE" {
            return Ok(());
        }
        let (name, rest) = next_token(after_keyword);
        if !is_valid_metric_name(name) {
            return Err(ExpositionError::new(
                line_no,
                format!("invalid {} line", keyword),
            ));
        }
        let rest = rest.trim();

        let family = self.family(name);
        if keyword == "HELP" {
            family.help = unescape_help(rest);
            return Ok(());
        }

        let kind = MetricKind::parse(rest)
            .ok_or_else(|| ExpositionError::new(line_no, format!("unknown metric type {:?}", rest)))?;
        if family.kind.is_some() {
            return Err(ExpositionError::new(
                line_no,
                format!("second TYPE line for metric name {:?}", name),
            ));
        }
        if family.has_samples() {
            return Err(ExpositionError::new(
                line_no,
                format!("TYPE line for {:?} after its samples", name),
            ));
        }
        family.kind = Some(kind);
        Ok(())
    }

    fn sample(&mut self, line_no: usize, line: &str) -> Result<(), ExpositionError> {
        let name_end = line
            .find(|c: char| c == '{' || c.is_whitespace())
            .unwrap_or(line.len());
        let name = &line[..name_end];
        if !is_valid_metric_name(name) {
            return Err(ExpositionError::new(
                line_no,
                format!("invalid metric name {:?}", name),
            ));
        }

        let mut rest = &line[name_end..];
        let labels = if rest.starts_with('{') {
            let (labels, remaining) = parse_labels(line_no, rest)?;
            rest = remaining;
            labels
        } else {
            Vec::new()
        };

        let mut tokens = rest.split_whitespace();
        let value = tokens
            .next()
            .ok_or_else(|| ExpositionError::new(line_no, "missing sample value"))
            .and_then(|v| parse_float(line_no, v))?;
        let timestamp_ms = match tokens.next() {
            Some(ts) => Some(ts.parse::<i64>().map_err(|_| {
                ExpositionError::new(line_no, format!("invalid timestamp {:?}", ts))
            })?),
            None => None,
        };
        if tokens.next().is_some() {
            return Err(ExpositionError::new(line_no, "unexpected trailing tokens"));
        }

        self.place(line_no, name, labels, value, timestamp_ms)
    }

    fn place(
        &mut self,
        line_no: usize,
        name: &str,
        labels: Vec<LabelPair>,
        value: f64,
        timestamp_ms: Option<i64>,
    ) -> Result<(), ExpositionError> {
        // Histogram and summary children are reported under a suffixed name
        for suffix in ["_bucket", "_sum", "_count"] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            let Some(kind) = self.kind_of(base) else {
                continue;
            };
            if kind != MetricKind::Histogram && kind != MetricKind::Summary {
                continue;
            }
            if suffix == "_bucket" && kind != MetricKind::Histogram {
                continue;
            }
            return self.place_composite(line_no, base, suffix, labels, value, timestamp_ms);
        }

        match self.kind_of(name) {
            Some(MetricKind::Summary) => {
                self.place_composite(line_no, name, "", labels, value, timestamp_ms)
            }
            Some(MetricKind::Histogram) => Err(ExpositionError::new(
                line_no,
                format!("histogram {:?} sample without _bucket/_sum/_count suffix", name),
            )),
            kind => {
                let value = match kind {
                    Some(MetricKind::Counter) => MetricValue::Counter(value),
                    Some(MetricKind::Gauge) => MetricValue::Gauge(value),
                    _ => MetricValue::Untyped(value),
                };
                self.family(name).simple.push(Metric {
                    labels,
                    value,
                    timestamp_ms,
                });
                Ok(())
            }
        }
    }

    fn place_composite(
        &mut self,
        line_no: usize,
        base: &str,
        suffix: &str,
        mut labels: Vec<LabelPair>,
        value: f64,
        timestamp_ms: Option<i64>,
    ) -> Result<(), ExpositionError> {
        let bound_label = match suffix {
            "_bucket" => Some("le"),
            "" => Some("quantile"),
            _ => None,
        };
        let bound = match bound_label {
            Some(key) => {
                let pos = labels.iter().position(|l| l.name == key).ok_or_else(|| {
                    ExpositionError::new(line_no, format!("{:?} sample without {:?} label", base, key))
                })?;
                let pair = labels.remove(pos);
                Some(parse_float(line_no, &pair.value)?)
            }
            None => None,
        };

        let composite = self.family(base).composite(labels);
        if timestamp_ms.is_some() {
            composite.timestamp_ms = timestamp_ms;
        }
        match (suffix, bound) {
            ("_bucket", Some(upper_bound)) => composite.buckets.push(Bucket {
                upper_bound,
                cumulative_count: to_count(line_no, value)?,
            }),
            ("", Some(quantile)) => composite.quantiles.push(Quantile { quantile, value }),
            ("_sum", _) => composite.sum = Some(value),
            ("_count", _) => composite.count = Some(to_count(line_no, value)?),
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_iter()
            .filter(FamilyBuilder::has_samples)
            .map(FamilyBuilder::build)
            .collect()
    }
}

/// Splits off the first blank-delimited token, skipping any run of spaces or tabs before it
fn next_token(input: &str) -> (&str, &str) {
    let input = input.trim_start_matches([' ', '\t']);
    match input.find([' ', '\t']) {
        Some(end) => (&input[..end], &input[end..]),
        None => (input, ""),
    }
}

/// Parses `{a="b",c="d"}` and returns the labels plus whatever follows the closing brace
fn parse_labels(line_no: usize, input: &str) -> Result<(Vec<LabelPair>, &str), ExpositionError> {
    let mut labels = Vec::new();
    let mut rest = input[1..].trim_start();

    loop {
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let eq = rest
            .find('=')
            .ok_or_else(|| ExpositionError::new(line_no, "label without '='"))?;
        let name = rest[..eq].trim();
        if !is_valid_label_name(name) {
            return Err(ExpositionError::new(
                line_no,
                format!("invalid label name {:?}", name),
            ));
        }
        rest = rest[eq + 1..].trim_start();
        let quoted = rest
            .strip_prefix('"')
            .ok_or_else(|| ExpositionError::new(line_no, "label value must be quoted"))?;

        let mut value = String::new();
        let mut chars = quoted.char_indices();
        let end = loop {
            match chars.next() {
                Some((i, '"')) => break i,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, other)) => {
                        return Err(ExpositionError::new(
                            line_no,
                            format!("invalid escape sequence \\{}", other),
                        ));
                    }
                    None => return Err(ExpositionError::new(line_no, "unterminated label value")),
                },
                Some((_, c)) => value.push(c),
                None => return Err(ExpositionError::new(line_no, "unterminated label value")),
            }
        };
        if labels.iter().any(|l: &LabelPair| l.name == name) {
            return Err(ExpositionError::new(
                line_no,
                format!("duplicate label name {:?}", name),
            ));
        }
        labels.push(LabelPair::new(name, value));

        rest = quoted[end + 1..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after.trim_start();
        } else if !rest.starts_with('}') {
            return Err(ExpositionError::new(line_no, "expected ',' or '}' after label"));
        }
    }
}

fn parse_float(line_no: usize, token: &str) -> Result<f64, ExpositionError> {
    match token {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => token
            .parse::<f64>()
            .map_err(|_| ExpositionError::new(line_no, format!("invalid value {:?}", token))),
    }
}

fn to_count(line_no: usize, value: f64) -> Result<u64, ExpositionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value as u64)
    } else {
        Err(ExpositionError::new(
            line_no,
            format!("invalid count {}", value),
        ))
    }
}

fn unescape_help(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_EXPORTER: &str = r#"
# HELP http_requests_total The total number of HTTP requests.
# TYPE http_requests_total counter
http_requests_total{method="post",code="200"} 1027 1395066363000
http_requests_total{method="post",code="400"}    3 1395066363000

# A comment that is ignored
msdos_file_access_time_seconds{path="C:\\DIR\\FILE.TXT",error="Cannot find file:\n\"FILE.TXT\""} 1.458255915e9

metric_without_timestamp_and_labels 12.47

# HELP http_request_duration_seconds A histogram of the request duration.
# TYPE http_request_duration_seconds histogram
http_request_duration_seconds_bucket{le="0.05"} 24054
http_request_duration_seconds_bucket{le="0.1"} 33444
http_request_duration_seconds_bucket{le="+Inf"} 144320
http_request_duration_seconds_sum 53423
http_request_duration_seconds_count 144320

# HELP rpc_duration_seconds A summary of the RPC duration in seconds.
# TYPE rpc_duration_seconds summary
rpc_duration_seconds{quantile="0.5"} 4773
rpc_duration_seconds{quantile="0.99"} 76656
rpc_duration_seconds_sum 1.7560473e+07
rpc_duration_seconds_count 2693
"#;

    #[test]
    fn test_parses_reference_exposition() {
        let families = parse_text(NODE_EXPORTER).unwrap();
        let names: Vec<_> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "http_requests_total",
                "msdos_file_access_time_seconds",
                "metric_without_timestamp_and_labels",
                "http_request_duration_seconds",
                "rpc_duration_seconds",
            ]
        );

        let requests = &families[0];
        assert_eq!(requests.kind, MetricKind::Counter);
        assert_eq!(requests.help, "The total number of HTTP requests.");
        assert_eq!(requests.metrics.len(), 2);
        assert_eq!(requests.metrics[1].label("code"), Some("400"));
        assert_eq!(requests.metrics[1].value, MetricValue::Counter(3.0));
        assert_eq!(requests.metrics[0].timestamp_ms, Some(1_395_066_363_000));

        let msdos = &families[1];
        assert_eq!(msdos.kind, MetricKind::Untyped);
        assert_eq!(msdos.metrics[0].label("path"), Some("C:\\DIR\\FILE.TXT"));
        assert_eq!(
            msdos.metrics[0].label("error"),
            Some("Cannot find file:\n\"FILE.TXT\"")
        );
    }

    #[test]
    fn test_groups_histogram_children() {
        let families = parse_text(NODE_EXPORTER).unwrap();
        let histogram = &families[3];
        assert_eq!(histogram.kind, MetricKind::Histogram);
        assert_eq!(histogram.metrics.len(), 1);
        match &histogram.metrics[0].value {
            MetricValue::Histogram {
                sample_count,
                sample_sum,
                buckets,
            } => {
                assert_eq!(*sample_count, 144320);
                assert_eq!(*sample_sum, 53423.0);
                assert_eq!(buckets.len(), 3);
                assert_eq!(buckets[2].upper_bound, f64::INFINITY);
            }
            other => panic!("expected histogram, got {:?}", other),
        }
    }

    #[test]
    fn test_groups_summary_quantiles() {
        let families = parse_text(NODE_EXPORTER).unwrap();
        match &families[4].metrics[0].value {
            MetricValue::Summary {
                sample_count,
                quantiles,
                ..
            } => {
                assert_eq!(*sample_count, 2693);
                assert_eq!(quantiles.len(), 2);
                assert_eq!(quantiles[1].quantile, 0.99);
            }
            other => panic!("expected summary, got {:?}", other),
        }
    }

    #[test]
    fn test_histogram_series_split_by_labels() {
        let text = "# TYPE lat histogram\n\
                    lat_bucket{dev=\"a\",le=\"1\"} 1\n\
                    lat_bucket{dev=\"a\",le=\"+Inf\"} 2\n\
                    lat_bucket{dev=\"b\",le=\"+Inf\"} 5\n\
                    lat_sum{dev=\"a\"} 3\n";
        let families = parse_text(text).unwrap();
        assert_eq!(families[0].metrics.len(), 2);
        // count falls back to the +Inf bucket
        match &families[0].metrics[1].value {
            MetricValue::Histogram { sample_count, .. } => assert_eq!(*sample_count, 5),
            other => panic!("expected histogram, got {:?}", other),
        }
    }

    #[test]
    fn test_drops_families_without_samples() {
        let families = parse_text("# HELP idle nothing here\n# TYPE idle gauge\n").unwrap();
        assert!(families.is_empty());
    }

    #[test]
    fn test_rejects_malformed_input() {
        let err = parse_text("ok 1\nbad{label=unquoted} 1\n").unwrap_err();
        assert_eq!(err.line, 2);

        assert!(parse_text("no_value\n").is_err());
        assert!(parse_text("x 1 notatimestamp\n").is_err());
        assert!(parse_text("# TYPE x gauge\n# TYPE x counter\n").is_err());
        assert!(parse_text("# TYPE x wibble\n").is_err());
        assert!(parse_text("x{a=\"1\",a=\"2\"} 1\n").is_err());
        assert!(parse_text("# TYPE h histogram\nh 1\n").is_err());
    }

    #[test]
    fn test_special_float_values() {
        let families = parse_text("a +Inf\nb -Inf\nc NaN\n").unwrap();
        assert_eq!(families[0].metrics[0].value, MetricValue::Untyped(f64::INFINITY));
        assert_eq!(
            families[1].metrics[0].value,
            MetricValue::Untyped(f64::NEG_INFINITY)
        );
        match families[2].metrics[0].value {
            MetricValue::Untyped(v) => assert!(v.is_nan()),
            ref other => panic!("expected untyped, got {:?}", other),
        }
    }

    #[test]
    fn test_tolerates_runs_of_blanks_in_comments() {
        let input = "#  HELP  foo some  help\n# TYPE\tfoo \t gauge\nfoo 1\n\
                     #\tHELP\t\tbar\t\ttabbed help\nbar 2\n";
        let families = parse_text(input).unwrap();

        assert_eq!(families.len(), 2);
        assert_eq!(families[0].name, "foo");
        assert_eq!(families[0].help, "some  help");
        assert_eq!(families[0].kind, MetricKind::Gauge);
        assert_eq!(families[1].name, "bar");
        assert_eq!(families[1].help, "tabbed help");

        assert!(parse_text("# HELP  \nfoo 1\n").is_err());
    }
}
