//! Prometheus text exposition format.
//!
//! Parses the line-oriented text format served by Prometheus exporters into [`MetricFamily`] values. Histogram and
//! summary children (`_bucket`, `_sum`, `_count`, and `quantile`-labeled samples) are folded back into their parent
//! family and grouped by label set, so consumers see one [`Metric`] per series rather than one per line.

use std::collections::HashMap;

use indexmap::IndexMap;
use snafu::{OptionExt as _, Snafu};

mod helpers;
use self::helpers::{metadata_line, sample_line, sample_value, unescape_help, Metadata};

const QUANTILE_LABEL: &str = "quantile";
const BUCKET_LABEL: &str = "le";

/// Prometheus parse error.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(context(suffix(false)))]
pub enum ParseError {
    /// A sample line could not be parsed.
    #[snafu(display("line {}: malformed sample '{}'", line, text))]
    MalformedSample {
        /// Line number, starting at 1.
        line: usize,

        /// The offending line.
        text: String,
    },

    /// A `# HELP` or `# TYPE` line could not be parsed.
    #[snafu(display("line {}: malformed metadata '{}'", line, text))]
    MalformedMetadata {
        /// Line number, starting at 1.
        line: usize,

        /// The offending line.
        text: String,
    },

    /// A `# TYPE` line named an unsupported metric type.
    #[snafu(display("line {}: unknown metric type '{}'", line, kind))]
    UnknownType {
        /// Line number, starting at 1.
        line: usize,

        /// The unsupported type.
        kind: String,
    },

    /// A sample value was not a valid number.
    #[snafu(display("line {}: invalid sample value '{}'", line, value))]
    InvalidValue {
        /// Line number, starting at 1.
        line: usize,

        /// The offending value.
        value: String,
    },

    /// A sample timestamp was not a valid integer.
    #[snafu(display("line {}: invalid timestamp '{}'", line, timestamp))]
    InvalidTimestamp {
        /// Line number, starting at 1.
        line: usize,

        /// The offending timestamp.
        timestamp: String,
    },

    /// A histogram bucket was missing its `le` label, or the label was not a number.
    #[snafu(display("line {}: histogram bucket for '{}' has a missing or invalid 'le' label", line, name))]
    InvalidBucket {
        /// Line number, starting at 1.
        line: usize,

        /// The family name.
        name: String,
    },

    /// A summary sample was missing its `quantile` label, or the label was not a number.
    #[snafu(display("line {}: summary sample for '{}' has a missing or invalid 'quantile' label", line, name))]
    InvalidQuantile {
        /// Line number, starting at 1.
        line: usize,

        /// The family name.
        name: String,
    },

    /// A sample did not fit the type declared for its family.
    #[snafu(display("line {}: unexpected sample '{}' for {} family", line, name, kind))]
    UnexpectedSample {
        /// Line number, starting at 1.
        line: usize,

        /// The sample name.
        name: String,

        /// The declared family type.
        kind: MetricKind,
    },
}

/// Metric family type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,

    /// Gauge.
    Gauge,

    /// Summary, with client-side quantiles.
    Summary,

    /// Histogram, with cumulative buckets.
    Histogram,

    /// Untyped, either declared as such or lacking a `# TYPE` line.
    Untyped,
}

impl MetricKind {
    fn from_type_str(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(Self::Counter),
            "gauge" => Some(Self::Gauge),
            "summary" => Some(Self::Summary),
            "histogram" => Some(Self::Histogram),
            "untyped" | "unknown" => Some(Self::Untyped),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Summary => "summary",
            Self::Histogram => "histogram",
            Self::Untyped => "untyped",
        };
        f.write_str(s)
    }
}

/// A summary quantile.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantile {
    /// The quantile, between 0 and 1.
    pub quantile: f64,

    /// The observed value at the quantile.
    pub value: f64,
}

/// A histogram bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    /// The inclusive upper bound of the bucket. The last bucket of a histogram has an infinite upper bound.
    pub upper_bound: f64,

    /// The number of observations less than or equal to the upper bound.
    pub cumulative_count: f64,
}

/// The data points of a single series.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricData {
    /// A single value, used by counters, gauges, and untyped metrics.
    Scalar(f64),

    /// Summary data.
    Summary {
        /// Number of observations.
        count: f64,

        /// Sum of all observations.
        sum: f64,

        /// Quantiles, in exposition order.
        quantiles: Vec<Quantile>,
    },

    /// Histogram data.
    Histogram {
        /// Number of observations.
        count: f64,

        /// Sum of all observations.
        sum: f64,

        /// Buckets, in exposition order.
        buckets: Vec<Bucket>,
    },
}

/// A single series within a family.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// Labels identifying the series, sorted by name.
    pub labels: Vec<(String, String)>,

    /// Timestamp given in the exposition, in milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,

    /// The data points.
    pub data: MetricData,
}

/// A metric family: every series sharing a metric name.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
    /// The family name.
    pub name: String,

    /// Help text, if any was given.
    pub help: Option<String>,

    /// The family type.
    pub kind: MetricKind,

    /// The series of the family, in order of first appearance.
    pub metrics: Vec<Metric>,
}

#[derive(Clone, Copy)]
enum SampleRole {
    Scalar,
    Quantile,
    Bucket,
    Sum,
    Count,
}

struct FamilyBuilder {
    help: Option<String>,
    kind: MetricKind,
    metrics: Vec<Metric>,
    groups: HashMap<Vec<(String, String)>, usize>,
}

impl FamilyBuilder {
    fn new() -> Self {
        Self {
            help: None,
            kind: MetricKind::Untyped,
            metrics: Vec::new(),
            groups: HashMap::new(),
        }
    }

    fn empty_data(&self) -> MetricData {
        match self.kind {
            MetricKind::Summary => MetricData::Summary {
                count: 0.0,
                sum: 0.0,
                quantiles: Vec::new(),
            },
            _ => MetricData::Histogram {
                count: 0.0,
                sum: 0.0,
                buckets: Vec::new(),
            },
        }
    }

    fn group_mut(&mut self, labels: Vec<(String, String)>, timestamp_ms: Option<i64>) -> &mut MetricData {
        let idx = match self.groups.get(&labels) {
            Some(idx) => *idx,
            None => {
                let idx = self.metrics.len();
                let data = self.empty_data();
                self.groups.insert(labels.clone(), idx);
                self.metrics.push(Metric {
                    labels,
                    timestamp_ms: None,
                    data,
                });
                idx
            }
        };

        let metric = &mut self.metrics[idx];
        if timestamp_ms.is_some() {
            metric.timestamp_ms = timestamp_ms;
        }
        &mut metric.data
    }
}

/// Removes the label with the given name, returning its value parsed as a number.
fn take_numeric_label(labels: &mut Vec<(String, String)>, name: &str) -> Option<f64> {
    let idx = labels.iter().position(|(label, _)| label == name)?;
    let (_, raw) = labels.remove(idx);
    sample_value(&raw).filter(|v| !v.is_nan())
}

fn resolve_family<'a>(
    families: &IndexMap<String, FamilyBuilder>, name: &'a str, line: usize,
) -> Result<(&'a str, SampleRole), ParseError> {
    if let Some(family) = families.get(name) {
        return match family.kind {
            MetricKind::Summary => Ok((name, SampleRole::Quantile)),
            MetricKind::Histogram => UnexpectedSample {
                line,
                name,
                kind: family.kind,
            }
            .fail(),
            _ => Ok((name, SampleRole::Scalar)),
        };
    }

    let suffixes = [
        ("_bucket", SampleRole::Bucket),
        ("_sum", SampleRole::Sum),
        ("_count", SampleRole::Count),
    ];
    for (suffix, role) in suffixes {
        let Some(base) = name.strip_suffix(suffix) else {
            continue;
        };
        let Some(family) = families.get(base) else {
            continue;
        };

        match (family.kind, role) {
            (MetricKind::Histogram, _) | (MetricKind::Summary, SampleRole::Sum | SampleRole::Count) => {
                return Ok((base, role))
            }
            _ => {}
        }
    }

    Ok((name, SampleRole::Scalar))
}

/// Parses a Prometheus text exposition payload into metric families.
///
/// Families are returned in order of first appearance. Families declared by `# TYPE` or `# HELP` lines but without any
/// samples are still returned, with no metrics.
///
/// # Errors
///
/// If any line is malformed, an error naming the line is returned.
pub fn parse_text(input: &str) -> Result<Vec<MetricFamily>, ParseError> {
    let mut families: IndexMap<String, FamilyBuilder> = IndexMap::new();

    for (idx, raw_line) in input.lines().enumerate() {
        let line = idx + 1;
        let text = raw_line.trim();
        if text.is_empty() {
            continue;
        }

        if text.starts_with('#') {
            match metadata_line(text) {
                Ok((_, Metadata::Help { name, text })) => {
                    let family = families.entry(name.to_string()).or_insert_with(FamilyBuilder::new);
                    family.help = Some(unescape_help(text));
                }
                Ok((_, Metadata::Type { name, kind })) => {
                    let kind = MetricKind::from_type_str(kind).context(UnknownType { line, kind })?;
                    let family = families.entry(name.to_string()).or_insert_with(FamilyBuilder::new);
                    family.kind = kind;
                }
                Err(_) => {
                    let body = text.trim_start_matches('#').trim_start();
                    if body.starts_with("HELP ") || body.starts_with("TYPE ") {
                        return MalformedMetadata { line, text }.fail();
                    }
                }
            }
            continue;
        }

        let (_, sample) = sample_line(text).map_err(|_| MalformedSample { line, text }.build())?;
        let value = sample_value(sample.value).context(InvalidValue {
            line,
            value: sample.value,
        })?;
        let timestamp_ms = match sample.timestamp {
            Some(raw) => Some(raw.parse::<i64>().ok().context(InvalidTimestamp { line, timestamp: raw })?),
            None => None,
        };

        let (family_name, role) = resolve_family(&families, sample.name, line)?;
        let family = families
            .entry(family_name.to_string())
            .or_insert_with(FamilyBuilder::new);

        let mut labels = sample.labels;
        labels.sort_by(|a, b| a.0.cmp(&b.0));

        match role {
            SampleRole::Scalar => family.metrics.push(Metric {
                labels,
                timestamp_ms,
                data: MetricData::Scalar(value),
            }),
            SampleRole::Quantile => {
                let quantile = take_numeric_label(&mut labels, QUANTILE_LABEL).context(InvalidQuantile {
                    line,
                    name: family_name,
                })?;
                if let MetricData::Summary { quantiles, .. } = family.group_mut(labels, timestamp_ms) {
                    quantiles.push(Quantile { quantile, value });
                }
            }
            SampleRole::Bucket => {
                let upper_bound = take_numeric_label(&mut labels, BUCKET_LABEL).context(InvalidBucket {
                    line,
                    name: family_name,
                })?;
                if let MetricData::Histogram { buckets, .. } = family.group_mut(labels, timestamp_ms) {
                    buckets.push(Bucket {
                        upper_bound,
                        cumulative_count: value,
                    });
                }
            }
            SampleRole::Sum => match family.group_mut(labels, timestamp_ms) {
                MetricData::Summary { sum, .. } | MetricData::Histogram { sum, .. } => *sum = value,
                MetricData::Scalar(_) => {}
            },
            SampleRole::Count => match family.group_mut(labels, timestamp_ms) {
                MetricData::Summary { count, .. } | MetricData::Histogram { count, .. } => *count = value,
                MetricData::Scalar(_) => {}
            },
        }
    }

    Ok(families
        .into_iter()
        .map(|(name, family)| MetricFamily {
            name,
            help: family.help,
            kind: family.kind,
            metrics: family.metrics,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPOSITION: &str = r#"
# HELP http_requests_total The total number of HTTP requests.
# TYPE http_requests_total counter
http_requests_total{method="post",code="200"} 1027 1395066363000
http_requests_total{method="post",code="400"}    3 1395066363000

# A plain comment.
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
    fn parses_exposition() {
        let families = parse_text(EXPOSITION).unwrap();
        let names = families.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "http_requests_total",
                "metric_without_timestamp_and_labels",
                "http_request_duration_seconds",
                "rpc_duration_seconds"
            ]
        );

        let counter = &families[0];
        assert_eq!(counter.kind, MetricKind::Counter);
        assert_eq!(counter.help.as_deref(), Some("The total number of HTTP requests."));
        assert_eq!(counter.metrics.len(), 2);
        assert_eq!(
            counter.metrics[0].labels,
            vec![
                ("code".to_string(), "200".to_string()),
                ("method".to_string(), "post".to_string())
            ]
        );
        assert_eq!(counter.metrics[0].timestamp_ms, Some(1395066363000));
        assert_eq!(counter.metrics[1].data, MetricData::Scalar(3.0));

        let untyped = &families[1];
        assert_eq!(untyped.kind, MetricKind::Untyped);
        assert_eq!(untyped.metrics[0].data, MetricData::Scalar(12.47));

        let histogram = &families[2];
        assert_eq!(histogram.kind, MetricKind::Histogram);
        assert_eq!(histogram.metrics.len(), 1);
        match &histogram.metrics[0].data {
            MetricData::Histogram { count, sum, buckets } => {
                assert_eq!(*count, 144320.0);
                assert_eq!(*sum, 53423.0);
                assert_eq!(buckets.len(), 3);
                assert_eq!(buckets[2].upper_bound, f64::INFINITY);
                assert_eq!(buckets[2].cumulative_count, 144320.0);
            }
            other => panic!("unexpected data: {:?}", other),
        }

        let summary = &families[3];
        assert_eq!(summary.kind, MetricKind::Summary);
        match &summary.metrics[0].data {
            MetricData::Summary { count, sum, quantiles } => {
                assert_eq!(*count, 2693.0);
                assert_eq!(*sum, 1.7560473e7);
                assert_eq!(
                    quantiles,
                    &vec![
                        Quantile {
                            quantile: 0.5,
                            value: 4773.0
                        },
                        Quantile {
                            quantile: 0.99,
                            value: 76656.0
                        }
                    ]
                );
            }
            other => panic!("unexpected data: {:?}", other),
        }
    }

    #[test]
    fn histogram_series_grouped_by_labels() {
        let input = r#"# TYPE latency histogram
latency_bucket{path="/a",le="1"} 1
latency_bucket{path="/b",le="1"} 2
latency_bucket{path="/a",le="+Inf"} 3
latency_bucket{path="/b",le="+Inf"} 4
latency_count{path="/a"} 3
latency_count{path="/b"} 4
"#;
        let families = parse_text(input).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].metrics.len(), 2);
        assert_eq!(
            families[0].metrics[1].labels,
            vec![("path".to_string(), "/b".to_string())]
        );
    }

    #[test]
    fn typed_family_without_samples() {
        let families = parse_text("# TYPE lonely gauge\n").unwrap();
        assert_eq!(families.len(), 1);
        assert!(families[0].metrics.is_empty());
    }

    #[test]
    fn errors_name_the_line() {
        assert_eq!(
            parse_text("up 1\nup{broken 1\n"),
            Err(ParseError::MalformedSample {
                line: 2,
                text: "up{broken 1".to_string()
            })
        );
        assert_eq!(
            parse_text("# TYPE foo sketch\n"),
            Err(ParseError::UnknownType {
                line: 1,
                kind: "sketch".to_string()
            })
        );
        assert_eq!(
            parse_text("up one\n"),
            Err(ParseError::InvalidValue {
                line: 1,
                value: "one".to_string()
            })
        );
        assert!(matches!(
            parse_text("# TYPE h histogram\nh_bucket{le=\"x\"} 1\n"),
            Err(ParseError::InvalidBucket { line: 2, .. })
        ));
        assert!(matches!(
            parse_text("# TYPE h histogram\nh 1\n"),
            Err(ParseError::UnexpectedSample { line: 2, .. })
        ));
    }

    #[test]
    fn special_values_survive_parsing() {
        let families = parse_text("a NaN\nb +Inf\nc -Inf\n").unwrap();
        assert!(matches!(families[0].metrics[0].data, MetricData::Scalar(v) if v.is_nan()));
        assert_eq!(families[1].metrics[0].data, MetricData::Scalar(f64::INFINITY));
        assert_eq!(families[2].metrics[0].data, MetricData::Scalar(f64::NEG_INFINITY));
    }
}
