use harvest_context::{Tag, TagList};
use harvest_core::data_model::{Batch, MetricType, MetricValue};
use harvest_io::deser::codec::prometheus::{parse_text, Bucket, Metric, MetricData, MetricFamily, ParseError};
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::writer::{MetricPoint, MetricWriter};

/// Bound substituted for the `+Inf` bucket, which the broker can't represent.
const INF_BUCKET_BOUND: f64 = 1e128;

/// Factor applied to finite bucket bounds.
///
/// Prometheus bounds are inclusive upper bounds, while the broker's bins are exclusive, so every bound is nudged down
/// to keep observations that sit exactly on a bound in the right bin.
const BUCKET_BOUND_FACTOR: f64 = 0.999;

/// Translation errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum TranslateError {
    /// The exposition could not be parsed.
    #[snafu(display("failed to parse exposition"))]
    Parse {
        /// Error source.
        source: ParseError,
    },

    /// The exposition held no samples at all.
    #[snafu(display("no metrics found ({} families)", families))]
    ZeroMetrics {
        /// Number of families in the exposition.
        families: usize,
    },
}

/// How histogram families are translated.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HistogramMode {
    /// One cumulative histogram (`H`) sample per series, built from the bucket count differences.
    #[default]
    Cumulative,

    /// One counter (`L`) sample per bucket, tagged with the bucket bound.
    Buckets,
}

/// Translation options.
#[derive(Clone, Debug)]
pub struct TranslateOptions {
    histogram_mode: HistogramMode,
    timestamp_ms: u64,
    dynamic: bool,
}

impl TranslateOptions {
    /// Creates a new `TranslateOptions`.
    ///
    /// Samples without their own timestamp are stamped with `timestamp_ms`.
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            histogram_mode: HistogramMode::default(),
            timestamp_ms,
            dynamic: false,
        }
    }

    /// Sets the histogram mode.
    pub fn with_histogram_mode(mut self, histogram_mode: HistogramMode) -> Self {
        self.histogram_mode = histogram_mode;
        self
    }

    /// Marks the translated metrics as coming from a dynamically discovered endpoint.
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }
}

/// Outcome of a translation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TranslateSummary {
    /// Number of families in the exposition.
    pub families: usize,

    /// Number of samples produced from the exposition.
    pub samples: usize,

    /// Number of samples added to the batch.
    pub written: usize,

    /// Number of samples skipped by the metric filter or the tag limits.
    pub skipped: usize,

    /// Number of samples rejected for having an invalid value.
    pub rejected: usize,

    /// Whether or not translation stopped early due to cancellation.
    pub cancelled: bool,
}

/// Translates a Prometheus text exposition into the given batch.
///
/// Every series is tagged with `base_tags` plus its labels as `label:value` stream tags. Per family type:
///
/// - counters, gauges, and untyped metrics become one float sample each
/// - summaries become `<name>_count`, `<name>_sum`, and one `<name>` sample per quantile, tagged `quantile:<q>`
/// - histograms become `<name>_count`, `<name>_sum`, `<name>_avg` (when there are observations), plus the buckets, as
///   selected by the [`HistogramMode`]
///
/// Samples with an invalid value (NaN, or infinite) are skipped.
///
/// The cancellation token is checked before each family. If it is cancelled, translation stops and the summary is
/// marked as cancelled.
///
/// # Errors
///
/// If the exposition can't be parsed, or it contains no samples, an error is returned. Samples translated before a
/// parse error are never written, as the exposition is parsed in full first.
pub fn translate(
    input: &str, base_tags: &TagList, writer: &MetricWriter, batch: &mut Batch, options: &TranslateOptions,
    cancel: &CancellationToken,
) -> Result<TranslateSummary, TranslateError> {
    let families = parse_text(input).context(Parse)?;

    let mut emitter = Emitter {
        writer,
        batch,
        options,
        summary: TranslateSummary {
            families: families.len(),
            ..Default::default()
        },
    };

    for family in &families {
        if cancel.is_cancelled() {
            debug!("Translation cancelled.");
            emitter.summary.cancelled = true;
            return Ok(emitter.finish());
        }

        for metric in &family.metrics {
            let tags = series_tags(base_tags, metric);
            let timestamp_ms = metric
                .timestamp_ms
                .and_then(|ts| u64::try_from(ts).ok())
                .unwrap_or(options.timestamp_ms);

            emitter.metric(family, metric, &tags, timestamp_ms);
        }
    }

    let summary = emitter.finish();
    if summary.samples == 0 {
        return ZeroMetrics {
            families: summary.families,
        }
        .fail();
    }

    Ok(summary)
}

fn series_tags(base_tags: &TagList, metric: &Metric) -> TagList {
    let labels = metric
        .labels
        .iter()
        // Prometheus treats an empty label value the same as the label being absent.
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| Tag::new(name.as_str(), value.as_str()));

    TagList::from_tags(base_tags.iter().cloned().chain(labels))
}

struct Emitter<'a> {
    writer: &'a MetricWriter,
    batch: &'a mut Batch,
    options: &'a TranslateOptions,
    summary: TranslateSummary,
}

impl Emitter<'_> {
    fn metric(&mut self, family: &MetricFamily, metric: &Metric, tags: &TagList, timestamp_ms: u64) {
        let name = family.name.as_str();

        match &metric.data {
            MetricData::Scalar(value) => {
                self.float(name, MetricType::Float64, *value, tags, Some(timestamp_ms));
            }
            MetricData::Summary { count, sum, quantiles } => {
                self.float(&format!("{}_count", name), MetricType::Uint64, *count, tags, Some(timestamp_ms));
                self.float(&format!("{}_sum", name), MetricType::Float64, *sum, tags, Some(timestamp_ms));

                for quantile in quantiles {
                    let mut quantile_tags = tags.clone();
                    quantile_tags.insert(Tag::new("quantile", format_float(quantile.quantile)));
                    self.float(name, MetricType::Float64, quantile.value, &quantile_tags, Some(timestamp_ms));
                }
            }
            MetricData::Histogram { count, sum, buckets } => {
                self.float(&format!("{}_count", name), MetricType::Uint64, *count, tags, Some(timestamp_ms));
                self.float(&format!("{}_sum", name), MetricType::Float64, *sum, tags, Some(timestamp_ms));
                if *count > 0.0 {
                    self.float(
                        &format!("{}_avg", name),
                        MetricType::Float64,
                        sum / count,
                        tags,
                        Some(timestamp_ms),
                    );
                }

                match self.options.histogram_mode {
                    HistogramMode::Cumulative => {
                        let entries = reduce_histogram(buckets, to_count(*count));
                        if !entries.is_empty() {
                            self.emit(MetricPoint::new(name, MetricValue::CumulativeHistogram(entries), tags));
                        }
                    }
                    HistogramMode::Buckets => {
                        for bucket in buckets {
                            let mut bucket_tags = tags.clone();
                            let bound = if bucket.upper_bound == f64::INFINITY {
                                "+Inf".to_string()
                            } else {
                                format_float(bucket.upper_bound)
                            };
                            bucket_tags.insert(Tag::new("bucket", bound));
                            self.float(
                                name,
                                MetricType::Uint64,
                                bucket.cumulative_count,
                                &bucket_tags,
                                Some(timestamp_ms),
                            );
                        }
                    }
                }
            }
        }
    }

    fn float(&mut self, name: &str, metric_type: MetricType, value: f64, tags: &TagList, timestamp_ms: Option<u64>) {
        match MetricValue::from_f64(metric_type, value) {
            Ok(value) => self.emit(MetricPoint::new(name, value, tags).with_timestamp_ms(timestamp_ms)),
            Err(e) => {
                self.summary.samples += 1;
                self.summary.rejected += 1;
                debug!(metric_name = name, error = %e, "Skipping sample with invalid value.");
            }
        }
    }

    fn emit(&mut self, point: MetricPoint<'_>) {
        self.summary.samples += 1;

        let name = point.name;
        match self.writer.write(self.batch, point.with_dynamic(self.options.dynamic)) {
            Ok(true) => self.summary.written += 1,
            Ok(false) => self.summary.skipped += 1,
            Err(e) => {
                self.summary.rejected += 1;
                debug!(metric_name = name, error = %e, "Skipping invalid sample.");
            }
        }
    }

    fn finish(self) -> TranslateSummary {
        metrics::counter!("translator_samples_total").increment(self.summary.written as u64);
        self.summary
    }
}

/// Reduces cumulative Prometheus buckets into cumulative histogram entries.
///
/// Each entry is formatted as `H[<bound>]=<count>`, where the count is the number of observations in that bucket alone.
/// Empty buckets are omitted, and no entries are produced past the point where `total` observations have been
/// accounted for. Finite bounds are scaled by 0.999, and the `+Inf` bound becomes `1e128`.
pub fn reduce_histogram(buckets: &[Bucket], total: u64) -> Vec<String> {
    if total == 0 {
        return Vec::new();
    }

    let mut sorted = buckets.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));

    let mut entries = Vec::new();
    let mut previous = 0u64;
    let mut running = 0u64;

    for bucket in sorted {
        let cumulative = to_count(bucket.cumulative_count);
        let count = cumulative.saturating_sub(previous);
        previous = previous.max(cumulative);
        if count == 0 {
            continue;
        }

        let bound = if bucket.upper_bound == f64::INFINITY {
            INF_BUCKET_BOUND
        } else {
            bucket.upper_bound * BUCKET_BOUND_FACTOR
        };
        entries.push(format!("H[{}]={}", format_float(bound), count));

        running += count;
        if running >= total {
            break;
        }
    }

    entries
}

fn to_count(value: f64) -> u64 {
    // Float-to-int casts saturate, and map NaN to zero.
    value.round() as u64
}

fn format_float(value: f64) -> String {
    let magnitude = value.abs();
    if value != 0.0 && !(1e-6..1e21).contains(&magnitude) {
        format!("{:e}", value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use harvest_context::TagEncoder;
    use harvest_core::stats::SharedStats;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use proptest::prelude::*;

    use super::*;
    use crate::transforms::metric_filter::MetricFilter;

    const TS: u64 = 1_700_000_000_000;

    fn allow_all_writer() -> MetricWriter {
        let filter = MetricFilter::from_json(r#"[["allow",".*"]]"#).unwrap();
        MetricWriter::new(TagEncoder::new(), filter, SharedStats::new())
    }

    fn run(input: &str, options: TranslateOptions) -> (Batch, Result<TranslateSummary, TranslateError>) {
        let writer = allow_all_writer();
        let mut batch = Batch::new();
        let base_tags = TagList::from_delimited("source:ksm");
        let result = translate(
            input,
            &base_tags,
            &writer,
            &mut batch,
            &options,
            &CancellationToken::new(),
        );
        (batch, result)
    }

    fn value_of<'a>(batch: &'a Batch, name: &str) -> &'a MetricValue {
        batch
            .get(name)
            .unwrap_or_else(|| panic!("missing '{}' in {:?}", name, batch.iter().map(|(n, _)| n).collect::<Vec<_>>()))
            .value()
    }

    #[test]
    fn histogram_reduction() {
        let buckets = [(1.0, 10.0), (2.0, 10.0), (4.0, 25.0), (f64::INFINITY, 40.0)]
            .into_iter()
            .map(|(upper_bound, cumulative_count)| Bucket {
                upper_bound,
                cumulative_count,
            })
            .collect::<Vec<_>>();

        let entries = reduce_histogram(&buckets, 40);
        similar_asserts::assert_eq!(
            entries,
            vec![
                "H[0.999]=10".to_string(),
                format!("H[{}]=15", 4.0 * 0.999),
                "H[1e128]=15".to_string(),
            ]
        );
    }

    #[test]
    fn histogram_reduction_stops_at_total() {
        let buckets = vec![
            Bucket {
                upper_bound: 0.5,
                cumulative_count: 3.0,
            },
            Bucket {
                upper_bound: f64::INFINITY,
                cumulative_count: 9.0,
            },
        ];

        assert_eq!(reduce_histogram(&buckets, 3), vec!["H[0.4995]=3".to_string()]);
        assert!(reduce_histogram(&buckets, 0).is_empty());
    }

    #[test]
    fn scalars_with_labels() {
        let input = "\
# TYPE kube_pod_status_phase gauge
kube_pod_status_phase{namespace=\"default\",pod=\"web-0\",phase=\"Running\"} 1
kube_pod_status_phase{namespace=\"default\",pod=\"web-0\",phase=\"Failed\"} 0 1600000000000
# TYPE apiserver_request_total counter
apiserver_request_total{code=\"\"} 12
";
        let (batch, result) = run(input, TranslateOptions::new(TS));
        let summary = result.unwrap();

        assert_eq!(summary.families, 2);
        assert_eq!(summary.written, 3);

        let running = batch
            .get("kube_pod_status_phase|ST[namespace:default,phase:Running,pod:web-0,source:ksm]")
            .unwrap();
        assert_eq!(running.value(), &MetricValue::Float64(1.0));
        assert_eq!(running.timestamp_ms(), Some(TS));

        let failed = batch
            .get("kube_pod_status_phase|ST[namespace:default,phase:Failed,pod:web-0,source:ksm]")
            .unwrap();
        assert_eq!(failed.timestamp_ms(), Some(1_600_000_000_000));

        assert_eq!(
            value_of(&batch, "apiserver_request_total|ST[source:ksm]"),
            &MetricValue::Float64(12.0)
        );
    }

    #[test]
    fn invalid_values_are_skipped() {
        let input = "\
# TYPE temperature gauge
temperature{room=\"a\"} NaN
temperature{room=\"b\"} 21.5
untyped_metric +Inf
";
        let (batch, result) = run(input, TranslateOptions::new(TS));
        let summary = result.unwrap();

        assert_eq!(summary.samples, 3);
        assert_eq!(summary.written, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(batch.len(), 1);
        assert!(batch.contains("temperature|ST[room:b,source:ksm]"));
    }

    #[test]
    fn summaries() {
        let input = "\
# TYPE rpc_duration_seconds summary
rpc_duration_seconds{quantile=\"0.5\"} 0.25
rpc_duration_seconds{quantile=\"0.99\"} NaN
rpc_duration_seconds_sum 17.5
rpc_duration_seconds_count 70
";
        let (batch, result) = run(input, TranslateOptions::new(TS));
        let summary = result.unwrap();

        assert_eq!(summary.written, 3);
        assert_eq!(summary.rejected, 1);
        assert_eq!(
            value_of(&batch, "rpc_duration_seconds_count|ST[source:ksm]"),
            &MetricValue::Uint64(70)
        );
        assert_eq!(
            value_of(&batch, "rpc_duration_seconds_sum|ST[source:ksm]"),
            &MetricValue::Float64(17.5)
        );
        assert_eq!(
            value_of(&batch, "rpc_duration_seconds|ST[quantile:0.5,source:ksm]"),
            &MetricValue::Float64(0.25)
        );
    }

    const HISTOGRAM: &str = "\
# TYPE request_duration_seconds histogram
request_duration_seconds_bucket{le=\"1\"} 10
request_duration_seconds_bucket{le=\"2\"} 10
request_duration_seconds_bucket{le=\"4\"} 25
request_duration_seconds_bucket{le=\"+Inf\"} 40
request_duration_seconds_sum 100
request_duration_seconds_count 40
";

    #[test]
    fn histogram_cumulative_mode() {
        let (batch, result) = run(HISTOGRAM, TranslateOptions::new(TS));
        assert_eq!(result.unwrap().written, 4);

        assert_eq!(
            value_of(&batch, "request_duration_seconds_count|ST[source:ksm]"),
            &MetricValue::Uint64(40)
        );
        assert_eq!(
            value_of(&batch, "request_duration_seconds_avg|ST[source:ksm]"),
            &MetricValue::Float64(2.5)
        );

        let histogram = batch.get("request_duration_seconds|ST[source:ksm]").unwrap();
        assert_eq!(histogram.timestamp_ms(), None);
        match histogram.value() {
            MetricValue::CumulativeHistogram(entries) => {
                assert_eq!(entries.len(), 3);
                assert_eq!(entries.first().map(String::as_str), Some("H[0.999]=10"));
                assert_eq!(entries.last().map(String::as_str), Some("H[1e128]=15"));
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn histogram_buckets_mode() {
        let options = TranslateOptions::new(TS).with_histogram_mode(HistogramMode::Buckets);
        let (batch, result) = run(HISTOGRAM, options);
        assert_eq!(result.unwrap().written, 7);

        assert_eq!(
            value_of(&batch, "request_duration_seconds|ST[bucket:4,source:ksm]"),
            &MetricValue::Uint64(25)
        );
        assert_eq!(
            value_of(&batch, "request_duration_seconds|ST[bucket:+Inf,source:ksm]"),
            &MetricValue::Uint64(40)
        );
    }

    #[test]
    fn empty_histogram_has_no_average() {
        let input = "\
# TYPE idle_seconds histogram
idle_seconds_bucket{le=\"+Inf\"} 0
idle_seconds_sum 0
idle_seconds_count 0
";
        let (batch, result) = run(input, TranslateOptions::new(TS));
        assert_eq!(result.unwrap().written, 2);
        assert!(!batch.contains("idle_seconds_avg|ST[source:ksm]"));
        assert!(!batch.contains("idle_seconds|ST[source:ksm]"));
    }

    #[test]
    fn zero_metrics() {
        let (_, result) = run("# TYPE foo gauge\n", TranslateOptions::new(TS));
        assert!(matches!(result, Err(TranslateError::ZeroMetrics { families: 1 })));
    }

    #[test]
    fn parse_errors() {
        let (batch, result) = run("foo 1\nbar{ 2\n", TranslateOptions::new(TS));
        assert!(matches!(result, Err(TranslateError::Parse { .. })));
        assert!(batch.is_empty());
    }

    #[test]
    fn cancellation() {
        let writer = allow_all_writer();
        let mut batch = Batch::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = translate(
            HISTOGRAM,
            &TagList::new(),
            &writer,
            &mut batch,
            &TranslateOptions::new(TS),
            &cancel,
        )
        .unwrap();
        assert!(summary.cancelled);
        assert!(batch.is_empty());
    }

    #[test]
    fn filtered_samples_are_skipped() {
        let filter = MetricFilter::from_json(r#"[["allow","^request_duration_seconds$"],["deny",".*"]]"#).unwrap();
        let stats = SharedStats::new();
        let writer = MetricWriter::new(TagEncoder::new(), filter, stats.clone());
        let mut batch = Batch::new();

        let summary = translate(
            HISTOGRAM,
            &TagList::new(),
            &writer,
            &mut batch,
            &TranslateOptions::new(TS),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(stats.snapshot().filtered, 3);
    }

    #[test]
    fn counts_written_samples() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            let _ = run(HISTOGRAM, TranslateOptions::new(TS));
        });

        let written = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(key, _, _, value)| match (key.key().name(), value) {
                ("translator_samples_total", DebugValue::Counter(count)) => Some(count),
                _ => None,
            });
        assert_eq!(written, Some(4));
    }

    proptest! {
        #[test]
        fn reduction_accounts_for_every_observation(increments in proptest::collection::vec(0u32..1000, 1..20)) {
            let mut cumulative = 0u64;
            let mut buckets = Vec::with_capacity(increments.len());
            for (i, increment) in increments.iter().enumerate() {
                cumulative += u64::from(*increment);
                let upper_bound = if i + 1 == increments.len() { f64::INFINITY } else { (i + 1) as f64 };
                buckets.push(Bucket { upper_bound, cumulative_count: cumulative as f64 });
            }

            let entries = reduce_histogram(&buckets, cumulative);
            let mut sum = 0u64;
            for entry in &entries {
                let count = entry.rsplit('=').next().unwrap().parse::<u64>().unwrap();
                prop_assert!(count > 0);
                sum += count;
            }
            prop_assert_eq!(sum, cumulative);
        }
    }
}
