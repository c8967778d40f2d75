//! Metric writer.

use harvest_config::{deser::PermissiveBool, GenericConfiguration};
use harvest_context::{TagEncoder, TagLimitPolicy, TagList};
use harvest_core::{
    data_model::{Batch, DataModelError, MetricSample, MetricType, MetricValue},
    stats::SharedStats,
};
use harvest_error::GenericError;
use serde::Deserialize;
use serde_with::serde_as;
use snafu::{ResultExt as _, Snafu};
use tracing::trace;

use crate::transforms::metric_filter::MetricFilter;

/// Metric write errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum WriteError {
    /// The metric name was empty.
    #[snafu(display("metric name must not be empty"))]
    EmptyName,

    /// The value can't be sent to the broker.
    #[snafu(display("invalid value for metric '{}'", name))]
    InvalidValue {
        /// Bare name of the metric.
        name: String,

        /// Error source.
        source: DataModelError,
    },

    /// The value doesn't match the declared metric type.
    #[snafu(display(
        "metric '{}' declared as type '{}' but value is of type '{}'",
        name,
        declared,
        actual
    ))]
    TypeMismatch {
        /// Bare name of the metric.
        name: String,

        /// The declared metric type.
        declared: MetricType,

        /// The type of the value.
        actual: MetricType,
    },
}

/// A single metric data point to write.
#[derive(Clone, Debug)]
pub struct MetricPoint<'a> {
    /// Bare metric name.
    pub name: &'a str,

    /// Declared metric type.
    pub metric_type: MetricType,

    /// The value.
    pub value: MetricValue,

    /// Stream tags.
    pub stream_tags: &'a TagList,

    /// Measurement tags.
    pub measurement_tags: &'a TagList,

    /// Timestamp, in milliseconds since the Unix epoch.
    pub timestamp_ms: Option<u64>,

    /// Whether or not the metric came from a dynamically discovered endpoint.
    pub dynamic: bool,
}

impl<'a> MetricPoint<'a> {
    /// Creates a new `MetricPoint` with no measurement tags and no timestamp.
    ///
    /// The declared type is taken from the value.
    pub fn new(name: &'a str, value: MetricValue, stream_tags: &'a TagList) -> Self {
        static EMPTY: TagList = TagList::new();

        Self {
            name,
            metric_type: value.metric_type(),
            value,
            stream_tags,
            measurement_tags: &EMPTY,
            timestamp_ms: None,
            dynamic: false,
        }
    }

    /// Sets the timestamp.
    pub fn with_timestamp_ms(mut self, timestamp_ms: Option<u64>) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Sets the measurement tags.
    pub fn with_measurement_tags(mut self, measurement_tags: &'a TagList) -> Self {
        self.measurement_tags = measurement_tags;
        self
    }

    /// Marks the metric as coming from a dynamically discovered endpoint.
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }
}

/// Writes metric samples into batches.
///
/// Every sample goes through the same steps: validation, filtering, tagged name encoding, and finally insertion into the
/// batch. Samples rejected by the filter are counted in the shared submission stats.
#[derive(Clone, Debug)]
pub struct MetricWriter {
    encoder: TagEncoder,
    filter: MetricFilter,
    stats: SharedStats,
    default_stream_tags: TagList,
    filter_dynamic: bool,
}

impl MetricWriter {
    /// Creates a new `MetricWriter`.
    pub fn new(encoder: TagEncoder, filter: MetricFilter, stats: SharedStats) -> Self {
        Self {
            encoder,
            filter,
            stats,
            default_stream_tags: TagList::new(),
            filter_dynamic: false,
        }
    }

    /// Sets the stream tags added to every metric.
    pub fn with_default_stream_tags(mut self, tags: TagList) -> Self {
        self.default_stream_tags = tags;
        self
    }

    /// Sets whether or not metrics from dynamically discovered endpoints are filtered.
    ///
    /// Defaults to `false`.
    pub fn with_filter_dynamic(mut self, filter_dynamic: bool) -> Self {
        self.filter_dynamic = filter_dynamic;
        self
    }

    /// Returns the shared submission stats.
    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Writes a metric point into the batch.
    ///
    /// Returns `Ok(true)` if the point was added to the batch, and `Ok(false)` if it was rejected by the metric filter or
    /// the tag encoder's limits.
    ///
    /// # Errors
    ///
    /// If the name is empty, the value is a NaN or infinite float, or the value doesn't match the declared type, an
    /// error is returned and the batch is left untouched.
    pub fn write(&self, batch: &mut Batch, point: MetricPoint<'_>) -> Result<bool, WriteError> {
        let MetricPoint {
            name,
            metric_type,
            value,
            stream_tags,
            measurement_tags,
            timestamp_ms,
            dynamic,
        } = point;

        if name.is_empty() {
            return Err(WriteError::EmptyName);
        }
        value.validate().context(InvalidValue { name })?;
        if value.metric_type() != metric_type {
            return TypeMismatch {
                name,
                declared: metric_type,
                actual: value.metric_type(),
            }
            .fail();
        }

        if (!dynamic || self.filter_dynamic) && !self.filter.is_allowed(name) {
            trace!(metric_name = name, "Metric rejected by filter.");
            self.stats.add_filtered(1);
            return Ok(false);
        }

        let tagged_name = if self.default_stream_tags.is_empty() {
            self.encoder.tagged_name(name, stream_tags, measurement_tags)
        } else {
            let stream_tags = self.default_stream_tags.merged(stream_tags);
            self.encoder.tagged_name(name, &stream_tags, measurement_tags)
        };

        match tagged_name {
            Some(tagged_name) => {
                batch.insert(tagged_name, MetricSample::new(value, timestamp_ms));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Writes a gauge (`n`).
    ///
    /// # Errors
    ///
    /// See [`write`][Self::write].
    pub fn gauge(
        &self, batch: &mut Batch, name: &str, stream_tags: &TagList, value: f64, timestamp_ms: Option<u64>,
    ) -> Result<bool, WriteError> {
        let point = MetricPoint::new(name, MetricValue::Float64(value), stream_tags).with_timestamp_ms(timestamp_ms);
        self.write(batch, point)
    }

    /// Writes a counter (`L`).
    ///
    /// # Errors
    ///
    /// See [`write`][Self::write].
    pub fn counter(
        &self, batch: &mut Batch, name: &str, stream_tags: &TagList, value: u64, timestamp_ms: Option<u64>,
    ) -> Result<bool, WriteError> {
        let point = MetricPoint::new(name, MetricValue::Uint64(value), stream_tags).with_timestamp_ms(timestamp_ms);
        self.write(batch, point)
    }

    /// Writes a text metric (`s`).
    ///
    /// # Errors
    ///
    /// See [`write`][Self::write].
    pub fn text(
        &self, batch: &mut Batch, name: &str, stream_tags: &TagList, value: String, timestamp_ms: Option<u64>,
    ) -> Result<bool, WriteError> {
        let point = MetricPoint::new(name, MetricValue::Text(value), stream_tags).with_timestamp_ms(timestamp_ms);
        self.write(batch, point)
    }

    /// Writes a cumulative histogram (`H`).
    ///
    /// Each entry must already be formatted as `H[<bound>]=<count>`. Histograms never carry a timestamp.
    ///
    /// # Errors
    ///
    /// See [`write`][Self::write].
    pub fn histogram_cumulative(
        &self, batch: &mut Batch, name: &str, stream_tags: &TagList, entries: Vec<String>,
    ) -> Result<bool, WriteError> {
        let point = MetricPoint::new(name, MetricValue::CumulativeHistogram(entries), stream_tags);
        self.write(batch, point)
    }
}

/// Tag encoder configuration.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EncoderConfiguration {
    /// Whether or not tags are base64-encoded.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub base64_tags: bool,

    /// Policy applied to metrics with too many tags.
    #[serde(default)]
    pub tag_limit_policy: TagLimitPolicy,

    /// Comma-separated `category:value` tags added to the stream tags of every metric.
    #[serde(default)]
    pub default_streamtags: String,
}

impl EncoderConfiguration {
    /// Creates a new `EncoderConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Builds the configured tag encoder.
    pub fn encoder(&self) -> TagEncoder {
        TagEncoder::new()
            .with_base64(self.base64_tags)
            .with_limit_policy(self.tag_limit_policy)
    }

    /// Returns the configured default stream tags.
    pub fn default_stream_tags(&self) -> TagList {
        TagList::from_delimited(&self.default_streamtags)
    }
}
