use std::{fmt, str::FromStr};

use serde::{ser::SerializeMap as _, Serialize, Serializer};
use snafu::Snafu;

/// Data model errors.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(context(suffix(false)))]
pub enum DataModelError {
    /// The metric type code was not one of the recognized codes.
    #[snafu(display("unknown metric type code '{}'", code))]
    UnknownType {
        /// The unrecognized code.
        code: String,
    },

    /// A floating-point value was NaN.
    #[snafu(display("value is NaN"))]
    NotANumber,

    /// A floating-point value was infinite, which has no representation on the wire.
    #[snafu(display("value {} is not finite", value))]
    NotFinite {
        /// The offending value.
        value: f64,
    },

    /// A value could not be represented by the requested metric type.
    #[snafu(display("value {} is out of range for metric type '{}'", value, metric_type))]
    OutOfRange {
        /// The requested metric type.
        metric_type: MetricType,

        /// The offending value.
        value: f64,
    },

    /// A numeric value was given for a non-numeric metric type.
    #[snafu(display("metric type '{}' cannot hold a numeric value", metric_type))]
    TypeMismatch {
        /// The requested metric type.
        metric_type: MetricType,
    },
}

/// Metric type.
///
/// Each type maps to a single-character code on the wire.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricType {
    /// Signed 32-bit integer (`i`).
    Int32,

    /// Unsigned 32-bit integer (`I`).
    Uint32,

    /// Signed 64-bit integer (`l`).
    Int64,

    /// Unsigned 64-bit integer (`L`).
    Uint64,

    /// 64-bit floating-point number (`n`).
    Float64,

    /// Text (`s`).
    Text,

    /// Histogram (`h`).
    Histogram,

    /// Cumulative histogram (`H`).
    CumulativeHistogram,
}

impl MetricType {
    /// Returns the wire code for this type.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Int32 => "i",
            Self::Uint32 => "I",
            Self::Int64 => "l",
            Self::Uint64 => "L",
            Self::Float64 => "n",
            Self::Text => "s",
            Self::Histogram => "h",
            Self::CumulativeHistogram => "H",
        }
    }

    /// Returns `true` if samples of this type carry a timestamp.
    ///
    /// Histogram types never do.
    pub const fn carries_timestamp(self) -> bool {
        !matches!(self, Self::Histogram | Self::CumulativeHistogram)
    }
}

impl FromStr for MetricType {
    type Err = DataModelError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "i" => Ok(Self::Int32),
            "I" => Ok(Self::Uint32),
            "l" => Ok(Self::Int64),
            "L" => Ok(Self::Uint64),
            "n" => Ok(Self::Float64),
            "s" => Ok(Self::Text),
            "h" => Ok(Self::Histogram),
            "H" => Ok(Self::CumulativeHistogram),
            _ => Err(DataModelError::UnknownType { code: code.to_string() }),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for MetricType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

/// A metric value.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Signed 32-bit integer.
    Int32(i32),

    /// Unsigned 32-bit integer.
    Uint32(u32),

    /// Signed 64-bit integer.
    Int64(i64),

    /// Unsigned 64-bit integer.
    Uint64(u64),

    /// 64-bit floating-point number.
    Float64(f64),

    /// Text.
    Text(String),

    /// Histogram entries, each formatted as `H[<bound>]=<count>`.
    Histogram(Vec<String>),

    /// Cumulative histogram entries, each formatted as `H[<bound>]=<count>`.
    CumulativeHistogram(Vec<String>),
}

impl MetricValue {
    /// Converts a floating-point value into a value of the given numeric metric type.
    ///
    /// # Errors
    ///
    /// If the value is NaN or infinite, doesn't fit the requested type, or the type isn't numeric, an error is
    /// returned.
    pub fn from_f64(metric_type: MetricType, value: f64) -> Result<Self, DataModelError> {
        if value.is_nan() {
            return Err(DataModelError::NotANumber);
        }
        if value.is_infinite() {
            return Err(DataModelError::NotFinite { value });
        }

        let out_of_range = || DataModelError::OutOfRange { metric_type, value };
        let integral = value.trunc();

        match metric_type {
            MetricType::Float64 => Ok(Self::Float64(value)),
            MetricType::Int32 if integral >= i32::MIN as f64 && integral <= i32::MAX as f64 => {
                Ok(Self::Int32(integral as i32))
            }
            MetricType::Uint32 if integral >= 0.0 && integral <= u32::MAX as f64 => Ok(Self::Uint32(integral as u32)),
            // `as` saturates at the bounds, so only the sign needs checking for the 64-bit types.
            MetricType::Int64 => Ok(Self::Int64(integral as i64)),
            MetricType::Uint64 if integral >= 0.0 => Ok(Self::Uint64(integral as u64)),
            MetricType::Int32 | MetricType::Uint32 | MetricType::Uint64 => Err(out_of_range()),
            MetricType::Text | MetricType::Histogram | MetricType::CumulativeHistogram => {
                Err(DataModelError::TypeMismatch { metric_type })
            }
        }
    }

    /// Returns the metric type of this value.
    pub const fn metric_type(&self) -> MetricType {
        match self {
            Self::Int32(_) => MetricType::Int32,
            Self::Uint32(_) => MetricType::Uint32,
            Self::Int64(_) => MetricType::Int64,
            Self::Uint64(_) => MetricType::Uint64,
            Self::Float64(_) => MetricType::Float64,
            Self::Text(_) => MetricType::Text,
            Self::Histogram(_) => MetricType::Histogram,
            Self::CumulativeHistogram(_) => MetricType::CumulativeHistogram,
        }
    }

    /// Checks that the value can be represented on the wire.
    ///
    /// # Errors
    ///
    /// If the value is a NaN or infinite float, an error is returned.
    pub fn validate(&self) -> Result<(), DataModelError> {
        match self {
            Self::Float64(value) if value.is_nan() => Err(DataModelError::NotANumber),
            Self::Float64(value) if value.is_infinite() => Err(DataModelError::NotFinite { value: *value }),
            _ => Ok(()),
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Int32(v) => serializer.serialize_i32(*v),
            Self::Uint32(v) => serializer.serialize_u32(*v),
            Self::Int64(v) => serializer.serialize_i64(*v),
            Self::Uint64(v) => serializer.serialize_u64(*v),
            Self::Float64(v) => serializer.serialize_f64(*v),
            Self::Text(v) => serializer.serialize_str(v),
            Self::Histogram(entries) | Self::CumulativeHistogram(entries) => entries.serialize(serializer),
        }
    }
}

/// A single metric sample.
///
/// Serializes as `{"_type": <code>, "_value": <value>, "_ts": <unix millis>}`, with `_ts` omitted when there is no
/// timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    value: MetricValue,
    timestamp_ms: Option<u64>,
}

impl MetricSample {
    /// Creates a new sample.
    ///
    /// Any timestamp given for a histogram value is discarded, as histograms never carry one.
    pub fn new(value: MetricValue, timestamp_ms: Option<u64>) -> Self {
        let timestamp_ms = timestamp_ms.filter(|_| value.metric_type().carries_timestamp());
        Self { value, timestamp_ms }
    }

    /// Returns the value of the sample.
    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    /// Returns the metric type of the sample.
    pub fn metric_type(&self) -> MetricType {
        self.value.metric_type()
    }

    /// Returns the timestamp of the sample, in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.timestamp_ms
    }
}

impl Serialize for MetricSample {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.timestamp_ms.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("_type", &self.metric_type())?;
        map.serialize_entry("_value", &self.value)?;
        if let Some(ts) = self.timestamp_ms {
            map.serialize_entry("_ts", &ts)?;
        }
        map.end()
    }
}
