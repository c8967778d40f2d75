//! Metric data model.

mod batch;
pub use self::batch::Batch;

mod metric;
pub use self::metric::{DataModelError, MetricSample, MetricType, MetricValue};
