//! Transform implementations.

pub mod metric_filter;
