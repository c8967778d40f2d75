//! Core primitives for the harvester: the metric data model, batches, submission statistics, and the seams used to
//! orchestrate collectors.
#![deny(missing_docs)]

pub mod collector;
pub mod data_model;
pub mod state;
pub mod stats;
pub mod task;
