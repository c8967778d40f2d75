//! Component implementations.
//!
//! This crate contains the pipeline stages of the harvester: the metric filter, the writer that turns individual
//! samples into batch entries, the Prometheus source and translator, and the submission destination.

#![deny(warnings)]
#![deny(missing_docs)]

pub mod common;
pub mod destinations;
pub mod sources;
pub mod transforms;
