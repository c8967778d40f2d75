//! I/O primitives for the harvester: the Prometheus text parser, payload compression, and the HTTP client used for
//! submission, along with its retry and telemetry plumbing.
#![deny(missing_docs)]

pub mod compression;
pub mod deser;
pub mod net;
