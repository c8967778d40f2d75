//! Sources.

pub mod prometheus;
