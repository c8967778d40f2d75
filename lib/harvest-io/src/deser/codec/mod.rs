//! Codecs for the formats understood by the harvester.

pub mod prometheus;
