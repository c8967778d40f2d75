//! Deserialization of scraped payloads.

pub mod codec;
