//! Destinations.

pub mod submission;
