//! Networking utilities.

pub mod retry;
