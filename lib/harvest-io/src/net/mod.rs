//! Networking.

pub mod client;
pub mod util;
