//! High-level application primitives.
//!
//! This crate provides common primitives necessary for bootstrapping the harvester prior to running, such as
//! initializing logging and TLS.
#![deny(warnings)]
#![deny(missing_docs)]

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "tls")]
pub mod tls;

/// Common imports.
pub mod prelude {
    #[cfg(feature = "logging")]
    pub use super::logging::{fatal_and_exit, initialize_logging};
    #[cfg(feature = "tls")]
    pub use super::tls::initialize_tls;
}
