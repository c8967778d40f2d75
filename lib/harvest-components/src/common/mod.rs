//! Building blocks shared by sources and destinations.

pub mod writer;
