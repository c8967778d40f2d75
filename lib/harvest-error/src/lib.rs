//! Error primitives shared across the harvester crates.
//!
//! Library crates expose their own typed errors (via `snafu`), and this crate provides the type-erased error used
//! where those errors meet: configuration loading, process bootstrap, and collector orchestration.

use std::fmt::Display;

/// A type-erased error, carrying an optional chain of sources.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments (same rules as `std::format!`), or any value that
/// implements both `Debug` and `Display`. When the value is itself an `std::error::Error`, its source chain is
/// preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

pub(crate) mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

// `anyhow::Context` is wrapped so that its extension methods don't collide with `snafu::ResultExt::context` in modules
// that need both.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with additional context, evaluated only if an error occurred.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, context: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prepended_to_chain() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("socket closed"));
        let err = result.error_context("Failed to submit batch.").unwrap_err();

        assert_eq!(err.to_string(), "Failed to submit batch.");
        assert_eq!(err.root_cause().to_string(), "socket closed");
    }

    #[test]
    fn macro_formats_arguments() {
        let err = generic_error!("endpoint {} returned {}", "broker", 503);
        assert_eq!(err.to_string(), "endpoint broker returned 503");
    }
}
