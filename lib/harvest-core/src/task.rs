//! Helpers for working with asynchronous tasks.

use std::future::Future;

use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::Instrument as _;

/// Spawns a new asynchronous task, returning a [`JoinHandle`] for it.
///
/// This is a thin wrapper over [`tokio::spawn`] that attaches the spawned future to the current `tracing` span, so
/// that anything the task logs carries the fields of the span it was spawned from.
pub fn spawn_traced<F, T>(f: F) -> JoinHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(f.in_current_span())
}

/// Helper trait for providing traced spawning when using `JoinSet<T>`.
pub trait JoinSetExt<T> {
    /// Spawns a new asynchronous task, returning an [`AbortHandle`] for it.
    ///
    /// The spawned future is attached to the current `tracing` span.
    fn spawn_traced<F>(&mut self, f: F) -> AbortHandle
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static;
}

impl<T> JoinSetExt<T> for JoinSet<T> {
    fn spawn_traced<F>(&mut self, f: F) -> AbortHandle
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(f.in_current_span())
    }
}
