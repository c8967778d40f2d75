//! Collector abstraction.
//!
//! A collector gathers metrics from one source (a kubelet, an annotated endpoint, the API server, and so on), builds a
//! batch, and submits it. The orchestrator drives every configured collector once per cycle, in parallel.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use harvest_error::GenericError;
use tokio_util::sync::CancellationToken;

use crate::state::NodeConditionCache;

/// Per-cycle context handed to each collector.
#[derive(Clone, Debug)]
pub struct CycleContext {
    cancel: CancellationToken,
    timestamp_ms: u64,
    node_conditions: NodeConditionCache,
}

impl CycleContext {
    /// Creates a new `CycleContext` for a cycle starting now.
    pub fn new(cancel: CancellationToken) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            cancel,
            timestamp_ms,
            node_conditions: NodeConditionCache::new(),
        }
    }

    /// Sets the node-condition cache shared with the other collectors.
    pub fn with_node_conditions(mut self, node_conditions: NodeConditionCache) -> Self {
        self.node_conditions = node_conditions;
        self
    }

    /// Overrides the cycle timestamp.
    pub fn with_timestamp_ms(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Returns the cancellation token for the cycle.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` if the cycle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the timestamp at which the cycle started, in milliseconds since the Unix epoch.
    ///
    /// Samples without their own timestamp are stamped with this value.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Returns the node-condition cache.
    ///
    /// The cache outlives the cycle: collectors compare the conditions they observe against what was recorded by
    /// earlier cycles.
    pub fn node_conditions(&self) -> &NodeConditionCache {
        &self.node_conditions
    }
}

/// A metric collector.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Returns the identifier of this collector, used in logs.
    fn id(&self) -> &str;

    /// Runs a single collection.
    ///
    /// Collectors are expected to return early, without error, when the cycle is cancelled.
    ///
    /// # Errors
    ///
    /// If the source could not be collected, an error is returned. A failing collector contributes no metrics for the
    /// cycle, and is tried again on the next one.
    async fn collect(&self, context: CycleContext) -> Result<(), GenericError>;
}

/// A single-slot lease guaranteeing that at most one collection runs per source at any time.
///
/// Cloning a lease yields a handle to the same slot.
#[derive(Clone, Debug, Default)]
pub struct CollectionLease {
    held: Arc<AtomicBool>,
}

impl CollectionLease {
    /// Creates a new, unheld lease.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lease.
    ///
    /// Returns `None` if the lease is already held. The lease is released when the returned guard is dropped.
    pub fn try_acquire(&self) -> Option<LeaseGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LeaseGuard {
                held: Arc::clone(&self.held),
            })
    }

    /// Returns `true` if the lease is currently held.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Guard for an acquired [`CollectionLease`].
#[derive(Debug)]
pub struct LeaseGuard {
    held: Arc<AtomicBool>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive() {
        let lease = CollectionLease::new();
        let other = lease.clone();

        let guard = lease.try_acquire().expect("fresh lease should be acquirable");
        assert!(other.is_held());
        assert!(other.try_acquire().is_none());

        drop(guard);
        assert!(!lease.is_held());
        assert!(other.try_acquire().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lease_contention() {
        let lease = CollectionLease::new();
        let start = Arc::new(tokio::sync::Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lease = lease.clone();
            let start = Arc::clone(&start);
            handles.push(tokio::spawn(async move {
                start.wait().await;
                lease.try_acquire().map(|guard| {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    drop(guard);
                })
            }));
        }

        let mut acquired = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                acquired += 1;
            }
        }

        assert!(acquired >= 1);
        assert!(!lease.is_held());
    }

    #[test]
    fn cycle_context_cancellation() {
        let token = CancellationToken::new();
        let context = CycleContext::new(token.clone()).with_timestamp_ms(42);

        assert_eq!(context.timestamp_ms(), 42);
        assert!(!context.is_cancelled());
        token.cancel();
        assert!(context.is_cancelled());
    }

    #[test]
    fn cycle_context_shares_node_conditions() {
        let cache = NodeConditionCache::new();
        let context = CycleContext::new(CancellationToken::new()).with_node_conditions(cache.clone());

        context.node_conditions().update("node-a", "Ready", "True");
        assert_eq!(cache.get("node-a", "Ready").as_deref(), Some("True"));

        let standalone = CycleContext::new(CancellationToken::new());
        assert!(standalone.node_conditions().is_empty());
    }
}
