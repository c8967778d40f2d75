use std::{sync::Arc, time::Duration};

use harvest_core::{
    collector::{CollectionLease, Collector, CycleContext},
    state::NodeConditionCache,
    stats::{SharedStats, SubmissionStats},
    task::JoinSetExt as _,
};
use tokio::{
    select,
    task::JoinSet,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of a collection cycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct CycleReport {
    /// Number of collectors that completed successfully.
    pub succeeded: usize,

    /// Number of collectors that failed.
    pub failed: usize,

    /// Submission stats accumulated over the cycle.
    pub stats: SubmissionStats,
}

/// Drives every collector once per collection interval.
///
/// Cycles never overlap: a tick that fires while the previous cycle is still running is skipped, so the submission
/// stats reported for a cycle cover exactly that cycle.
#[derive(Clone)]
pub struct Orchestrator {
    collectors: Arc<[Arc<dyn Collector>]>,
    stats: SharedStats,
    node_conditions: NodeConditionCache,
    cycle_lease: CollectionLease,
    interval: Duration,
}

impl Orchestrator {
    /// Creates a new `Orchestrator`.
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        stats: SharedStats,
        node_conditions: NodeConditionCache,
        interval: Duration,
    ) -> Self {
        Self {
            collectors: collectors.into(),
            stats,
            node_conditions,
            cycle_lease: CollectionLease::new(),
            interval,
        }
    }

    /// Runs collection cycles until cancelled, then waits for any cycle still in flight.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            collectors = self.collectors.len(),
            interval = ?self.interval,
            "Starting collection cycles."
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cycles = JoinSet::new();
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let orchestrator = self.clone();
                    let cancel = cancel.clone();
                    cycles.spawn_traced(async move {
                        orchestrator.run_cycle(&cancel).await;
                    });
                },
                Some(result) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "Collection cycle task failed.");
                    }
                },
            }
        }

        debug!(in_flight = cycles.len(), "Waiting for in-flight collection cycles.");
        while let Some(result) = cycles.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Collection cycle task failed.");
            }
        }
    }

    /// Runs a single collection cycle, driving every collector in parallel.
    ///
    /// Returns `None` without collecting anything if the previous cycle is still running. Otherwise, the submission
    /// stats are reset once every collector is done.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Option<CycleReport> {
        let Some(_cycle) = self.cycle_lease.try_acquire() else {
            warn!("Previous collection cycle still running. Skipping.");
            return None;
        };

        let context = CycleContext::new(cancel.child_token()).with_node_conditions(self.node_conditions.clone());

        let mut tasks = JoinSet::new();
        for collector in self.collectors.iter() {
            let collector = Arc::clone(collector);
            let context = context.clone();
            tasks.spawn_traced(async move {
                let result = collector.collect(context).await;
                (collector, result)
            });
        }

        let mut report = CycleReport::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((_, Ok(()))) => report.succeeded += 1,
                Ok((collector, Err(e))) => {
                    report.failed += 1;
                    error!(source = collector.id(), error = ?e, "Collection failed.");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "Collection task failed.");
                }
            }
        }

        report.stats = self.stats.reset();

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            sent = report.stats.sent,
            received = report.stats.received,
            filtered = report.stats.filtered,
            broker_filtered = report.stats.broker_filtered,
            sent_bytes = report.stats.sent_bytes,
            sent_bytes_wire = report.stats.sent_bytes_wire,
            tracked_node_conditions = self.node_conditions.len(),
            "Collection cycle complete."
        );

        Some(report)
    }
}
