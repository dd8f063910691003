//! Bounded worker pool for execution units.
//!
//! Jobs arrive through a fixed-capacity queue and are started only
//! while fewer than `max_concurrent_jobs` units are running. A single
//! supervising task owns the [`JoinSet`] of units and records every
//! [`UnitOutcome`] in [`RunnerStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dci_core::Job;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::dispatcher::JobDispatcher;
use crate::executor::ContainerRuntime;
use crate::unit::{run_unit, UnitOutcome};

/// Counters describing what happened to received jobs.
#[derive(Debug, Default)]
pub struct RunnerStats {
    dispatched: AtomicU64,
    dropped: AtomicU64,
    reported: AtomicU64,
    degraded: AtomicU64,
    upload_failed: AtomicU64,
    aborted: AtomicU64,
}

/// Point-in-time copy of [`RunnerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Jobs decoded and handed to the pool.
    pub dispatched: u64,
    /// Messages that never became a job.
    pub dropped: u64,
    /// Uploads accepted by the coordinator.
    pub reported: u64,
    /// Uploads (accepted or not) that carried the sentinel.
    pub degraded: u64,
    /// Measurements the coordinator did not accept.
    pub upload_failed: u64,
    /// Units that ended without producing a measurement.
    pub aborted: u64,
}

impl RunnerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reported: self.reported.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            upload_failed: self.upload_failed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outcome(&self, outcome: &UnitOutcome) {
        match outcome {
            UnitOutcome::Reported { degraded, .. } => {
                self.reported.fetch_add(1, Ordering::Relaxed);
                if *degraded {
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                }
            }
            UnitOutcome::UploadFailed { degraded, .. } => {
                self.upload_failed.fetch_add(1, Ordering::Relaxed);
                if *degraded {
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                }
            }
            UnitOutcome::Aborted { .. } => {
                self.aborted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Handle to a running pool.
pub struct PoolHandle {
    stats: Arc<RunnerStats>,
    task: tokio::task::JoinHandle<()>,
}

impl PoolHandle {
    pub fn stats(&self) -> Arc<RunnerStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the pool to finish. It finishes once every
    /// [`JobDispatcher`] has been dropped and all queued and running
    /// units are done.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Worker pool task failed");
        }
    }
}

pub struct WorkerPool;

impl WorkerPool {
    /// Spawn the pool's supervising task.
    ///
    /// Returns the dispatcher that feeds it and a handle for stats.
    pub fn start(config: Arc<Config>, runtime: Arc<dyn ContainerRuntime>) -> (JobDispatcher, PoolHandle) {
        let (tx, rx) = mpsc::channel(config.job_queue_capacity);
        let stats = Arc::new(RunnerStats::default());

        tracing::info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            queue_capacity = config.job_queue_capacity,
            "Worker pool started",
        );

        let task = tokio::spawn(run_pool(rx, config, runtime, Arc::clone(&stats)));
        let dispatcher = JobDispatcher::new(tx, Arc::clone(&stats));

        (dispatcher, PoolHandle { stats, task })
    }
}

async fn run_pool(
    mut queue: mpsc::Receiver<Job>,
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    stats: Arc<RunnerStats>,
) {
    let max = config.max_concurrent_jobs;
    let mut units: JoinSet<UnitOutcome> = JoinSet::new();
    let mut queue_open = true;

    loop {
        tokio::select! {
            Some(result) = units.join_next(), if !units.is_empty() => {
                record(&stats, result);
            }
            job = queue.recv(), if queue_open && units.len() < max => {
                match job {
                    Some(job) => {
                        // Units run concurrently; the span keeps their log lines apart.
                        let span = tracing::info_span!(
                            "unit",
                            run_id = %Uuid::new_v4(),
                            measurement_id = job.measurement_id,
                        );
                        tracing::debug!(measurement_id = job.measurement_id, running = units.len() + 1, "Starting execution unit");
                        units.spawn(run_unit(Arc::clone(&config), Arc::clone(&runtime), job).instrument(span));
                    }
                    None => queue_open = false,
                }
            }
            else => break,
        }
    }

    tracing::info!("Worker pool drained");
}

fn record(stats: &RunnerStats, result: Result<UnitOutcome, JoinError>) {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Execution unit panicked");
            stats.aborted.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match &outcome {
        UnitOutcome::Reported {
            measurement_id,
            degraded,
        } => {
            tracing::info!(measurement_id, degraded, "Measurement reported");
        }
        UnitOutcome::UploadFailed {
            measurement_id,
            degraded,
            reason,
        } => {
            tracing::warn!(measurement_id, degraded, reason = %reason, "Measurement upload failed");
        }
        UnitOutcome::Aborted {
            measurement_id,
            reason,
        } => {
            tracing::error!(
                measurement_id,
                reason = %reason,
                "Execution unit aborted, measurement will not be completed",
            );
        }
    }

    stats.record_outcome(&outcome);
}
