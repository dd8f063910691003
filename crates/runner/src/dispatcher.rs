//! Decodes job frames and queues them for the worker pool.

use std::sync::Arc;

use dci_core::{Job, MeasurementId};
use tokio::sync::mpsc;

use crate::pool::RunnerStats;

/// What happened to one incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// The job was handed to the worker pool.
    Queued(MeasurementId),
    /// The frame was discarded. Nothing is redelivered.
    Dropped,
}

/// Front end of the worker pool, owned by the connection supervisor.
pub struct JobDispatcher {
    queue: mpsc::Sender<Job>,
    stats: Arc<RunnerStats>,
}

impl JobDispatcher {
    pub(crate) fn new(queue: mpsc::Sender<Job>, stats: Arc<RunnerStats>) -> Self {
        Self { queue, stats }
    }

    /// Decode one frame payload and queue the job.
    ///
    /// Returns as soon as the job is queued. Waits only while the queue
    /// is full, which holds back the receive loop until a worker frees
    /// up.
    pub async fn on_message(&self, raw: &[u8]) -> DispatchResult {
        let job = match Job::decode(raw) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, "Couldn't decode message");
                self.stats.record_dropped();
                return DispatchResult::Dropped;
            }
        };

        let measurement_id = job.measurement_id;
        let project = job.project_name.clone();

        if self.queue.capacity() == 0 {
            tracing::warn!(measurement_id, "Job queue full, holding job until a worker frees up");
        }

        match self.queue.send(job).await {
            Ok(()) => {
                tracing::info!(measurement_id, project = %project, "Starting job");
                self.stats.record_dispatched();
                DispatchResult::Queued(measurement_id)
            }
            Err(_) => {
                tracing::error!(measurement_id, "Worker pool stopped, dropping job");
                self.stats.record_dropped();
                DispatchResult::Dropped
            }
        }
    }

    pub fn stats(&self) -> Arc<RunnerStats> {
        Arc::clone(&self.stats)
    }
}
