//! Per-lane worker pool.
//!
//! Each lane gets one dispatcher task. The dispatcher claims jobs while the
//! lane has free slots, runs each one as its own task in a [`JoinSet`], and
//! sleeps until it is woken (new work, a freed slot, resume), the poll
//! interval elapses, or a job finishes. Lanes never share capacity.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use rf_core::{Error, Lane};

use crate::executor::JobExecutor;
use crate::queue::{ClaimedJob, JobOutcome, OutcomeReport, QueueManager};
use crate::settings::PipelineSettings;
use crate::status;

pub struct WorkerPool {
    queue: Arc<QueueManager>,
    executor: Arc<JobExecutor>,
    job_timeout: Duration,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<QueueManager>, executor: Arc<JobExecutor>, settings: &PipelineSettings) -> Self {
        Self {
            queue,
            executor,
            job_timeout: settings.job_timeout,
            poll_interval: settings.poll_interval,
            shutdown_grace: settings.shutdown_grace,
        }
    }

    /// Start one dispatcher per lane. They stop once `cancel` fires and
    /// in-flight jobs have drained.
    pub fn spawn(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        Lane::ALL
            .iter()
            .map(|lane| tokio::spawn(Arc::clone(self).run_lane(*lane, cancel.clone())))
            .collect()
    }

    /// Dispatch loop for a single lane.
    pub async fn run_lane(self: Arc<Self>, lane: Lane, cancel: CancellationToken) {
        let state = Arc::clone(self.queue.lane(lane));
        let mut running: JoinSet<()> = JoinSet::new();
        tracing::info!(lane = %lane, capacity = state.capacity(), "Lane worker started");

        loop {
            while !cancel.is_cancelled() {
                match self.queue.dequeue_next(lane) {
                    Ok(Some(claimed)) => {
                        let this = Arc::clone(&self);
                        running.spawn(async move { this.run_job(claimed).await });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(lane = %lane, error = %e, "Dequeue failed");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = state.woken() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(lane = %lane, error = %e, "Job task panicked");
                    }
                }
            }
        }

        if !running.is_empty() {
            tracing::info!(lane = %lane, in_flight = running.len(), "Waiting for in-flight jobs");
            let drained = tokio::time::timeout(self.shutdown_grace, async {
                while running.join_next().await.is_some() {}
            })
            .await
            .is_ok();
            if !drained {
                // Aborted rows stay PROCESSING and are recovered at next start.
                tracing::warn!(lane = %lane, in_flight = running.len(), "Shutdown grace elapsed; aborting jobs");
                running.shutdown().await;
            }
        }
        tracing::info!(lane = %lane, "Lane worker stopped");
    }

    async fn run_job(&self, claimed: ClaimedJob) {
        let job = claimed.job.clone();
        tracing::info!(job_id = %job.id, video_id = %job.video_id, job_type = %job.job_type, lane = %job.lane, attempt = job.attempt_count, "Job started");

        let outcome = match tokio::time::timeout(self.job_timeout, self.executor.execute(&job)).await {
            Ok(Ok(result)) => JobOutcome::Completed(result),
            Ok(Err(e)) => JobOutcome::Failed(e),
            Err(_) => JobOutcome::Failed(Error::timeout(
                format!("{} job {}", job.job_type, job.id),
                self.job_timeout,
            )),
        };

        let db = self.queue.db();
        match self.queue.report_outcome(claimed, outcome) {
            Ok(OutcomeReport::Failed { error }) => {
                if let Err(e) = status::finalize_failed_job(db, &job, &error) {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to finalize failed job");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
            }
        }

        if let Err(e) = status::recompute_video(db, self.queue.events(), job.video_id) {
            tracing::error!(video_id = %job.video_id, error = %e, "Failed to recompute video status");
        }
    }
}
