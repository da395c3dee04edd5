//! Wiring for a running pipeline.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rf_core::events::EventBus;
use rf_core::Result;
use rf_db::pool::DbPool;

use crate::executor::{Collaborators, JobExecutor};
use crate::monitor::Monitor;
use crate::orchestrator::Orchestrator;
use crate::queue::QueueManager;
use crate::scheduler::Scheduler;
use crate::settings::PipelineSettings;
use crate::status;
use crate::worker::WorkerPool;

/// All long-lived pipeline components sharing one queue.
pub struct Pipeline {
    queue: Arc<QueueManager>,
    workers: Arc<WorkerPool>,
    scheduler: Arc<Scheduler>,
    orchestrator: Arc<Orchestrator>,
    monitor: Arc<Monitor>,
}

impl Pipeline {
    pub fn new(
        db: DbPool,
        collab: Collaborators,
        events: Arc<EventBus>,
        settings: &PipelineSettings,
    ) -> Self {
        let queue = Arc::new(QueueManager::new(db.clone(), events, settings));
        let executor = Arc::new(JobExecutor::new(db, collab.clone()));
        Self {
            workers: Arc::new(WorkerPool::new(Arc::clone(&queue), executor, settings)),
            scheduler: Arc::new(Scheduler::new(Arc::clone(&queue), settings)),
            orchestrator: Arc::new(Orchestrator::new(Arc::clone(&queue), collab, settings)),
            monitor: Arc::new(Monitor::new(Arc::clone(&queue), settings)),
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Requeue jobs a previous process left running and settle the videos
    /// of jobs that had no attempts left. Returns `(requeued, failed)`.
    pub fn recover(&self) -> Result<(usize, usize)> {
        let (requeued, failed) = self.queue.recover_orphaned()?;
        let db = self.queue.db();
        let mut videos = Vec::new();
        for job in &failed {
            let error = job.error.as_deref().unwrap_or("interrupted by restart");
            status::finalize_failed_job(db, job, error)?;
            videos.push(job.video_id);
        }
        videos.sort();
        videos.dedup();
        for video_id in videos {
            status::recompute_video(db, self.queue.events(), video_id)?;
        }
        Ok((requeued, failed.len()))
    }

    /// Start workers, scheduler and monitor. All tasks finish once `cancel`
    /// fires; workers first drain in-flight jobs.
    pub fn spawn(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = self.workers.spawn(cancel);
        handles.push(tokio::spawn(Arc::clone(&self.scheduler).run(cancel.clone())));
        handles.push(tokio::spawn(Arc::clone(&self.monitor).run(cancel.clone())));
        handles
    }
}
