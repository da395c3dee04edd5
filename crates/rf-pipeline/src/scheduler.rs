//! Periodic maintenance: retry release, stuck-job reaping, pruning.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use rf_core::Result;

use crate::queue::QueueManager;
use crate::settings::PipelineSettings;
use crate::status;

/// What one maintenance tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub released: usize,
    pub requeued: usize,
    pub failed: usize,
}

pub struct Scheduler {
    queue: Arc<QueueManager>,
    tick_interval: Duration,
    cleanup_interval: Duration,
    reap_after: Duration,
    retention: Duration,
}

impl Scheduler {
    pub fn new(queue: Arc<QueueManager>, settings: &PipelineSettings) -> Self {
        Self {
            queue,
            tick_interval: settings.tick_interval,
            cleanup_interval: settings.cleanup_interval,
            reap_after: settings.reap_after,
            retention: settings.retention,
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cleanup = tokio::time::interval(self.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            tick_secs = self.tick_interval.as_secs(),
            reap_after_secs = self.reap_after.as_secs(),
            "Scheduler started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.tick() {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup() {
                        tracing::error!(error = %e, "Scheduler cleanup failed");
                    }
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }

    /// Release due retries, then reap abandoned attempts.
    pub fn tick(&self) -> Result<TickReport> {
        let released = self.queue.release_due_retries()?;
        let reaped = self.queue.reap_stuck(self.reap_after)?;

        let db = self.queue.db();
        for job in &reaped.failed {
            let error = job.error.as_deref().unwrap_or("abandoned attempt");
            status::finalize_failed_job(db, job, error)?;
        }
        for video_id in reaped.affected_videos() {
            status::recompute_video(db, self.queue.events(), video_id)?;
        }

        let report = TickReport {
            released: released.len(),
            requeued: reaped.requeued.len(),
            failed: reaped.failed.len(),
        };
        if report != TickReport::default() {
            tracing::debug!(?report, "Scheduler tick");
        }
        Ok(report)
    }

    pub fn cleanup(&self) -> Result<usize> {
        self.queue.prune_terminal(self.retention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::{sample_video, transcode};
    use crate::queue::{JobOutcome, OutcomeReport};
    use crate::retry::RetryPolicy;
    use rf_core::events::EventBus;
    use rf_core::{Error, JobStatus, Lane, Quality, VideoStatus};

    fn scheduler(attempts: u32) -> (Arc<QueueManager>, Scheduler) {
        let mut settings = PipelineSettings::default();
        settings.max_attempts = attempts;
        settings.retry = RetryPolicy::new(Duration::ZERO, Duration::ZERO);
        settings.reap_after = Duration::ZERO;
        settings.retention = Duration::ZERO;
        let db = rf_db::pool::init_memory_pool().unwrap();
        let queue = Arc::new(QueueManager::new(db, Arc::new(EventBus::default()), &settings));
        let scheduler = Scheduler::new(Arc::clone(&queue), &settings);
        (queue, scheduler)
    }

    fn start_processing(queue: &QueueManager) -> rf_core::VideoId {
        let video = sample_video(queue.db());
        let conn = rf_db::pool::get_conn(queue.db()).unwrap();
        rf_db::queries::videos::transition_status(
            &conn,
            video.id,
            &[VideoStatus::Uploaded],
            VideoStatus::Processing,
        )
        .unwrap();
        video.id
    }

    #[test]
    fn tick_releases_due_retries() {
        let (queue, scheduler) = scheduler(3);
        let video = sample_video(queue.db());
        queue.add_job(transcode(video.id, Lane::Normal, Quality::High)).unwrap();
        let claimed = queue.dequeue_next(Lane::Normal).unwrap().unwrap();
        let report = queue
            .report_outcome(claimed, JobOutcome::Failed(Error::tool("ffmpeg", "crash")))
            .unwrap();
        assert!(matches!(report, OutcomeReport::RetryScheduled { .. }));

        let report = scheduler.tick().unwrap();
        assert_eq!(report.released, 1);
        assert!(queue.dequeue_next(Lane::Normal).unwrap().is_some());
    }

    #[test]
    fn reaping_exhausted_job_fails_the_video() {
        let (queue, scheduler) = scheduler(1);
        let video_id = start_processing(&queue);
        queue.add_job(transcode(video_id, Lane::Normal, Quality::High)).unwrap();
        let claimed = queue.dequeue_next(Lane::Normal).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(2));

        let report = scheduler.tick().unwrap();
        assert_eq!(report.failed, 1);

        let conn = rf_db::pool::get_conn(queue.db()).unwrap();
        let job = rf_db::queries::jobs::get_job(&conn, claimed.job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let video = rf_db::queries::videos::require_video(&conn, video_id).unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
        drop(conn);

        // The original worker reporting late changes nothing.
        let late = queue
            .report_outcome(
                claimed,
                JobOutcome::Completed(rf_db::models::JobResult::Thumbnails { paths: vec![] }),
            )
            .unwrap();
        assert_eq!(late, OutcomeReport::Stale);
    }

    #[test]
    fn reaping_with_attempts_left_requeues() {
        let (queue, scheduler) = scheduler(3);
        let video_id = start_processing(&queue);
        queue.add_job(transcode(video_id, Lane::Normal, Quality::High)).unwrap();
        let _claimed = queue.dequeue_next(Lane::Normal).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(2));

        let report = scheduler.tick().unwrap();
        assert_eq!(report.requeued, 1);
        let again = queue.dequeue_next(Lane::Normal);
        // Capacity 2 on the normal lane by default: the stale claim still holds one slot.
        assert_eq!(again.unwrap().unwrap().job.attempt_count, 2);
    }

    #[test]
    fn cleanup_prunes_finished_jobs() {
        let (queue, scheduler) = scheduler(1);
        let video = sample_video(queue.db());
        queue.add_job(transcode(video.id, Lane::Normal, Quality::High)).unwrap();
        let claimed = queue.dequeue_next(Lane::Normal).unwrap().unwrap();
        queue
            .report_outcome(claimed, JobOutcome::Failed(Error::Validation("bad".into())))
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(scheduler.cleanup().unwrap(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (_queue, scheduler) = scheduler(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::new(scheduler).run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
