//! Lane-aware queue manager.
//!
//! Durable state (job rows) lives in the database; the in-memory
//! [`LaneState`]s only account for slots currently executing. A job is
//! claimed by first reserving a lane slot and then dequeuing a row, so the
//! slot count can never exceed the lane's configured capacity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rf_core::events::{EventBus, EventPayload};
use rf_core::{Error, JobId, JobStatus, Lane, Result, VideoId};
use rf_db::models::{Job, JobCounts, JobPayload, JobResult};
use rf_db::pool::DbPool;
use rf_db::queries::jobs::NewJob;

use crate::lanes::{LanePermit, LaneState};
use crate::retry::RetryPolicy;
use crate::settings::PipelineSettings;

/// A job to enqueue.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub video_id: VideoId,
    pub lane: Lane,
    pub priority: i32,
    pub payload: JobPayload,
}

impl JobSpec {
    pub fn new(video_id: VideoId, lane: Lane, payload: JobPayload) -> Self {
        Self {
            video_id,
            lane,
            priority: 0,
            payload,
        }
    }

    /// Rank within the lane; higher is dequeued first.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A dequeued job together with the lane slot it occupies.
///
/// The slot is released when this value is dropped, which
/// [`QueueManager::report_outcome`] always does.
#[derive(Debug)]
pub struct ClaimedJob {
    pub job: Job,
    permit: LanePermit,
}

impl ClaimedJob {
    pub fn lane(&self) -> Lane {
        self.permit.lane()
    }
}

/// How an attempt ended.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(JobResult),
    Failed(Error),
}

/// What the queue did with a reported outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeReport {
    Completed,
    RetryScheduled { at: DateTime<Utc> },
    Failed { error: String },
    /// The attempt was no longer current (reaped or cancelled); nothing changed.
    Stale,
}

/// Counts and live capacity of one lane.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue_name: String,
    pub total_jobs: u64,
    pub queued_jobs: u64,
    pub retrying_jobs: u64,
    pub processing_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub current_active_jobs: usize,
    pub max_concurrent_jobs: usize,
    pub paused: bool,
}

impl QueueStats {
    fn new(lane: &LaneState, counts: JobCounts) -> Self {
        Self {
            queue_name: lane.lane().to_string(),
            total_jobs: counts.total(),
            queued_jobs: counts.queued,
            retrying_jobs: counts.retrying,
            processing_jobs: counts.processing,
            completed_jobs: counts.completed,
            failed_jobs: counts.failed,
            cancelled_jobs: counts.cancelled,
            current_active_jobs: lane.active(),
            max_concurrent_jobs: lane.capacity(),
            paused: lane.is_paused(),
        }
    }

    /// Jobs waiting for a slot, including ones backing off.
    pub fn backlog(&self) -> u64 {
        self.queued_jobs + self.retrying_jobs
    }
}

/// Jobs recovered by [`QueueManager::reap_stuck`].
#[derive(Debug, Default)]
pub struct ReapReport {
    pub requeued: Vec<Job>,
    pub failed: Vec<Job>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }

    /// Videos whose progress may have changed.
    pub fn affected_videos(&self) -> Vec<VideoId> {
        let mut ids: Vec<VideoId> = self
            .requeued
            .iter()
            .chain(&self.failed)
            .map(|j| j.video_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// The instant `age` ago, saturating at the earliest representable time.
fn cutoff(age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|d| Utc::now().checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub struct QueueManager {
    db: DbPool,
    lanes: HashMap<Lane, Arc<LaneState>>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
    max_attempts: u32,
    worker_id: String,
}

impl QueueManager {
    pub fn new(db: DbPool, events: Arc<EventBus>, settings: &PipelineSettings) -> Self {
        let lanes = Lane::ALL
            .iter()
            .map(|lane| (*lane, LaneState::new(*lane, settings.capacity(*lane))))
            .collect();
        Self {
            db,
            lanes,
            events,
            retry: settings.retry,
            max_attempts: settings.max_attempts,
            worker_id: format!("reelforge-{}", std::process::id()),
        }
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn lane(&self, lane: Lane) -> &Arc<LaneState> {
        // Every lane is inserted by `new`.
        &self.lanes[&lane]
    }

    fn new_job(&self, spec: &JobSpec) -> NewJob {
        NewJob {
            video_id: spec.video_id,
            lane: spec.lane,
            priority: spec.priority,
            max_attempts: self.max_attempts,
            payload: spec.payload.clone(),
        }
    }

    fn announce(&self, job: &Job) {
        tracing::debug!(job_id = %job.id, video_id = %job.video_id, lane = %job.lane, job_type = %job.job_type, "Job queued");
        self.events.broadcast(EventPayload::JobQueued {
            job_id: job.id,
            video_id: job.video_id,
            job_type: job.job_type,
            lane: job.lane,
        });
        self.lane(job.lane).wake();
    }

    /// Enqueue one job for an existing video.
    pub fn add_job(&self, spec: JobSpec) -> Result<Job> {
        let job = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            rf_db::queries::videos::require_video(&conn, spec.video_id)?;
            rf_db::queries::jobs::create_job(&conn, &self.new_job(&spec))?
        };
        self.announce(&job);
        Ok(job)
    }

    /// Enqueue a batch atomically. On error nothing is queued.
    pub fn add_jobs(&self, specs: &[JobSpec]) -> Result<Vec<Job>> {
        let batch: Vec<NewJob> = specs.iter().map(|s| self.new_job(s)).collect();
        let jobs = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            for spec in specs {
                rf_db::queries::videos::require_video(&conn, spec.video_id)?;
            }
            rf_db::queries::jobs::create_jobs(&conn, &batch)?
        };
        for job in &jobs {
            self.announce(job);
        }
        Ok(jobs)
    }

    /// Enqueue a video's batch only while the video is still processing.
    ///
    /// `None` means the video left PROCESSING (it was cancelled) and nothing
    /// was queued.
    pub fn add_jobs_while_processing(
        &self,
        video_id: VideoId,
        specs: &[JobSpec],
    ) -> Result<Option<Vec<Job>>> {
        let batch: Vec<NewJob> = specs.iter().map(|s| self.new_job(s)).collect();
        let jobs = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            rf_db::queries::jobs::create_jobs_while_processing(&conn, video_id, &batch)?
        };
        if let Some(jobs) = &jobs {
            for job in jobs {
                self.announce(job);
            }
        }
        Ok(jobs)
    }

    /// Claim the next job of `lane` if a slot is free and work is eligible.
    pub fn dequeue_next(&self, lane: Lane) -> Result<Option<ClaimedJob>> {
        let Some(permit) = self.lane(lane).try_acquire() else {
            return Ok(None);
        };
        let job = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            rf_db::queries::jobs::dequeue_next(&conn, lane, &self.worker_id)?
        };
        // Dropping the permit on `None` frees the slot again.
        Ok(job.map(|job| {
            self.events.broadcast(EventPayload::JobStarted {
                job_id: job.id,
                attempt: job.attempt_count,
            });
            ClaimedJob { job, permit }
        }))
    }

    /// Record the end of an attempt and release its lane slot.
    ///
    /// Retryable errors with attempts left go back to the queue behind a
    /// backoff; anything else is terminal.
    pub fn report_outcome(&self, claimed: ClaimedJob, outcome: JobOutcome) -> Result<OutcomeReport> {
        let ClaimedJob { job, permit } = claimed;
        let conn = rf_db::pool::get_conn(&self.db)?;

        let report = match outcome {
            JobOutcome::Completed(result) => {
                if rf_db::queries::jobs::complete_job(&conn, job.id, job.attempt_count, &result)? {
                    tracing::info!(job_id = %job.id, video_id = %job.video_id, attempt = job.attempt_count, "Job completed");
                    self.events
                        .broadcast(EventPayload::JobCompleted { job_id: job.id });
                    OutcomeReport::Completed
                } else {
                    OutcomeReport::Stale
                }
            }
            JobOutcome::Failed(err) => {
                let error = err.to_string();
                if err.is_retryable() && job.has_attempts_left() {
                    let delay = self.retry.delay_for(job.attempt_count);
                    let at = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|d| Utc::now().checked_add_signed(d))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    if rf_db::queries::jobs::schedule_retry(&conn, job.id, job.attempt_count, &error, at)? {
                        tracing::warn!(
                            job_id = %job.id,
                            attempt = job.attempt_count,
                            max_attempts = job.max_attempts,
                            backoff_ms = delay.as_millis() as u64,
                            error = %error,
                            "Job attempt failed; retry scheduled"
                        );
                        self.events.broadcast(EventPayload::JobRetryScheduled {
                            job_id: job.id,
                            attempt: job.attempt_count,
                            retry_at: at,
                            error,
                        });
                        OutcomeReport::RetryScheduled { at }
                    } else {
                        OutcomeReport::Stale
                    }
                } else if rf_db::queries::jobs::fail_job(&conn, job.id, job.attempt_count, &error)? {
                    tracing::error!(
                        job_id = %job.id,
                        video_id = %job.video_id,
                        attempt = job.attempt_count,
                        retryable = err.is_retryable(),
                        error = %error,
                        "Job failed"
                    );
                    self.events.broadcast(EventPayload::JobFailed {
                        job_id: job.id,
                        error: error.clone(),
                    });
                    OutcomeReport::Failed { error }
                } else {
                    OutcomeReport::Stale
                }
            }
        };

        if report == OutcomeReport::Stale {
            tracing::warn!(job_id = %job.id, attempt = job.attempt_count, "Outcome for a superseded attempt ignored");
        }
        drop(conn);
        drop(permit);
        Ok(report)
    }

    /// Per-lane counts, in lane order.
    pub fn get_queue_stats(&self) -> Result<Vec<QueueStats>> {
        let counts = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            rf_db::queries::jobs::lane_counts(&conn)?
        };
        Ok(Lane::ALL
            .iter()
            .map(|lane| {
                QueueStats::new(self.lane(*lane), counts.get(lane).copied().unwrap_or_default())
            })
            .collect())
    }

    /// Stop handing out new jobs from `lane`. In-flight jobs keep running.
    pub fn pause(&self, lane: Lane) {
        let state = self.lane(lane);
        if !state.is_paused() {
            state.set_paused(true);
            tracing::info!(lane = %lane, "Lane paused");
            self.events.broadcast(EventPayload::LanePaused { lane });
        }
    }

    pub fn resume(&self, lane: Lane) {
        let state = self.lane(lane);
        if state.is_paused() {
            state.set_paused(false);
            tracing::info!(lane = %lane, "Lane resumed");
            self.events.broadcast(EventPayload::LaneResumed { lane });
        }
    }

    /// Cancel every queued job of a video. Processing jobs are left to finish.
    pub fn cancel_queued(&self, video_id: VideoId) -> Result<Vec<Job>> {
        let cancelled = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            rf_db::queries::jobs::cancel_queued_for_video(&conn, video_id)?
        };
        for job in &cancelled {
            self.events
                .broadcast(EventPayload::JobCancelled { job_id: job.id });
        }
        if !cancelled.is_empty() {
            tracing::info!(video_id = %video_id, count = cancelled.len(), "Queued jobs cancelled");
        }
        Ok(cancelled)
    }

    /// Make jobs whose backoff has elapsed eligible and wake their lanes.
    pub fn release_due_retries(&self) -> Result<Vec<JobId>> {
        let released = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            rf_db::queries::jobs::release_due_retries(&conn, Utc::now())?
        };
        for (job_id, lane) in &released {
            tracing::debug!(job_id = %job_id, lane = %lane, "Retry released");
            self.lane(*lane).wake();
        }
        Ok(released.into_iter().map(|(id, _)| id).collect())
    }

    /// Recover PROCESSING jobs that started more than `older_than` ago.
    pub fn reap_stuck(&self, older_than: Duration) -> Result<ReapReport> {
        let cutoff = cutoff(older_than);
        let conn = rf_db::pool::get_conn(&self.db)?;
        let stuck = rf_db::queries::jobs::list_stuck(&conn, cutoff)?;

        let mut report = ReapReport::default();
        for mut job in stuck {
            let error = format!("attempt {} exceeded {:?} without reporting", job.attempt_count, older_than);
            let next = rf_db::queries::jobs::reap_job(&conn, &job, &error)?;
            if let Some(status) = next {
                job.status = status;
                job.error = Some(error.clone());
            }
            match next {
                Some(JobStatus::Queued) => {
                    tracing::warn!(job_id = %job.id, attempt = job.attempt_count, "Stuck job requeued");
                    self.lane(job.lane).wake();
                    report.requeued.push(job);
                }
                Some(_) => {
                    tracing::error!(job_id = %job.id, attempt = job.attempt_count, "Stuck job failed");
                    self.events.broadcast(EventPayload::JobFailed {
                        job_id: job.id,
                        error,
                    });
                    report.failed.push(job);
                }
                None => {}
            }
        }
        Ok(report)
    }

    /// Requeue (or fail) jobs a previous process left in PROCESSING.
    /// Returns the requeued count and the jobs that were failed.
    ///
    /// Call once at startup, before workers run.
    pub fn recover_orphaned(&self) -> Result<(usize, Vec<Job>)> {
        let conn = rf_db::pool::get_conn(&self.db)?;
        let (requeued, failed) = rf_db::queries::jobs::recover_orphaned(&conn)?;
        if requeued > 0 || !failed.is_empty() {
            tracing::warn!(requeued, failed = failed.len(), "Recovered jobs interrupted by restart");
        }
        for job in &failed {
            self.events.broadcast(EventPayload::JobFailed {
                job_id: job.id,
                error: job.error.clone().unwrap_or_default(),
            });
        }
        Ok((requeued, failed))
    }

    /// Delete terminal jobs older than `retention`.
    pub fn prune_terminal(&self, retention: Duration) -> Result<usize> {
        let cutoff = cutoff(retention);
        let conn = rf_db::pool::get_conn(&self.db)?;
        let n = rf_db::queries::jobs::prune_terminal(&conn, cutoff)?;
        if n > 0 {
            tracing::info!(pruned = n, "Old jobs pruned");
        }
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rf_core::{OutputFormat, Quality, VariantId};
    use rf_db::models::Video;
    use rf_db::queries::videos::{self, NewVideo};

    pub(crate) fn sample_video(db: &DbPool) -> Video {
        let conn = rf_db::pool::get_conn(db).unwrap();
        videos::create_video(
            &conn,
            &NewVideo {
                kind: rf_core::VideoKind::Upload,
                original_path: "sources/a/clip.mp4".into(),
                original_name: "clip.mp4".into(),
                original_size: 1024,
                mime_type: "video/mp4".into(),
            },
        )
        .unwrap()
    }

    pub(crate) fn transcode(video_id: VideoId, lane: Lane, quality: Quality) -> JobSpec {
        JobSpec::new(
            video_id,
            lane,
            JobPayload::Transcode {
                variant_id: VariantId::new(),
                quality,
                format: OutputFormat::Mp4,
            },
        )
    }

    fn manager(settings: PipelineSettings) -> QueueManager {
        let db = rf_db::pool::init_memory_pool().unwrap();
        QueueManager::new(db, Arc::new(EventBus::default()), &settings)
    }

    fn settings_with(capacity: usize, attempts: u32) -> PipelineSettings {
        let mut s = PipelineSettings::default();
        for lane in Lane::ALL {
            s.lane_capacity.insert(*lane, capacity);
        }
        s.max_attempts = attempts;
        s.retry = RetryPolicy::new(Duration::ZERO, Duration::ZERO);
        s
    }

    #[test]
    fn add_job_requires_video() {
        let q = manager(settings_with(1, 3));
        let err = q
            .add_job(transcode(VideoId::new(), Lane::Normal, Quality::High))
            .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });
    }

    #[test]
    fn add_job_emits_queued_event() {
        let q = manager(settings_with(1, 3));
        let mut rx = q.events().subscribe();
        let video = sample_video(q.db());
        let job = q.add_job(transcode(video.id, Lane::High, Quality::High)).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_matches!(rx.try_recv().unwrap().payload, EventPayload::JobQueued { lane: Lane::High, .. });
    }

    #[test]
    fn batch_add_is_atomic_and_guarded_add_needs_processing() {
        let q = manager(settings_with(1, 3));
        let video = sample_video(q.db());
        let dup = [
            transcode(video.id, Lane::Normal, Quality::Low),
            transcode(video.id, Lane::Normal, Quality::Low),
        ];
        assert_matches!(q.add_jobs(&dup), Err(Error::Conflict(_)));
        assert_eq!(q.add_jobs(&dup[..1]).unwrap().len(), 1);

        let more = [transcode(video.id, Lane::Normal, Quality::High)];
        assert!(q.add_jobs_while_processing(video.id, &more).unwrap().is_none());
        let conn = rf_db::pool::get_conn(q.db()).unwrap();
        rf_db::queries::videos::transition_status(
            &conn,
            video.id,
            &[rf_core::VideoStatus::Uploaded],
            rf_core::VideoStatus::Processing,
        )
        .unwrap();
        let queued = q.add_jobs_while_processing(video.id, &more).unwrap().unwrap();
        assert_eq!(queued[0].quality, Some(Quality::High));
    }

    #[test]
    fn dequeue_respects_capacity() {
        let q = manager(settings_with(2, 3));
        let video = sample_video(q.db());
        for quality in Quality::ALL {
            q.add_job(transcode(video.id, Lane::Normal, *quality)).unwrap();
        }

        let a = q.dequeue_next(Lane::Normal).unwrap().unwrap();
        let _b = q.dequeue_next(Lane::Normal).unwrap().unwrap();
        assert!(q.dequeue_next(Lane::Normal).unwrap().is_none());
        assert_eq!(q.lane(Lane::Normal).active(), 2);

        q.report_outcome(a, JobOutcome::Failed(Error::Validation("bad".into())))
            .unwrap();
        assert_eq!(q.lane(Lane::Normal).active(), 1);
        assert!(q.dequeue_next(Lane::Normal).unwrap().is_some());
    }

    #[test]
    fn empty_lane_releases_slot() {
        let q = manager(settings_with(1, 3));
        assert!(q.dequeue_next(Lane::Low).unwrap().is_none());
        assert_eq!(q.lane(Lane::Low).active(), 0);
    }

    #[test]
    fn retryable_failure_schedules_retry_until_exhausted() {
        let q = manager(settings_with(1, 2));
        let video = sample_video(q.db());
        let job = q.add_job(transcode(video.id, Lane::Normal, Quality::High)).unwrap();

        let claimed = q.dequeue_next(Lane::Normal).unwrap().unwrap();
        assert_eq!(claimed.job.attempt_count, 1);
        let report = q
            .report_outcome(claimed, JobOutcome::Failed(Error::tool("ffmpeg", "crashed")))
            .unwrap();
        assert_matches!(report, OutcomeReport::RetryScheduled { .. });

        // Waiting on backoff: invisible until released.
        assert!(q.dequeue_next(Lane::Normal).unwrap().is_none());
        assert_eq!(q.release_due_retries().unwrap(), vec![job.id]);

        let claimed = q.dequeue_next(Lane::Normal).unwrap().unwrap();
        assert_eq!(claimed.job.attempt_count, 2);
        let report = q
            .report_outcome(claimed, JobOutcome::Failed(Error::tool("ffmpeg", "crashed")))
            .unwrap();
        assert_matches!(report, OutcomeReport::Failed { .. });

        let conn = rf_db::pool::get_conn(q.db()).unwrap();
        let stored = rf_db::queries::jobs::get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempt_count, 2);
    }

    #[test]
    fn fatal_failure_is_not_retried() {
        let q = manager(settings_with(1, 5));
        let video = sample_video(q.db());
        q.add_job(transcode(video.id, Lane::Normal, Quality::High)).unwrap();

        let claimed = q.dequeue_next(Lane::Normal).unwrap().unwrap();
        let report = q
            .report_outcome(claimed, JobOutcome::Failed(Error::Probe("not a video".into())))
            .unwrap();
        assert_matches!(report, OutcomeReport::Failed { .. });
    }

    #[test]
    fn stats_reflect_lanes() {
        let q = manager(settings_with(3, 3));
        let video = sample_video(q.db());
        q.add_job(transcode(video.id, Lane::High, Quality::High)).unwrap();
        q.add_job(transcode(video.id, Lane::High, Quality::Low)).unwrap();
        let _claimed = q.dequeue_next(Lane::High).unwrap().unwrap();
        q.pause(Lane::Low);

        let stats = q.get_queue_stats().unwrap();
        assert_eq!(stats.len(), Lane::ALL.len());
        let high = stats.iter().find(|s| s.queue_name == "high").unwrap();
        assert_eq!(high.total_jobs, 2);
        assert_eq!(high.queued_jobs, 1);
        assert_eq!(high.processing_jobs, 1);
        assert_eq!(high.current_active_jobs, 1);
        assert_eq!(high.max_concurrent_jobs, 3);
        let low = stats.iter().find(|s| s.queue_name == "low").unwrap();
        assert!(low.paused);
        assert_eq!(low.total_jobs, 0);
    }

    #[test]
    fn paused_lane_hands_out_nothing() {
        let q = manager(settings_with(2, 3));
        let video = sample_video(q.db());
        q.add_job(transcode(video.id, Lane::Normal, Quality::High)).unwrap();

        q.pause(Lane::Normal);
        assert!(q.dequeue_next(Lane::Normal).unwrap().is_none());
        q.resume(Lane::Normal);
        assert!(q.dequeue_next(Lane::Normal).unwrap().is_some());
    }

    #[test]
    fn reaped_attempt_reports_stale() {
        let q = manager(settings_with(1, 3));
        let video = sample_video(q.db());
        q.add_job(transcode(video.id, Lane::Normal, Quality::High)).unwrap();
        let claimed = q.dequeue_next(Lane::Normal).unwrap().unwrap();

        let reaped = q.reap_stuck(Duration::ZERO).unwrap();
        assert_eq!(reaped.requeued.len(), 1);
        assert_eq!(reaped.affected_videos(), vec![video.id]);

        let report = q
            .report_outcome(
                claimed,
                JobOutcome::Completed(JobResult::Thumbnails { paths: vec![] }),
            )
            .unwrap();
        assert_eq!(report, OutcomeReport::Stale);
        assert_eq!(q.lane(Lane::Normal).active(), 0);
    }

    #[test]
    fn cancel_queued_emits_events() {
        let q = manager(settings_with(1, 3));
        let video = sample_video(q.db());
        q.add_job(transcode(video.id, Lane::Normal, Quality::High)).unwrap();
        q.add_job(transcode(video.id, Lane::Normal, Quality::Low)).unwrap();
        let _running = q.dequeue_next(Lane::Normal).unwrap().unwrap();

        let mut rx = q.events().subscribe();
        let cancelled = q.cancel_queued(video.id).unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_matches!(rx.try_recv().unwrap().payload, EventPayload::JobCancelled { .. });
    }
}
