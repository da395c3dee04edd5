//! Public entry point: fan a video out into jobs and report on it.
//!
//! The orchestrator validates a request, moves the video to PROCESSING,
//! creates variant placeholders and enqueues one job per output. Workers and
//! the scheduler drive the jobs; [`crate::status`] folds their outcomes back
//! into the video.

use std::collections::HashSet;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use rf_core::config::{ProcessingConfig, StorageConfig};
use rf_core::events::{Event, EventPayload};
use rf_core::{
    Error, JobStatus, Lane, OutputFormat, Quality, Result, VideoId, VideoKind, VideoStatus,
};
use rf_db::models::{Job, JobPayload, JobResult, Variant, Video};
use rf_db::pool::DbPool;
use rf_db::queries::videos::NewVideo;

use crate::executor::{thumbnails_key, Collaborators};
use crate::queue::{JobSpec, QueueManager};
use crate::settings::PipelineSettings;

/// Dequeue rank of the thumbnail job within the thumbnail lane.
const THUMBNAIL_PRIORITY: i32 = 1;
/// Dequeue rank of a metadata refresh within the transcode lane.
const METADATA_PRIORITY: i32 = 1;

/// What to produce for a video. Unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    pub qualities: Option<Vec<Quality>>,
    pub formats: Option<Vec<OutputFormat>>,
    /// Lane for the transcode jobs: high, normal (default) or low.
    pub priority: Option<Lane>,
    pub generate_thumbnails: Option<bool>,
    pub generate_preview: Option<bool>,
    /// Re-read metadata for a source that already has it, as a queued job that
    /// runs ahead of the transcodes in their lane.
    pub refresh_metadata: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub video_id: VideoId,
    pub variants: Vec<Variant>,
    pub thumbnails: Vec<PathBuf>,
    pub preview: Option<PathBuf>,
    pub errors: Vec<String>,
}

/// Read-only snapshot of a video's processing.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingStatus {
    pub video_id: VideoId,
    pub status: VideoStatus,
    pub progress: f64,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub variants: Vec<Variant>,
    pub jobs: Vec<Job>,
    pub errors: Vec<String>,
    pub processing_error: Option<String>,
    /// Events this process has seen for the video, newest first.
    pub recent_events: Vec<Event>,
}

struct Plan {
    qualities: Vec<Quality>,
    formats: Vec<OutputFormat>,
    lane: Lane,
    thumbnails: bool,
    preview: bool,
    refresh_metadata: bool,
}

fn dedup<T: Copy + Eq + Hash>(items: &mut Vec<T>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(*item));
}

/// Human-readable error of a failed job, prefixed with what it was producing.
fn job_error(job: &Job) -> Option<String> {
    if job.status != JobStatus::Failed {
        return None;
    }
    let error = job.error.as_deref().unwrap_or("unknown error");
    Some(match (job.quality, job.format) {
        (Some(q), Some(f)) => format!("{} {q}/{f}: {error}", job.job_type),
        _ => format!("{}: {error}", job.job_type),
    })
}

pub struct Orchestrator {
    db: DbPool,
    queue: Arc<QueueManager>,
    collab: Collaborators,
    processing: ProcessingConfig,
    storage_limits: StorageConfig,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(queue: Arc<QueueManager>, collab: Collaborators, settings: &PipelineSettings) -> Self {
        Self {
            db: queue.db().clone(),
            queue,
            collab,
            processing: settings.processing.clone(),
            storage_limits: settings.storage.clone(),
            job_timeout: settings.job_timeout,
            poll_interval: settings.poll_interval,
        }
    }

    fn plan(&self, options: ProcessOptions) -> Result<Plan> {
        let mut qualities = options
            .qualities
            .unwrap_or_else(|| self.processing.default_qualities.clone());
        dedup(&mut qualities);
        if qualities.is_empty() {
            return Err(Error::Validation("at least one quality is required".into()));
        }

        let mut formats = options
            .formats
            .unwrap_or_else(|| self.processing.default_formats.clone());
        dedup(&mut formats);
        if formats.is_empty() {
            return Err(Error::Validation("at least one format is required".into()));
        }

        let lane = options.priority.unwrap_or(Lane::Normal);
        if !lane.is_priority_lane() {
            return Err(Error::Validation(format!(
                "priority must be high, normal or low, not {lane}"
            )));
        }

        Ok(Plan {
            qualities,
            formats,
            lane,
            thumbnails: options
                .generate_thumbnails
                .unwrap_or(self.processing.thumbnails_enabled),
            preview: options
                .generate_preview
                .unwrap_or(self.processing.preview_enabled),
            refresh_metadata: options.refresh_metadata.unwrap_or(false),
        })
    }

    /// Start processing a video. Returns once all jobs are queued.
    pub async fn process_video(&self, video_id: VideoId, options: ProcessOptions) -> Result<ProcessResult> {
        let mut plan = self.plan(options)?;

        let video = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            let video = rf_db::queries::videos::require_video(&conn, video_id)?;
            if video.status == VideoStatus::Processing {
                return Err(Error::Conflict(format!("video {video_id} is already processing")));
            }
            if rf_db::queries::jobs::has_active_jobs(&conn, video_id)? {
                return Err(Error::Conflict(format!(
                    "video {video_id} still has jobs running from a previous request"
                )));
            }
            let started = rf_db::queries::videos::transition_status(
                &conn,
                video_id,
                &[VideoStatus::Uploaded, VideoStatus::Completed, VideoStatus::Failed],
                VideoStatus::Processing,
            )?;
            if !started {
                return Err(Error::Conflict(format!("video {video_id} changed state concurrently")));
            }
            rf_db::queries::jobs::delete_terminal_for_video(&conn, video_id)?;
            video
        };

        if video.metadata.is_none() {
            if let Err(e) = self.extract_metadata(&video).await {
                self.fail_video(video_id, &format!("metadata extraction failed: {e}"))?;
                return Err(e);
            }
            // Just extracted; nothing to refresh.
            plan.refresh_metadata = false;
        }

        let (variants, jobs) = match self.enqueue(video_id, &plan) {
            Ok(Some(created)) => created,
            Ok(None) => {
                // Cancelled while metadata was extracted; settle the placeholders.
                self.fail_video(video_id, "processing cancelled")?;
                return Err(Error::Conflict(format!(
                    "video {video_id} was cancelled before its jobs were queued"
                )));
            }
            Err(e) => {
                self.fail_video(video_id, &format!("failed to queue jobs: {e}"))?;
                return Err(e);
            }
        };

        tracing::info!(
            video_id = %video_id,
            jobs = jobs.len(),
            variants = variants.len(),
            lane = %plan.lane,
            "Video processing started"
        );
        self.queue
            .events()
            .broadcast(EventPayload::VideoProcessingStarted {
                video_id,
                jobs: jobs.len(),
            });

        Ok(ProcessResult {
            success: true,
            video_id,
            variants,
            thumbnails: Vec::new(),
            preview: None,
            errors: Vec::new(),
        })
    }

    async fn extract_metadata(&self, video: &Video) -> Result<()> {
        let source = self.collab.storage.full_path(&video.original_path)?;
        let metadata = tokio::time::timeout(
            self.job_timeout,
            self.collab.extractor.extract_metadata(&source),
        )
        .await
        .map_err(|_| Error::timeout("metadata extraction", self.job_timeout))??;

        let conn = rf_db::pool::get_conn(&self.db)?;
        rf_db::queries::videos::set_metadata(&conn, video.id, &metadata)?;
        tracing::debug!(video_id = %video.id, duration = metadata.duration, width = metadata.width, height = metadata.height, "Metadata extracted");
        Ok(())
    }

    /// Create variant placeholders and queue every job of the plan.
    ///
    /// `None` when the video stopped processing before the jobs went in.
    fn enqueue(&self, video_id: VideoId, plan: &Plan) -> Result<Option<(Vec<Variant>, Vec<Job>)>> {
        let mut variants = Vec::new();
        let mut specs = Vec::new();
        {
            let conn = rf_db::pool::get_conn(&self.db)?;
            for quality in &plan.qualities {
                for format in &plan.formats {
                    let variant = rf_db::queries::variants::create_or_get_open(
                        &conn, video_id, *quality, *format,
                    )?;
                    specs.push(JobSpec::new(
                        video_id,
                        plan.lane,
                        JobPayload::Transcode {
                            variant_id: variant.id,
                            quality: *quality,
                            format: *format,
                        },
                    ));
                    variants.push(variant);
                }
            }
        }
        if plan.refresh_metadata {
            specs.push(
                JobSpec::new(video_id, plan.lane, JobPayload::Metadata)
                    .with_priority(METADATA_PRIORITY),
            );
        }
        // Thumbnails and previews share a lane; thumbnails are needed first.
        if plan.thumbnails {
            specs.push(
                JobSpec::new(
                    video_id,
                    Lane::Thumbnail,
                    JobPayload::Thumbnails {
                        count: self.processing.thumbnail_count,
                        width: self.processing.thumbnail_width,
                    },
                )
                .with_priority(THUMBNAIL_PRIORITY),
            );
        }
        if plan.preview {
            specs.push(JobSpec::new(
                video_id,
                Lane::Thumbnail,
                JobPayload::Preview {
                    duration_secs: self.processing.preview_duration_secs,
                },
            ));
        }

        Ok(self
            .queue
            .add_jobs_while_processing(video_id, &specs)?
            .map(|jobs| (variants, jobs)))
    }

    fn fail_video(&self, video_id: VideoId, error: &str) -> Result<()> {
        let conn = rf_db::pool::get_conn(&self.db)?;
        rf_db::queries::variants::fail_pending_for_video(&conn, video_id, error)?;
        if rf_db::queries::videos::mark_failed(&conn, video_id, error)? {
            tracing::warn!(video_id = %video_id, error, "Video processing failed");
            self.queue.events().broadcast(EventPayload::VideoFailed {
                video_id,
                error: error.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_processing_status(&self, video_id: VideoId) -> Result<ProcessingStatus> {
        let conn = rf_db::pool::get_conn(&self.db)?;
        let video = rf_db::queries::videos::require_video(&conn, video_id)?;
        let jobs = rf_db::queries::jobs::list_for_video(&conn, video_id)?;
        let variants = rf_db::queries::variants::list_for_video(&conn, video_id)?;

        Ok(ProcessingStatus {
            video_id,
            status: video.status,
            progress: video.processing_progress,
            total_jobs: jobs.len(),
            completed_jobs: jobs.iter().filter(|j| j.status == JobStatus::Completed).count(),
            failed_jobs: jobs.iter().filter(|j| j.status == JobStatus::Failed).count(),
            errors: jobs.iter().filter_map(job_error).collect(),
            variants,
            jobs,
            processing_error: video.processing_error,
            recent_events: self.queue.events().recent_for_video(video_id),
        })
    }

    /// Cancel a video's processing. Queued jobs are cancelled, running ones
    /// finish, and the video is marked FAILED. A no-op on finished videos.
    ///
    /// Returns the number of jobs cancelled.
    pub fn cancel_processing(&self, video_id: VideoId) -> Result<usize> {
        let status = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            rf_db::queries::videos::require_video(&conn, video_id)?.status
        };
        if status.is_terminal() {
            return Ok(0);
        }

        // Fail the video first: a request still extracting metadata then
        // refuses to queue, and anything it already queued is caught below.
        self.fail_video(video_id, "processing cancelled")?;
        let cancelled = self.queue.cancel_queued(video_id)?;
        tracing::info!(video_id = %video_id, cancelled = cancelled.len(), "Video processing cancelled");
        Ok(cancelled.len())
    }

    /// Wait until the video leaves PROCESSING and return the outcome of the run.
    pub async fn wait_for_completion(&self, video_id: VideoId, timeout: Duration) -> Result<ProcessResult> {
        let mut rx = self.queue.events().subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            let video = {
                let conn = rf_db::pool::get_conn(&self.db)?;
                rf_db::queries::videos::require_video(&conn, video_id)?
            };
            if video.status != VideoStatus::Processing {
                return self.result_for(video);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(format!("processing of video {video_id}"), timeout));
            }
            let wait = remaining.min(self.poll_interval);
            // Any event is a hint to re-check; the poll covers missed ones.
            if let Ok(Err(RecvError::Closed)) = tokio::time::timeout(wait, rx.recv()).await {
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Outcome of the latest run: the variants its jobs targeted, generated
    /// artifacts and job errors.
    fn result_for(&self, video: Video) -> Result<ProcessResult> {
        let conn = rf_db::pool::get_conn(&self.db)?;
        let jobs = rf_db::queries::jobs::list_for_video(&conn, video.id)?;
        let targeted: HashSet<_> = jobs
            .iter()
            .filter_map(|j| match j.payload {
                JobPayload::Transcode { variant_id, .. } => Some(variant_id),
                _ => None,
            })
            .collect();
        let variants: Vec<Variant> = rf_db::queries::variants::list_for_video(&conn, video.id)?
            .into_iter()
            .filter(|v| targeted.contains(&v.id))
            .collect();

        let mut thumbnails = Vec::new();
        let mut preview = None;
        for job in &jobs {
            match &job.result {
                Some(JobResult::Thumbnails { paths }) => thumbnails.extend(paths.iter().cloned()),
                Some(JobResult::Preview { path }) => preview = Some(path.clone()),
                _ => {}
            }
        }

        let mut errors: Vec<String> = jobs.iter().filter_map(job_error).collect();
        if errors.is_empty() {
            if let Some(e) = &video.processing_error {
                errors.push(e.clone());
            }
        }

        Ok(ProcessResult {
            success: video.status == VideoStatus::Completed,
            video_id: video.id,
            variants,
            thumbnails,
            preview,
            errors,
        })
    }

    /// Remove a video, its jobs, variants and stored files.
    pub async fn delete_video(&self, video_id: VideoId) -> Result<()> {
        let video = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            let video = rf_db::queries::videos::require_video(&conn, video_id)?;
            if video.status == VideoStatus::Processing
                || rf_db::queries::jobs::has_active_jobs(&conn, video_id)?
            {
                return Err(Error::Conflict(format!(
                    "video {video_id} is processing; cancel it first"
                )));
            }
            video
        };

        let storage = &self.collab.storage;
        for key in [
            format!("variants/{video_id}"),
            thumbnails_key(video_id),
            format!("previews/{video_id}"),
            video.original_path.clone(),
        ] {
            if storage.delete_file(&key).await? {
                tracing::debug!(video_id = %video_id, key = %key, "Deleted stored file");
            }
        }

        let conn = rf_db::pool::get_conn(&self.db)?;
        rf_db::queries::videos::delete_video(&conn, video_id)?;
        tracing::info!(video_id = %video_id, "Video deleted");
        Ok(())
    }

    /// Register a file on disk as a new UPLOADED video, copying it into storage.
    pub async fn ingest(&self, source: &Path, mime_type: Option<&str>) -> Result<Video> {
        let meta = match tokio::fs::metadata(source).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("Source file", source.display()));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(Error::Validation(format!("{} is not a file", source.display())));
        }
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation(format!("{} has no usable file name", source.display())))?;
        let mime = mime_type.map(str::to_string).unwrap_or_else(|| {
            mime_guess::from_path(source)
                .first_or_octet_stream()
                .to_string()
        });
        self.storage_limits.validate_upload(&mime, meta.len())?;

        let key = format!("sources/{}/{name}", uuid::Uuid::new_v4());
        let size = self.collab.storage.import_file(source, &key).await?;

        let conn = rf_db::pool::get_conn(&self.db)?;
        let video = rf_db::queries::videos::create_video(
            &conn,
            &NewVideo {
                kind: VideoKind::Import,
                original_path: key,
                original_name: name.to_string(),
                original_size: size,
                mime_type: mime,
            },
        )?;
        tracing::info!(video_id = %video.id, name, size, "Video ingested");
        Ok(video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Failure, FakeEngine, FakeExtractor, FakeThumbnails};
    use assert_matches::assert_matches;
    use rf_av::{LocalStorage, Storage};
    use rf_core::events::EventBus;
    use rf_core::VariantStatus;

    struct Fixture {
        dir: tempfile::TempDir,
        orch: Orchestrator,
        video_id: VideoId,
    }

    async fn fixture(extractor: FakeExtractor) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::open(dir.path().join("store")).unwrap());
        storage.save_file("sources/a/clip.mp4", b"source").await.unwrap();

        let settings = PipelineSettings::default();
        let db = rf_db::pool::init_memory_pool().unwrap();
        let queue = Arc::new(QueueManager::new(db, Arc::new(EventBus::default()), &settings));
        let video_id = crate::queue::tests::sample_video(queue.db()).id;
        let collab = Collaborators {
            engine: Arc::new(FakeEngine::new()),
            extractor: Arc::new(extractor),
            thumbnails: Arc::new(FakeThumbnails::new()),
            storage,
        };
        Fixture {
            dir,
            orch: Orchestrator::new(queue, collab, &settings),
            video_id,
        }
    }

    fn high_mp4() -> ProcessOptions {
        ProcessOptions {
            qualities: Some(vec![Quality::High]),
            formats: Some(vec![OutputFormat::Mp4]),
            generate_thumbnails: Some(true),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unknown_video_is_not_found() {
        let f = fixture(FakeExtractor::new()).await;
        let err = f
            .orch
            .process_video(VideoId::new(), ProcessOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });
    }

    #[tokio::test]
    async fn fans_out_one_job_per_output() {
        let f = fixture(FakeExtractor::new()).await;
        let result = f.orch.process_video(f.video_id, high_mp4()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.variants.len(), 1);
        assert_eq!(result.variants[0].status, VariantStatus::Pending);
        assert!(result.errors.is_empty());

        let status = f.orch.get_processing_status(f.video_id).unwrap();
        assert_eq!(status.status, VideoStatus::Processing);
        assert_eq!(status.total_jobs, 2);
        let types: Vec<_> = status.jobs.iter().map(|j| (j.job_type, j.lane)).collect();
        assert!(types.contains(&(rf_core::JobType::Transcode, Lane::Normal)));
        assert!(types.contains(&(rf_core::JobType::ThumbnailGeneration, Lane::Thumbnail)));
        assert!(status.jobs.iter().all(|j| j.status == JobStatus::Queued));
    }

    #[tokio::test]
    async fn thumbnails_outrank_preview_and_status_carries_events() {
        let f = fixture(FakeExtractor::new()).await;
        let options = ProcessOptions {
            generate_preview: Some(true),
            ..high_mp4()
        };
        f.orch.process_video(f.video_id, options).await.unwrap();

        let status = f.orch.get_processing_status(f.video_id).unwrap();
        let priority = |t: rf_core::JobType| {
            status.jobs.iter().find(|j| j.job_type == t).unwrap().priority
        };
        assert!(
            priority(rf_core::JobType::ThumbnailGeneration)
                > priority(rf_core::JobType::PreviewGeneration)
        );
        assert_matches!(
            status.recent_events[0].payload,
            EventPayload::VideoProcessingStarted { jobs: 3, .. }
        );
        assert_eq!(
            status
                .recent_events
                .iter()
                .filter(|e| matches!(e.payload, EventPayload::JobQueued { .. }))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn refresh_queues_metadata_job_only_when_metadata_exists() {
        let f = fixture(FakeExtractor::new()).await;
        let refresh = ProcessOptions {
            refresh_metadata: Some(true),
            generate_thumbnails: Some(false),
            ..high_mp4()
        };
        // First run extracts inline, so there is nothing left to refresh.
        f.orch.process_video(f.video_id, refresh.clone()).await.unwrap();
        let status = f.orch.get_processing_status(f.video_id).unwrap();
        assert_eq!(status.total_jobs, 1);
        f.orch.cancel_processing(f.video_id).unwrap();

        f.orch.process_video(f.video_id, refresh).await.unwrap();
        let jobs = f.orch.get_processing_status(f.video_id).unwrap().jobs;
        let metadata = jobs
            .iter()
            .find(|j| j.job_type == rf_core::JobType::MetadataExtraction)
            .unwrap();
        let transcode = jobs
            .iter()
            .find(|j| j.job_type == rf_core::JobType::Transcode)
            .unwrap();
        assert_eq!(metadata.lane, transcode.lane);
        assert!(metadata.priority > transcode.priority);
    }

    #[tokio::test]
    async fn already_processing_conflicts_without_side_effects() {
        let f = fixture(FakeExtractor::new()).await;
        f.orch.process_video(f.video_id, high_mp4()).await.unwrap();

        let again = ProcessOptions {
            qualities: Some(vec![Quality::Low, Quality::Ultra]),
            ..high_mp4()
        };
        let err = f.orch.process_video(f.video_id, again).await.unwrap_err();
        assert_matches!(err, Error::Conflict(_));

        let status = f.orch.get_processing_status(f.video_id).unwrap();
        assert_eq!(status.total_jobs, 2);
        assert_eq!(status.variants.len(), 1);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let f = fixture(FakeExtractor::new()).await;
        let thumbnail_lane = ProcessOptions {
            priority: Some(Lane::Thumbnail),
            ..Default::default()
        };
        assert_matches!(
            f.orch.process_video(f.video_id, thumbnail_lane).await,
            Err(Error::Validation(_))
        );
        let no_formats = ProcessOptions {
            formats: Some(vec![]),
            ..Default::default()
        };
        assert_matches!(
            f.orch.process_video(f.video_id, no_formats).await,
            Err(Error::Validation(_))
        );
        let status = f.orch.get_processing_status(f.video_id).unwrap();
        assert_eq!(status.status, VideoStatus::Uploaded);
    }

    #[tokio::test]
    async fn duplicate_requests_are_collapsed() {
        let f = fixture(FakeExtractor::new()).await;
        let options = ProcessOptions {
            qualities: Some(vec![Quality::Low, Quality::Low]),
            formats: Some(vec![OutputFormat::Webm, OutputFormat::Webm]),
            generate_thumbnails: Some(false),
            ..Default::default()
        };
        let result = f.orch.process_video(f.video_id, options).await.unwrap();
        assert_eq!(result.variants.len(), 1);
    }

    #[tokio::test]
    async fn metadata_failure_fails_the_video() {
        let f = fixture(FakeExtractor::failing(Failure::Transient)).await;
        let err = f.orch.process_video(f.video_id, high_mp4()).await.unwrap_err();
        assert_matches!(err, Error::Probe(_));

        let status = f.orch.get_processing_status(f.video_id).unwrap();
        assert_eq!(status.status, VideoStatus::Failed);
        assert_eq!(status.total_jobs, 0);
        let error = status.processing_error.unwrap();
        assert!(error.starts_with("metadata extraction failed"), "{error}");
    }

    #[tokio::test]
    async fn cancel_marks_failed_and_is_idempotent() {
        let f = fixture(FakeExtractor::new()).await;
        f.orch.process_video(f.video_id, high_mp4()).await.unwrap();

        assert_eq!(f.orch.cancel_processing(f.video_id).unwrap(), 2);
        let status = f.orch.get_processing_status(f.video_id).unwrap();
        assert_eq!(status.status, VideoStatus::Failed);
        assert!(status.jobs.iter().all(|j| j.status == JobStatus::Cancelled));
        assert_eq!(status.variants[0].status, VariantStatus::Failed);

        assert_eq!(f.orch.cancel_processing(f.video_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_during_metadata_extraction_queues_nothing() {
        let f = fixture(FakeExtractor::new().with_delay(Duration::from_millis(200))).await;
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.orch.cancel_processing(f.video_id)
        };
        let (processed, cancelled) = tokio::join!(f.orch.process_video(f.video_id, high_mp4()), cancel);

        assert_matches!(processed, Err(Error::Conflict(_)));
        assert_eq!(cancelled.unwrap(), 0);
        let status = f.orch.get_processing_status(f.video_id).unwrap();
        assert_eq!(status.status, VideoStatus::Failed);
        assert_eq!(status.processing_error.as_deref(), Some("processing cancelled"));
        assert_eq!(status.total_jobs, 0);
        assert!(status.variants.iter().all(|v| v.status == VariantStatus::Failed));

        // Nothing is left running, so the video can be processed again.
        let again = f.orch.process_video(f.video_id, high_mp4()).await.unwrap();
        assert!(again.success);
    }

    #[tokio::test]
    async fn delete_requires_idle_video() {
        let f = fixture(FakeExtractor::new()).await;
        f.orch.process_video(f.video_id, high_mp4()).await.unwrap();
        assert_matches!(f.orch.delete_video(f.video_id).await, Err(Error::Conflict(_)));

        f.orch.cancel_processing(f.video_id).unwrap();
        f.orch.delete_video(f.video_id).await.unwrap();
        assert_matches!(
            f.orch.get_processing_status(f.video_id),
            Err(Error::NotFound { .. })
        );
        assert!(!f.dir.path().join("store/sources/a/clip.mp4").exists());
    }

    #[tokio::test]
    async fn ingest_copies_and_registers() {
        let f = fixture(FakeExtractor::new()).await;
        let source = f.dir.path().join("holiday.mkv");
        std::fs::write(&source, vec![0u8; 2048]).unwrap();

        let video = f.orch.ingest(&source, None).await.unwrap();
        assert_eq!(video.kind, VideoKind::Import);
        assert_eq!(video.status, VideoStatus::Uploaded);
        assert_eq!(video.mime_type, "video/x-matroska");
        assert_eq!(video.original_size, 2048);
        assert!(video.original_path.ends_with("/holiday.mkv"));
    }

    #[tokio::test]
    async fn ingest_rejects_disallowed_types() {
        let f = fixture(FakeExtractor::new()).await;
        let source = f.dir.path().join("notes.txt");
        std::fs::write(&source, b"hello").unwrap();
        assert_matches!(f.orch.ingest(&source, None).await, Err(Error::Validation(_)));
        assert_matches!(
            f.orch.ingest(&f.dir.path().join("missing.mp4"), None).await,
            Err(Error::NotFound { .. })
        );
    }
}
