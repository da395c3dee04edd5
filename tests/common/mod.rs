//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires a full [`Pipeline`] over an
//! in-memory (or file-backed) database, a temporary storage root and the
//! in-memory collaborators from `rf_pipeline::testing`.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rf_av::LocalStorage;
use rf_core::events::EventBus;
use rf_core::{JobStatus, OutputFormat, Quality, VideoId};
use rf_db::models::{Job, Video};
use rf_db::pool::{init_memory_pool, DbPool};
use rf_pipeline::testing::{FakeEngine, FakeExtractor, FakeThumbnails, Gauge};
use rf_pipeline::{Collaborators, Pipeline, PipelineSettings, ProcessOptions, ProcessResult, RetryPolicy};

/// Settings with millisecond timers so tests finish quickly.
pub fn fast_settings() -> PipelineSettings {
    let mut s = PipelineSettings::default();
    s.retry = RetryPolicy::new(Duration::ZERO, Duration::ZERO);
    s.poll_interval = Duration::from_millis(10);
    s.tick_interval = Duration::from_millis(20);
    s.monitor_interval = Duration::from_millis(50);
    s.job_timeout = Duration::from_secs(10);
    s.shutdown_grace = Duration::from_secs(5);
    s.processing.default_qualities = vec![Quality::Low, Quality::High];
    s.processing.default_formats = vec![OutputFormat::Mp4];
    s.processing.thumbnails_enabled = true;
    s.processing.preview_enabled = true;
    s
}

pub struct TestHarness {
    pub dir: TempDir,
    pub db: DbPool,
    pub events: Arc<EventBus>,
    pub pipeline: Pipeline,
    /// Concurrency of transcode calls.
    pub engine: Arc<Gauge>,
    /// Concurrency of thumbnail and preview calls.
    pub thumbnails: Arc<Gauge>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct HarnessBuilder {
    engine: FakeEngine,
    extractor: FakeExtractor,
    thumbnails: FakeThumbnails,
    settings: PipelineSettings,
    db: Option<DbPool>,
    dir: Option<TempDir>,
}

impl HarnessBuilder {
    pub fn engine(mut self, engine: FakeEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn extractor(mut self, extractor: FakeExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn thumbnails(mut self, thumbnails: FakeThumbnails) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    pub fn settings(mut self, configure: impl FnOnce(&mut PipelineSettings)) -> Self {
        configure(&mut self.settings);
        self
    }

    /// Reuse an existing database and storage directory.
    pub fn reopen(mut self, db: DbPool, dir: TempDir) -> Self {
        self.db = Some(db);
        self.dir = Some(dir);
        self
    }

    pub fn build(self) -> TestHarness {
        let dir = match self.dir {
            Some(dir) => dir,
            None => tempfile::tempdir().expect("failed to create temp dir"),
        };
        let db = match self.db {
            Some(db) => db,
            None => init_memory_pool().expect("failed to create in-memory pool"),
        };
        let storage = Arc::new(
            LocalStorage::open(dir.path().join("storage")).expect("failed to open storage"),
        );
        let engine = self.engine.gauge();
        let thumbnails = self.thumbnails.gauge();
        let events = Arc::new(EventBus::default());

        let collab = Collaborators {
            engine: Arc::new(self.engine),
            extractor: Arc::new(self.extractor),
            thumbnails: Arc::new(self.thumbnails),
            storage,
        };
        let pipeline = Pipeline::new(db.clone(), collab, Arc::clone(&events), &self.settings);

        TestHarness {
            dir,
            db,
            events,
            pipeline,
            engine,
            thumbnails,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }
}

impl TestHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            engine: FakeEngine::new(),
            extractor: FakeExtractor::new(),
            thumbnails: FakeThumbnails::new(),
            settings: fast_settings(),
            db: None,
            dir: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Write a small source file outside storage and ingest it.
    pub async fn upload(&self, name: &str) -> Video {
        let source: PathBuf = self.dir.path().join("incoming").join(name);
        tokio::fs::create_dir_all(source.parent().unwrap()).await.unwrap();
        tokio::fs::write(&source, b"not really a video").await.unwrap();
        self.pipeline
            .orchestrator()
            .ingest(&source, None)
            .await
            .expect("ingest failed")
    }

    /// Start workers, scheduler and monitor.
    pub fn start(&mut self) {
        self.handles = self.pipeline.spawn(&self.cancel);
    }

    /// Stop background tasks, letting in-flight jobs drain.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            handle.await.expect("pipeline task panicked");
        }
        self.cancel = CancellationToken::new();
    }

    pub async fn process(&self, video_id: VideoId, options: ProcessOptions) -> ProcessResult {
        self.pipeline
            .orchestrator()
            .process_video(video_id, options)
            .await
            .expect("process_video failed")
    }

    pub async fn wait(&self, video_id: VideoId) -> ProcessResult {
        self.pipeline
            .orchestrator()
            .wait_for_completion(video_id, Duration::from_secs(10))
            .await
            .expect("video did not finish")
    }

    pub fn video(&self, video_id: VideoId) -> Video {
        let conn = rf_db::pool::get_conn(&self.db).unwrap();
        rf_db::queries::videos::require_video(&conn, video_id).unwrap()
    }

    pub fn jobs(&self, video_id: VideoId) -> Vec<Job> {
        let conn = rf_db::pool::get_conn(&self.db).unwrap();
        rf_db::queries::jobs::list_for_video(&conn, video_id).unwrap()
    }

    /// Poll until every job of the video is terminal.
    pub async fn settle(&self, video_id: VideoId) -> Vec<Job> {
        for _ in 0..500 {
            let jobs = self.jobs(video_id);
            if jobs.iter().all(|j| j.status.is_terminal()) {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs did not settle: {:?}", self.jobs(video_id));
    }

    pub fn count(jobs: &[Job], status: JobStatus) -> usize {
        jobs.iter().filter(|j| j.status == status).count()
    }
}
