//! In-memory collaborators for exercising the pipeline without ffmpeg.
//!
//! Each fake writes small placeholder files where the real tool would write
//! media, and can be told to fail or stall.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use rf_av::{
    MetadataExtractor, PreviewParams, ThumbnailGenerator, ThumbnailParams, TranscodeEngine,
    TranscodeOutput, TranscodeParams,
};
use rf_core::{Error, MediaMetadata, Quality, Result};

/// Tracks concurrent calls and the highest concurrency seen.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Gauge {
    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        self.calls.fetch_add(1, Ordering::AcqRel);
        GaugeGuard(Arc::clone(self))
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

struct GaugeGuard(Arc<Gauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// How a scripted call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Non-zero exit; retried.
    Transient,
    /// Missing binary; never retried.
    Fatal,
    /// The engine returns without producing output.
    Unsuccessful,
}

impl Failure {
    fn into_error(self, tool: &str) -> Error {
        match self {
            Failure::Transient => Error::tool(tool, "exited with status 1"),
            Failure::Fatal => Error::Config(format!("{tool} not found")),
            Failure::Unsuccessful => Error::tool(tool, "produced no output"),
        }
    }
}

#[derive(Default)]
pub struct FakeEngine {
    delay: Duration,
    /// Failures consumed one per call, before anything else.
    scripted: Mutex<VecDeque<Failure>>,
    /// Qualities that fail on every call.
    always: Mutex<HashMap<Quality, Failure>>,
    gauge: Arc<Gauge>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `n` calls with a transient tool error.
    pub fn failing_first(self, n: usize) -> Self {
        self.scripted.lock().extend(std::iter::repeat(Failure::Transient).take(n));
        self
    }

    pub fn failing_for(self, quality: Quality, failure: Failure) -> Self {
        self.always.lock().insert(quality, failure);
        self
    }

    pub fn gauge(&self) -> Arc<Gauge> {
        Arc::clone(&self.gauge)
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake-engine"
    }

    async fn transcode(&self, _input: &Path, params: &TranscodeParams) -> Result<TranscodeOutput> {
        let _guard = self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self
            .scripted
            .lock()
            .pop_front()
            .or_else(|| self.always.lock().get(&params.quality).copied());
        match failure {
            Some(Failure::Unsuccessful) => return Ok(TranscodeOutput::default()),
            Some(f) => return Err(f.into_error(self.name())),
            None => {}
        }

        let body = format!("{} {}", params.quality, params.format);
        tokio::fs::write(&params.output_path, body.as_bytes()).await?;
        Ok(TranscodeOutput {
            success: true,
            output_path: params.output_path.clone(),
            file_size: body.len() as u64,
            duration: 12.5,
            bitrate: u64::from(params.preset.video_bitrate_kbps) * 1000,
            width: params.preset.height * 16 / 9,
            height: params.preset.height,
            codec: "h264".into(),
        })
    }
}

pub struct FakeExtractor {
    fail: Option<Failure>,
    delay: Duration,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self {
            fail: None,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(failure: Failure) -> Self {
        Self {
            fail: Some(failure),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn sample_metadata() -> MediaMetadata {
        MediaMetadata {
            duration: 12.5,
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            codec: "h264".into(),
            bitrate: 4_000_000,
            format: "mov,mp4,m4a,3gp,3g2,mj2".into(),
            size: 1_000_000,
        }
    }
}

impl Default for FakeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataExtractor for FakeExtractor {
    async fn extract_metadata(&self, _path: &Path) -> Result<MediaMetadata> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.fail {
            Some(Failure::Transient) | Some(Failure::Unsuccessful) => {
                Err(Error::Probe("no video stream found".into()))
            }
            Some(Failure::Fatal) => Err(Failure::Fatal.into_error("ffprobe")),
            None => Ok(Self::sample_metadata()),
        }
    }
}

#[derive(Default)]
pub struct FakeThumbnails {
    fail: Option<Failure>,
    gauge: Arc<Gauge>,
}

impl FakeThumbnails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failure: Failure) -> Self {
        Self {
            fail: Some(failure),
            ..Self::default()
        }
    }

    pub fn gauge(&self) -> Arc<Gauge> {
        Arc::clone(&self.gauge)
    }
}

#[async_trait]
impl ThumbnailGenerator for FakeThumbnails {
    async fn generate_thumbnails(&self, _input: &Path, params: &ThumbnailParams) -> Result<Vec<PathBuf>> {
        let _guard = self.gauge.enter();
        if let Some(f) = self.fail {
            return Err(f.into_error("fake-thumbnails"));
        }
        let mut paths = Vec::new();
        for i in 0..params.count {
            let path = params.output_dir.join(format!("thumb_{i:02}.jpg"));
            tokio::fs::write(&path, b"jpeg").await?;
            paths.push(path);
        }
        Ok(paths)
    }

    async fn generate_preview(&self, _input: &Path, params: &PreviewParams) -> Result<PathBuf> {
        let _guard = self.gauge.enter();
        if let Some(f) = self.fail {
            return Err(f.into_error("fake-thumbnails"));
        }
        tokio::fs::write(&params.output_path, b"mp4").await?;
        Ok(params.output_path.clone())
    }
}
