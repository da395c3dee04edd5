//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for storage, the encoding engine, processing defaults, lanes,
//! the scheduler and monitoring. Every section defaults sensibly so a
//! completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::{Lane, OutputFormat, Quality};
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub processing: ProcessingConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub monitoring: MonitoringConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for lane in Lane::ALL {
            if self.queue.lane(*lane).max_concurrent_jobs == 0 {
                warnings.push(format!(
                    "queue.{lane}.max_concurrent_jobs is 0; jobs in this lane will never run"
                ));
            }
        }

        if self.queue.max_attempts == 0 {
            warnings.push("queue.max_attempts is 0; treated as 1".into());
        }

        if self.queue.max_retry_delay_ms < self.queue.retry_delay_ms {
            warnings.push(
                "queue.max_retry_delay_ms is below retry_delay_ms; backoff will be flat".into(),
            );
        }

        if self.processing.default_qualities.is_empty() {
            warnings.push("processing.default_qualities is empty".into());
        }
        if self.processing.default_formats.is_empty() {
            warnings.push("processing.default_formats is empty".into());
        }
        if self.processing.thumbnails_enabled && self.processing.thumbnail_count == 0 {
            warnings.push("thumbnails are enabled but processing.thumbnail_count is 0".into());
        }

        if self.queue.job_timeout_secs == 0 {
            warnings.push("queue.job_timeout_secs is 0; every job will time out".into());
        }

        if self.scheduler.tick_interval_secs == 0 {
            warnings.push("scheduler.tick_interval_secs is 0; using 1 second".into());
        }

        if self.monitoring.metric_retention_secs < self.monitoring.interval_secs {
            warnings.push(
                "monitoring.metric_retention_secs is shorter than one sampling interval".into(),
            );
        }

        if self.storage.allowed_mime_types.is_empty() {
            warnings.push("storage.allowed_mime_types is empty; every upload is rejected".into());
        }

        if self.auth.enabled && self.auth.api_key.is_none() {
            warnings.push("auth is enabled but no api_key is set".into());
        }

        if self.rate_limit.max_requests == 0 {
            warnings.push("rate_limit.max_requests is 0; every request is rejected".into());
        }

        warnings
    }

    /// Check an incoming source file against the upload limits.
    pub fn validate_upload(&self, mime_type: &str, size: u64) -> Result<()> {
        self.storage.validate_upload(mime_type, size)
    }
}

// ---------------------------------------------------------------------------
// DatabaseConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/reelforge.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for sources and produced renditions.
    pub root: PathBuf,
    /// Largest accepted source file, in bytes.
    pub max_upload_size: u64,
    pub allowed_mime_types: Vec<String>,
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "video/mp4",
        "video/quicktime",
        "video/x-matroska",
        "video/webm",
        "video/x-msvideo",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/storage"),
            max_upload_size: 5 * 1024 * 1024 * 1024,
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

impl StorageConfig {
    /// Check an incoming source file against the upload limits.
    pub fn validate_upload(&self, mime_type: &str, size: u64) -> Result<()> {
        if size == 0 {
            return Err(Error::Validation("source file is empty".into()));
        }
        if size > self.max_upload_size {
            return Err(Error::Validation(format!(
                "source file is {size} bytes; limit is {}",
                self.max_upload_size
            )));
        }
        if !self
            .allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime_type))
        {
            return Err(Error::Validation(format!(
                "mime type '{mime_type}' is not allowed"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// External encoding engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Override for the ffmpeg binary; searched on `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,
    /// Override for the ffprobe binary; searched on `PATH` when unset.
    pub ffprobe_path: Option<PathBuf>,
    /// Hard limit for any single engine invocation.
    pub job_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            job_timeout_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessingConfig
// ---------------------------------------------------------------------------

/// Defaults applied when a process request omits its options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub default_qualities: Vec<Quality>,
    pub default_formats: Vec<OutputFormat>,
    pub thumbnails_enabled: bool,
    pub thumbnail_count: u32,
    pub thumbnail_width: u32,
    pub preview_enabled: bool,
    pub preview_duration_secs: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            default_qualities: vec![Quality::Medium, Quality::High],
            default_formats: vec![OutputFormat::Mp4],
            thumbnails_enabled: true,
            thumbnail_count: 2,
            thumbnail_width: 320,
            preview_enabled: false,
            preview_duration_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Capacity of a single lane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub max_concurrent_jobs: usize,
}

impl LaneConfig {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self { max_concurrent_jobs }
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub high: LaneConfig,
    pub normal: LaneConfig,
    pub low: LaneConfig,
    pub thumbnail: LaneConfig,
    /// Execution attempts per job, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Wall-clock deadline for one job execution.
    pub job_timeout_secs: u64,
    /// How often an idle lane re-checks the queue.
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    pub fn lane(&self, lane: Lane) -> LaneConfig {
        match lane {
            Lane::High => self.high,
            Lane::Normal => self.normal,
            Lane::Low => self.low,
            Lane::Thumbnail => self.thumbnail,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high: LaneConfig::new(4),
            normal: LaneConfig::new(2),
            low: LaneConfig::new(1),
            thumbnail: LaneConfig::new(2),
            max_attempts: 3,
            retry_delay_ms: 5_000,
            max_retry_delay_ms: 300_000,
            job_timeout_secs: 1800,
            poll_interval_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Retry and reap pass interval.
    pub tick_interval_secs: u64,
    /// Prune pass interval.
    pub cleanup_interval_secs: u64,
    /// Terminal jobs older than this are deleted.
    pub retention_hours: u64,
    /// Extra slack past the job timeout before a PROCESSING job is reaped.
    pub reap_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            cleanup_interval_secs: 3600,
            retention_hours: 24 * 7,
            reap_grace_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// MonitoringConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub interval_secs: u64,
    /// How long sampled metrics are kept in memory.
    pub metric_retention_secs: u64,
    /// Queued jobs per lane above which the lane is reported as backlogged.
    pub queue_backlog_alert: u64,
    /// Failed / (completed + failed) ratio above which health degrades.
    pub failure_rate_alert: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            metric_retention_secs: 3600,
            queue_backlog_alert: 100,
            failure_rate_alert: 0.25,
        }
    }
}

// ---------------------------------------------------------------------------
// AuthConfig / RateLimitConfig
// ---------------------------------------------------------------------------

/// Consumed by the HTTP layer in front of the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 100,
        }
    }
}
