//! Typed row models.
//!
//! Each model exposes `from_row` for use with `query_row`/`query_map`. The
//! column order expected by `from_row` matches the `COLS` constant of the
//! corresponding query module.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rf_core::{
    JobId, JobStatus, JobType, Lane, MediaMetadata, OutputFormat, Quality, VariantId,
    VariantStatus, VideoId, VideoKind, VideoStatus,
};

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))?;
    Ok(T::from(uuid))
}

fn parse_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = rf_core::Error>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_err(idx, e))
}

fn parse_opt_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = rf_core::Error>,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|v| v.parse().map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_err(idx, e))
}

fn parse_opt_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| serde_json::from_str(&v).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// An uploaded source video and its derived processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    pub kind: VideoKind,
    pub status: VideoStatus,
    pub original_path: String,
    pub original_name: String,
    pub original_size: u64,
    pub mime_type: String,
    /// Populated once by metadata extraction.
    pub metadata: Option<MediaMetadata>,
    pub processing_progress: f64,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            kind: parse_enum(row, 1)?,
            status: parse_enum(row, 2)?,
            original_path: row.get(3)?,
            original_name: row.get(4)?,
            original_size: row.get::<_, i64>(5)? as u64,
            mime_type: row.get(6)?,
            metadata: parse_opt_json(row, 7)?,
            processing_progress: row.get(8)?,
            processing_error: row.get(9)?,
            created_at: parse_ts(row, 10)?,
            updated_at: parse_ts(row, 11)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

/// One produced rendition (quality x format) of a video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub video_id: VideoId,
    pub quality: Quality,
    pub format: OutputFormat,
    pub status: VariantStatus,
    pub output_path: Option<String>,
    pub file_size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate: Option<u64>,
    pub duration: Option<f64>,
    pub codec: Option<String>,
    pub processing_progress: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Variant {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            video_id: parse_id(row, 1)?,
            quality: parse_enum(row, 2)?,
            format: parse_enum(row, 3)?,
            status: parse_enum(row, 4)?,
            output_path: row.get(5)?,
            file_size: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
            width: row.get(7)?,
            height: row.get(8)?,
            bitrate: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
            duration: row.get(10)?,
            codec: row.get(11)?,
            processing_progress: row.get(12)?,
            error: row.get(13)?,
            created_at: parse_ts(row, 14)?,
            completed_at: parse_opt_ts(row, 15)?,
        })
    }
}

/// Encoder output recorded on a completed variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantOutput {
    pub output_path: String,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    pub duration: f64,
    pub codec: String,
}

// ---------------------------------------------------------------------------
// Job payload / result
// ---------------------------------------------------------------------------

/// Type-specific parameters stored with a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Transcode {
        variant_id: VariantId,
        quality: Quality,
        format: OutputFormat,
    },
    Thumbnails {
        count: u32,
        width: u32,
    },
    Preview {
        duration_secs: u32,
    },
    Metadata,
}

impl JobPayload {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Transcode { .. } => JobType::Transcode,
            Self::Thumbnails { .. } => JobType::ThumbnailGeneration,
            Self::Preview { .. } => JobType::PreviewGeneration,
            Self::Metadata => JobType::MetadataExtraction,
        }
    }
}

/// What a completed job produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    Variant { variant_id: VariantId, output_path: PathBuf },
    Thumbnails { paths: Vec<PathBuf> },
    Preview { path: PathBuf },
    Metadata { metadata: MediaMetadata },
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A durable unit of work targeting one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub video_id: VideoId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub lane: Lane,
    pub priority: i32,
    pub quality: Option<Quality>,
    pub format: Option<OutputFormat>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub payload: JobPayload,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub locked_by: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    /// Set while the job waits out a retry backoff.
    pub retry_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            video_id: parse_id(row, 1)?,
            job_type: parse_enum(row, 2)?,
            status: parse_enum(row, 3)?,
            lane: parse_enum(row, 4)?,
            priority: row.get(5)?,
            quality: parse_opt_enum(row, 6)?,
            format: parse_opt_enum(row, 7)?,
            attempt_count: row.get(8)?,
            max_attempts: row.get(9)?,
            payload: parse_json(row, 10)?,
            result: parse_opt_json(row, 11)?,
            error: row.get(12)?,
            locked_by: row.get(13)?,
            scheduled_at: parse_ts(row, 14)?,
            retry_at: parse_opt_ts(row, 15)?,
            started_at: parse_opt_ts(row, 16)?,
            completed_at: parse_opt_ts(row, 17)?,
            created_at: parse_ts(row, 18)?,
        })
    }

    /// Whether another attempt is allowed after the current one.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// Job counts by status, for one video or one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Queued and immediately eligible.
    pub queued: u64,
    /// Queued but waiting out a retry backoff.
    pub retrying: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.queued + self.retrying + self.processing + self.completed + self.failed + self.cancelled
    }

    /// Jobs that count towards a video's outcome.
    pub fn non_cancelled(&self) -> u64 {
        self.total() - self.cancelled
    }

    pub fn terminal(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    pub(crate) fn add(&mut self, status: JobStatus, retrying: bool, n: u64) {
        match status {
            JobStatus::Queued if retrying => self.retrying += n,
            JobStatus::Queued => self.queued += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
            JobStatus::Cancelled => self.cancelled += n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serialization_is_tagged() {
        let payload = JobPayload::Thumbnails { count: 2, width: 320 };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"kind":"thumbnails","count":2,"width":320}"#);
        assert_eq!(payload.job_type(), JobType::ThumbnailGeneration);
        assert_eq!(JobPayload::Metadata.job_type(), JobType::MetadataExtraction);
    }

    #[test]
    fn counts_split_retrying_from_queued() {
        let mut c = JobCounts::default();
        c.add(JobStatus::Queued, false, 2);
        c.add(JobStatus::Queued, true, 1);
        c.add(JobStatus::Cancelled, false, 3);
        assert_eq!(c.queued, 2);
        assert_eq!(c.retrying, 1);
        assert_eq!(c.total(), 6);
        assert_eq!(c.non_cancelled(), 3);
        assert_eq!(c.terminal(), 3);
    }
}
