//! Pipeline record enums and their state machines.
//!
//! Every enum has a stable lowercase name used both in the database and on
//! the wire. Status enums expose `can_transition_to` so each transition site
//! is checked against an exhaustive match instead of a string comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Generate `as_str`, `Display`, `FromStr` and an `ALL` slice for a
/// fieldless enum from a `Variant => "name"` table.
macro_rules! named_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Stable lowercase name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err(Error::Validation(format!(
                        "unknown {} '{other}'",
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// VideoStatus
// ---------------------------------------------------------------------------

/// Lifecycle of an uploaded source video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

named_enum!(VideoStatus {
    Uploaded => "uploaded",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl VideoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the video may move from `self` to `next`.
    ///
    /// A terminal video can be processed again; cancellation and metadata
    /// failures may fail an `Uploaded` video directly.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        match (self, next) {
            (Uploaded | Completed | Failed, Processing) => true,
            (Processing, Completed | Failed) => true,
            (Uploaded, Failed) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// VariantStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a single rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

named_enum!(VariantStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl VariantStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: VariantStatus) -> bool {
        use VariantStatus::*;
        match (self, next) {
            (Pending, Processing | Failed) => true,
            // A retried attempt re-enters processing.
            (Processing, Processing | Completed | Failed) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a durable job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

named_enum!(JobStatus {
    Queued => "queued",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }

    /// Whether the job may move from `self` to `next`.
    ///
    /// `Processing -> Queued` covers both a scheduled retry and a reaped job.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Processing | Cancelled) => true,
            (Processing, Completed | Failed | Queued) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// JobType
// ---------------------------------------------------------------------------

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Transcode,
    ThumbnailGeneration,
    PreviewGeneration,
    MetadataExtraction,
}

named_enum!(JobType {
    Transcode => "transcode",
    ThumbnailGeneration => "thumbnail_generation",
    PreviewGeneration => "preview_generation",
    MetadataExtraction => "metadata_extraction",
});

// ---------------------------------------------------------------------------
// Lane
// ---------------------------------------------------------------------------

/// Named, capacity-bounded channel of jobs sharing a priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    High,
    Normal,
    Low,
    Thumbnail,
}

named_enum!(Lane {
    High => "high",
    Normal => "normal",
    Low => "low",
    Thumbnail => "thumbnail",
});

impl Lane {
    /// Relative priority weight. Higher lanes get larger capacity budgets,
    /// never preemption.
    pub fn weight(&self) -> u32 {
        match self {
            Self::High => 3,
            Self::Normal => 2,
            Self::Low | Self::Thumbnail => 1,
        }
    }

    /// Lanes a caller may request for transcode work.
    pub fn is_priority_lane(&self) -> bool {
        !matches!(self, Self::Thumbnail)
    }
}

// ---------------------------------------------------------------------------
// Quality
// ---------------------------------------------------------------------------

/// Target rendition quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Ultra,
}

named_enum!(Quality {
    Low => "low",
    Medium => "medium",
    High => "high",
    Ultra => "ultra",
});

/// Encoder targets for a [`Quality`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl Quality {
    pub fn preset(&self) -> QualityPreset {
        let (height, video_bitrate_kbps, audio_bitrate_kbps) = match self {
            Self::Low => (360, 800, 96),
            Self::Medium => (720, 2500, 128),
            Self::High => (1080, 5000, 192),
            Self::Ultra => (2160, 16000, 256),
        };
        QualityPreset {
            height,
            video_bitrate_kbps,
            audio_bitrate_kbps,
        }
    }
}

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// Output container for a rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
    Hls,
}

named_enum!(OutputFormat {
    Mp4 => "mp4",
    Webm => "webm",
    Hls => "hls",
});

impl OutputFormat {
    /// File extension of the primary output file.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Hls => "m3u8",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Hls => "application/vnd.apple.mpegurl",
        }
    }
}

// ---------------------------------------------------------------------------
// VideoKind
// ---------------------------------------------------------------------------

/// How a source video entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoKind {
    Upload,
    Import,
}

named_enum!(VideoKind {
    Upload => "upload",
    Import => "import",
});

// ---------------------------------------------------------------------------
// MediaMetadata
// ---------------------------------------------------------------------------

/// Technical metadata of a media file, as reported by the metadata extractor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Duration in seconds.
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Primary video codec name (e.g. "h264").
    pub codec: String,
    /// Overall bitrate in bits per second.
    pub bitrate: u64,
    /// Container format name (e.g. "mov,mp4,m4a").
    pub format: String,
    /// File size in bytes.
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for lane in Lane::ALL {
            assert_eq!(lane.as_str().parse::<Lane>().unwrap(), *lane);
        }
        for ty in JobType::ALL {
            assert_eq!(ty.as_str().parse::<JobType>().unwrap(), *ty);
        }
        assert_eq!("MP4".parse::<OutputFormat>().unwrap(), OutputFormat::Mp4);
    }

    #[test]
    fn unknown_name_is_validation_error() {
        let err = "8k".parse::<Quality>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("Quality"));
    }

    #[test]
    fn serde_matches_db_names() {
        let json = serde_json::to_string(&JobType::ThumbnailGeneration).unwrap();
        assert_eq!(json, "\"thumbnail_generation\"");
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn job_terminal_states_have_no_exits() {
        for from in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(*to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn job_retry_and_cancel_transitions() {
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn video_transitions() {
        assert!(VideoStatus::Uploaded.can_transition_to(VideoStatus::Processing));
        assert!(VideoStatus::Failed.can_transition_to(VideoStatus::Processing));
        assert!(!VideoStatus::Processing.can_transition_to(VideoStatus::Processing));
        assert!(!VideoStatus::Uploaded.can_transition_to(VideoStatus::Completed));
    }

    #[test]
    fn variant_transitions() {
        assert!(VariantStatus::Pending.can_transition_to(VariantStatus::Processing));
        assert!(!VariantStatus::Completed.can_transition_to(VariantStatus::Failed));
        assert!(!VariantStatus::Pending.can_transition_to(VariantStatus::Completed));
    }

    #[test]
    fn presets_scale_with_quality() {
        let heights: Vec<u32> = Quality::ALL.iter().map(|q| q.preset().height).collect();
        assert!(heights.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn lane_weights() {
        assert!(Lane::High.weight() > Lane::Normal.weight());
        assert!(!Lane::Thumbnail.is_priority_lane());
        assert_eq!(OutputFormat::Hls.extension(), "m3u8");
    }
}
