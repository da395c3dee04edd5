//! Collaborator interfaces consumed by the pipeline.
//!
//! The pipeline only ever talks to these traits; the ffmpeg and filesystem
//! implementations in this crate are one choice of backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rf_core::{MediaMetadata, OutputFormat, Quality, QualityPreset, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transcoding
// ---------------------------------------------------------------------------

/// Parameters for one rendition.
#[derive(Debug, Clone)]
pub struct TranscodeParams {
    pub quality: Quality,
    pub format: OutputFormat,
    pub preset: QualityPreset,
    /// Where the primary output file must be written. The parent exists.
    pub output_path: PathBuf,
}

impl TranscodeParams {
    pub fn new(quality: Quality, format: OutputFormat, output_path: PathBuf) -> Self {
        Self {
            quality,
            format,
            preset: quality.preset(),
            output_path,
        }
    }
}

/// What the engine produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeOutput {
    pub success: bool,
    pub output_path: PathBuf,
    pub file_size: u64,
    /// Seconds.
    pub duration: f64,
    /// Bits per second.
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
}

#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcode(&self, input: &Path, params: &TranscodeParams) -> Result<TranscodeOutput>;
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract_metadata(&self, path: &Path) -> Result<MediaMetadata>;
}

// ---------------------------------------------------------------------------
// Thumbnails and previews
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ThumbnailParams {
    pub count: u32,
    pub width: u32,
    /// Directory receiving `thumb_NN.jpg` files. Exists.
    pub output_dir: PathBuf,
    /// Source duration in seconds, used to spread the frames.
    pub duration_hint: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PreviewParams {
    pub duration_secs: u32,
    pub width: u32,
    pub output_path: PathBuf,
    pub duration_hint: Option<f64>,
}

#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// Returns the written image paths, in timeline order.
    async fn generate_thumbnails(&self, input: &Path, params: &ThumbnailParams) -> Result<Vec<PathBuf>>;

    async fn generate_preview(&self, input: &Path, params: &PreviewParams) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Keyed file storage. Keys are relative, `/`-separated paths.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` under `key`, replacing any existing file.
    async fn save_file(&self, key: &str, data: &[u8]) -> Result<PathBuf>;

    async fn get_file(&self, key: &str) -> Result<Vec<u8>>;

    /// Returns whether something was deleted.
    async fn delete_file(&self, key: &str) -> Result<bool>;

    async fn file_exists(&self, key: &str) -> Result<bool>;

    async fn get_file_size(&self, key: &str) -> Result<u64>;

    /// Absolute path for `key`, for collaborators that read or write files directly.
    fn full_path(&self, key: &str) -> Result<PathBuf>;

    /// [`Storage::full_path`], with parent directories created.
    async fn prepare_path(&self, key: &str) -> Result<PathBuf>;

    /// Copy an external file into storage. Returns the stored size.
    async fn import_file(&self, source: &Path, key: &str) -> Result<u64>;
}
