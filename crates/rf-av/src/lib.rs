//! # rf-av
//!
//! Collaborators the pipeline drives, and their ffmpeg-based implementations.
//!
//! - **Interfaces** ([`TranscodeEngine`], [`MetadataExtractor`],
//!   [`ThumbnailGenerator`], [`Storage`]): the narrow boundary the job
//!   executor talks to. Tests substitute in-memory fakes.
//! - **Command execution** ([`ToolCommand`]): async process builder with a
//!   hard timeout.
//! - **Tool discovery** ([`ToolRegistry`]): resolve ffmpeg/ffprobe from config
//!   overrides or `PATH`.
//! - **Implementations**: [`FfmpegEngine`], [`FfprobeExtractor`],
//!   [`LocalStorage`].

pub mod command;
pub mod ffmpeg;
pub mod ffprobe;
pub mod storage;
pub mod tools;
pub mod traits;

pub use command::{ToolCommand, ToolOutput};
pub use ffmpeg::FfmpegEngine;
pub use ffprobe::FfprobeExtractor;
pub use storage::LocalStorage;
pub use tools::{ToolInfo, ToolRegistry};
pub use traits::{
    MetadataExtractor, PreviewParams, Storage, ThumbnailGenerator, ThumbnailParams,
    TranscodeEngine, TranscodeOutput, TranscodeParams,
};
