use clap::{Parser, Subcommand};
use rf_core::{Lane, OutputFormat, Quality, VideoId};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelforge")]
#[command(author, version, about = "Durable video transcoding pipeline")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run workers, scheduler and monitor until interrupted
    Start,

    /// Copy a source file into storage and register it as a video
    Ingest {
        #[arg(required = true)]
        file: PathBuf,

        /// Mime type; guessed from the extension when omitted
        #[arg(long)]
        mime: Option<String>,
    },

    /// Queue transcoding work for a video
    Process {
        video_id: VideoId,

        /// Renditions to produce (repeatable); configured defaults when omitted
        #[arg(short, long = "quality")]
        qualities: Vec<Quality>,

        /// Container formats (repeatable); configured defaults when omitted
        #[arg(short, long = "format")]
        formats: Vec<OutputFormat>,

        /// Lane for the transcode jobs: high, normal or low
        #[arg(short, long)]
        priority: Option<Lane>,

        #[arg(long)]
        no_thumbnails: bool,

        #[arg(long)]
        no_preview: bool,

        /// Re-read source metadata before transcoding
        #[arg(long)]
        refresh_metadata: bool,

        /// Run the pipeline in this process until the video finishes
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "3600", requires = "wait")]
        timeout: u64,
    },

    /// Show processing status of a video
    Status {
        video_id: VideoId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel pending work for a video
    Cancel { video_id: VideoId },

    /// Delete a video, its renditions and its stored files
    Delete { video_id: VideoId },

    /// Show per-lane queue statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Check pipeline health
    Health {
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
