//! FFprobe-based [`MetadataExtractor`].
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON output into [`MediaMetadata`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rf_core::{Error, MediaMetadata, Result};
use serde::Deserialize;

use crate::command::ToolCommand;
use crate::traits::MetadataExtractor;

/// Probing a file should never take long; a hung ffprobe is a broken file.
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// A metadata extractor backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeExtractor {
    ffprobe_path: PathBuf,
}

impl FfprobeExtractor {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }
}

#[async_trait]
impl MetadataExtractor for FfprobeExtractor {
    async fn extract_metadata(&self, path: &Path) -> Result<MediaMetadata> {
        let output = ToolCommand::new(self.ffprobe_path.clone())
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path.to_string_lossy())
            .timeout(PROBE_TIMEOUT)
            .execute()
            .await?;

        parse_ffprobe_json(&output.stdout)
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Map ffprobe JSON into [`MediaMetadata`]. A file without a video stream
/// is rejected.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaMetadata> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::Probe("no video stream found".into()))?;

    let parse_num = |s: &Option<String>| s.as_deref().and_then(|v| v.parse::<f64>().ok());

    let frame_rate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    Ok(MediaMetadata {
        duration: parse_num(&output.format.duration).unwrap_or(0.0),
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        frame_rate,
        codec: video.codec_name.clone().unwrap_or_default(),
        bitrate: parse_num(&output.format.bit_rate).map(|b| b as u64).unwrap_or(0),
        format: output.format.format_name.unwrap_or_default(),
        size: parse_num(&output.format.size).map(|b| b as u64).unwrap_or(0),
    })
}

/// Parse an ffprobe rational like `"30000/1001"`. `0/0` yields `None`.
fn parse_frame_rate(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den > 0.0 && num > 0.0).then(|| num / den)
        }
        None => s.parse().ok().filter(|v: &f64| *v > 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            { "codec_type": "audio", "codec_name": "aac" },
            { "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
              "r_frame_rate": "30/1", "avg_frame_rate": "30000/1001" }
        ],
        "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.480000",
                    "size": "1000000", "bit_rate": "641025" }
    }"#;

    #[test]
    fn parses_video_stream_and_format() {
        let md = parse_ffprobe_json(SAMPLE).unwrap();
        assert_eq!((md.width, md.height), (1920, 1080));
        assert_eq!(md.codec, "h264");
        assert!((md.frame_rate - 29.97).abs() < 0.01);
        assert!((md.duration - 12.48).abs() < 1e-9);
        assert_eq!(md.size, 1_000_000);
        assert_eq!(md.bitrate, 641_025);
        assert!(md.format.starts_with("mov,mp4"));
    }

    #[test]
    fn audio_only_is_rejected() {
        let json = r#"{"streams":[{"codec_type":"audio"}],"format":{}}"#;
        assert!(matches!(parse_ffprobe_json(json), Err(Error::Probe(_))));
    }

    #[test]
    fn garbage_json_is_rejected() {
        assert!(matches!(parse_ffprobe_json("not json"), Err(Error::Probe(_))));
    }

    #[test]
    fn frame_rates() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("24"), Some(24.0));
        assert_eq!(parse_frame_rate("x/y"), None);
    }
}
