//! FFmpeg-backed [`TranscodeEngine`] and [`ThumbnailGenerator`].
//!
//! Argument construction is kept in plain functions so it can be checked
//! without an ffmpeg binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rf_core::{Error, OutputFormat, Result};

use crate::command::ToolCommand;
use crate::ffprobe::FfprobeExtractor;
use crate::tools::ToolRegistry;
use crate::traits::{
    MetadataExtractor, PreviewParams, ThumbnailGenerator, ThumbnailParams, TranscodeEngine,
    TranscodeOutput, TranscodeParams,
};

/// HLS segment length in seconds.
const HLS_SEGMENT_SECS: u32 = 6;

#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    prober: FfprobeExtractor,
    timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, timeout: Duration) -> Self {
        Self {
            ffmpeg,
            prober: FfprobeExtractor::new(ffprobe),
            timeout,
        }
    }

    /// Build from discovered tools. Fails with [`Error::Config`] if either
    /// binary is missing.
    pub fn from_registry(tools: &ToolRegistry, timeout: Duration) -> Result<Self> {
        Ok(Self::new(
            tools.require("ffmpeg")?.to_path_buf(),
            tools.require("ffprobe")?.to_path_buf(),
            timeout,
        ))
    }

    async fn run(&self, args: Vec<String>) -> Result<()> {
        ToolCommand::new(self.ffmpeg.clone())
            .args(args)
            .timeout(self.timeout)
            .execute()
            .await?;
        Ok(())
    }
}

/// ffmpeg arguments for one rendition.
pub fn transcode_args(input: &Path, params: &TranscodeParams) -> Vec<String> {
    let preset = params.preset;
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vf".into(),
        format!("scale=-2:'min({},ih)'", preset.height),
    ];

    match params.format {
        OutputFormat::Mp4 | OutputFormat::Hls => {
            args.extend(["-c:v", "libx264", "-preset", "medium"].map(String::from));
            args.extend(["-c:a".into(), "aac".into()]);
        }
        OutputFormat::Webm => {
            args.extend(["-c:v", "libvpx-vp9", "-row-mt", "1"].map(String::from));
            args.extend(["-c:a".into(), "libopus".into()]);
        }
    }
    args.extend([
        "-b:v".into(),
        format!("{}k", preset.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", preset.video_bitrate_kbps * 3 / 2),
        "-bufsize".into(),
        format!("{}k", preset.video_bitrate_kbps * 2),
        "-b:a".into(),
        format!("{}k", preset.audio_bitrate_kbps),
    ]);

    match params.format {
        OutputFormat::Mp4 => args.extend(["-movflags", "+faststart"].map(String::from)),
        OutputFormat::Webm => {}
        OutputFormat::Hls => {
            let segment_pattern = params.output_path.with_file_name("segment_%04d.ts");
            args.extend([
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                HLS_SEGMENT_SECS.to_string(),
                "-hls_playlist_type".into(),
                "vod".into(),
                "-hls_segment_filename".into(),
                segment_pattern.to_string_lossy().into_owned(),
            ]);
        }
    }

    args.push(params.output_path.to_string_lossy().into_owned());
    args
}

/// Timestamps (seconds) of `count` frames spread evenly over `duration`.
pub fn thumbnail_offsets(count: u32, duration: Option<f64>) -> Vec<f64> {
    match duration.filter(|d| *d > 0.0) {
        Some(d) => (1..=count)
            .map(|i| d * f64::from(i) / f64::from(count + 1))
            .collect(),
        None => (0..count).map(f64::from).collect(),
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn transcode(&self, input: &Path, params: &TranscodeParams) -> Result<TranscodeOutput> {
        tracing::info!(
            input = %input.display(),
            quality = %params.quality,
            format = %params.format,
            "Transcoding rendition"
        );
        self.run(transcode_args(input, params)).await?;

        let file_size = tokio::fs::metadata(&params.output_path).await?.len();
        // An HLS playlist has no meaningful probe of its own; report the preset.
        let probed = match params.format {
            OutputFormat::Hls => None,
            _ => Some(self.prober.extract_metadata(&params.output_path).await?),
        };

        Ok(match probed {
            Some(md) => TranscodeOutput {
                success: true,
                output_path: params.output_path.clone(),
                file_size,
                duration: md.duration,
                bitrate: md.bitrate,
                width: md.width,
                height: md.height,
                codec: md.codec,
            },
            None => TranscodeOutput {
                success: true,
                output_path: params.output_path.clone(),
                file_size,
                duration: 0.0,
                bitrate: u64::from(params.preset.video_bitrate_kbps) * 1000,
                width: 0,
                height: params.preset.height,
                codec: "h264".into(),
            },
        })
    }
}

#[async_trait]
impl ThumbnailGenerator for FfmpegEngine {
    async fn generate_thumbnails(&self, input: &Path, params: &ThumbnailParams) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(params.count as usize);
        for (i, offset) in thumbnail_offsets(params.count, params.duration_hint)
            .into_iter()
            .enumerate()
        {
            let out = params.output_dir.join(format!("thumb_{i:02}.jpg"));
            self.run(vec![
                "-hide_banner".into(),
                "-nostdin".into(),
                "-y".into(),
                "-ss".into(),
                format!("{offset:.3}"),
                "-i".into(),
                input.to_string_lossy().into_owned(),
                "-frames:v".into(),
                "1".into(),
                "-vf".into(),
                format!("scale={}:-2", params.width),
                out.to_string_lossy().into_owned(),
            ])
            .await?;
            paths.push(out);
        }
        if paths.is_empty() {
            return Err(Error::Validation("thumbnail count is 0".into()));
        }
        Ok(paths)
    }

    async fn generate_preview(&self, input: &Path, params: &PreviewParams) -> Result<PathBuf> {
        // Start a tenth of the way in to skip intros and black frames.
        let start = params.duration_hint.map(|d| d / 10.0).unwrap_or(0.0);
        self.run(vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-ss".into(),
            format!("{start:.3}"),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-t".into(),
            params.duration_secs.to_string(),
            "-vf".into(),
            format!("scale={}:-2", params.width),
            "-c:v".into(),
            "libx264".into(),
            "-an".into(),
            "-movflags".into(),
            "+faststart".into(),
            params.output_path.to_string_lossy().into_owned(),
        ])
        .await?;
        Ok(params.output_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::Quality;

    #[test]
    fn mp4_args() {
        let params = TranscodeParams::new(Quality::High, OutputFormat::Mp4, "/out/high.mp4".into());
        let args = transcode_args(Path::new("/in/src.mov"), &params);
        assert_eq!(args.last().map(String::as_str), Some("/out/high.mp4"));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-b:v", "5000k"]));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn webm_uses_vp9() {
        let params = TranscodeParams::new(Quality::Low, OutputFormat::Webm, "/out/low.webm".into());
        let args = transcode_args(Path::new("/in/src.mov"), &params);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libvpx-vp9"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "libopus"]));
    }

    #[test]
    fn hls_segments_next_to_playlist() {
        let params = TranscodeParams::new(Quality::Medium, OutputFormat::Hls, "/out/v/index.m3u8".into());
        let args = transcode_args(Path::new("/in/src.mov"), &params);
        assert!(args.windows(2).any(|w| w == ["-f", "hls"]));
        assert!(args.contains(&"/out/v/segment_%04d.ts".to_string()));
    }

    #[test]
    fn offsets_spread_over_duration() {
        assert_eq!(thumbnail_offsets(2, Some(30.0)), vec![10.0, 20.0]);
        assert_eq!(thumbnail_offsets(3, None), vec![0.0, 1.0, 2.0]);
        assert!(thumbnail_offsets(0, Some(10.0)).is_empty());
    }

    #[test]
    fn from_registry_requires_both_tools() {
        let tools = ToolRegistry::with_paths([("ffmpeg", PathBuf::from("/usr/bin/ffmpeg"))]);
        let err = FfmpegEngine::from_registry(&tools, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
