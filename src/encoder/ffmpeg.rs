//! FFmpeg invocation builders.
//!
//! Every invocation is an explicit argument list; nothing is passed through
//! a shell. Two-pass encodes are two separate invocations.

use std::path::{Path, PathBuf};

use crate::config::model::{PreviewConfig, ThumbnailConfig};
use crate::job::model::{
    Quality, TranscodingOptions, VideoCodec, WatermarkPosition, WatermarkSpec,
};

#[cfg(windows)]
const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
const NULL_SINK: &str = "/dev/null";

/// Audio bitrate used for preview clips, in kbps.
const PREVIEW_AUDIO_BITRATE: u32 = 96;

/// One FFmpeg invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegCommand {
    args: Vec<String>,
    output: Option<PathBuf>,
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegCommand {
    /// Starts a command that overwrites outputs and only logs errors.
    pub fn new() -> Self {
        Self {
            args: ["-y", "-hide_banner", "-loglevel", "error"]
                .into_iter()
                .map(String::from)
                .collect(),
            output: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an input file.
    pub fn input(self, path: &Path) -> Self {
        self.arg("-i").arg(path.to_string_lossy())
    }

    /// Sets the output file. Must be the last call.
    pub fn output(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self.output = Some(path.to_path_buf());
        self
    }

    /// Discards the output (first pass of a two-pass encode).
    pub fn null_output(self) -> Self {
        self.arg("-f").arg("null").arg(NULL_SINK)
    }

    /// The full argument list, excluding the program name.
    pub fn as_args(&self) -> &[String] {
        &self.args
    }

    /// The file this command writes, if any.
    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }
}

/// Files involved in encoding one rendition.
#[derive(Debug, Clone, Copy)]
pub struct RenditionPaths<'a> {
    pub source: &'a Path,
    /// Local copy of the watermark image, if the job has one.
    pub watermark: Option<&'a Path>,
    pub output: &'a Path,
    /// Prefix for two-pass statistics files.
    pub passlog: &'a Path,
}

/// Builds the invocations for one rendition: one, or two when two-pass.
pub fn rendition_commands(
    quality: &Quality,
    options: &TranscodingOptions,
    paths: RenditionPaths<'_>,
) -> Vec<FfmpegCommand> {
    let video = video_args(quality, options, paths.watermark.is_some());

    if !options.two_pass {
        let cmd = with_inputs(paths.source, paths.watermark)
            .args(video)
            .args(audio_args(options))
            .args(["-movflags", "+faststart"])
            .output(paths.output);
        return vec![cmd];
    }

    let passlog = paths.passlog.to_string_lossy().into_owned();
    let first = with_inputs(paths.source, paths.watermark)
        .args(video.clone())
        .args(["-pass", "1", "-passlogfile", passlog.as_str(), "-an"])
        .null_output();
    let second = with_inputs(paths.source, paths.watermark)
        .args(video)
        .args(["-pass", "2", "-passlogfile", passlog.as_str()])
        .args(audio_args(options))
        .args(["-movflags", "+faststart"])
        .output(paths.output);
    vec![first, second]
}

/// Builds the invocation that segments one quality for HLS delivery.
pub fn hls_command(
    quality: &Quality,
    options: &TranscodingOptions,
    source: &Path,
    watermark: Option<&Path>,
    output_dir: &Path,
    segment_duration: u32,
) -> FfmpegCommand {
    let segment_pattern = output_dir.join("segment_%03d.ts");
    with_inputs(source, watermark)
        .args(video_args(quality, options, watermark.is_some()))
        .args(audio_args(options))
        .args(["-f", "hls", "-hls_time"])
        .arg(segment_duration.to_string())
        .args(["-hls_playlist_type", "vod", "-hls_segment_filename"])
        .arg(segment_pattern.to_string_lossy())
        .output(&output_dir.join("playlist.m3u8"))
}

/// Extracts one frame at `offset_seconds` as a JPEG.
pub fn thumbnail_command(
    source: &Path,
    output: &Path,
    offset_seconds: f64,
    thumbnails: &ThumbnailConfig,
) -> FfmpegCommand {
    FfmpegCommand::new()
        .arg("-ss")
        .arg(format!("{:.3}", offset_seconds))
        .input(source)
        .args(["-frames:v", "1", "-vf"])
        .arg(format!("scale={}:-2", thumbnails.width))
        .args(["-q:v", "2"])
        .output(output)
}

/// Encodes a short reduced-size preview clip.
pub fn preview_command(source: &Path, output: &Path, preview: &PreviewConfig) -> FfmpegCommand {
    FfmpegCommand::new()
        .arg("-ss")
        .arg(format!("{:.3}", preview.start_seconds))
        .input(source)
        .arg("-t")
        .arg(format!("{:.3}", preview.duration_seconds))
        .arg("-vf")
        .arg(format!("scale={}:{}", preview.width, preview.height))
        .args(["-c:v", "libx264", "-preset", "veryfast", "-b:v"])
        .arg(format!("{}k", preview.bitrate))
        .args(["-c:a", "aac", "-b:a"])
        .arg(format!("{}k", PREVIEW_AUDIO_BITRATE))
        .args(["-movflags", "+faststart"])
        .output(output)
}

/// Overlay filter graph: scales the source and blends in the watermark.
pub fn watermark_filter(quality: &Quality, watermark: &WatermarkSpec) -> String {
    format!(
        "[1:v]scale=iw*{scale}:-1,format=rgba,colorchannelmixer=aa={opacity}[wm];\
         [0:v]scale={w}:{h}[base];[base][wm]overlay={position}[v]",
        scale = watermark.scale,
        opacity = watermark.opacity,
        w = quality.width,
        h = quality.height,
        position = overlay_position(watermark.position),
    )
}

fn overlay_position(position: WatermarkPosition) -> &'static str {
    match position {
        WatermarkPosition::TopLeft => "10:10",
        WatermarkPosition::TopRight => "main_w-overlay_w-10:10",
        WatermarkPosition::BottomLeft => "10:main_h-overlay_h-10",
        WatermarkPosition::BottomRight => "main_w-overlay_w-10:main_h-overlay_h-10",
        WatermarkPosition::Center => "(main_w-overlay_w)/2:(main_h-overlay_h)/2",
    }
}

fn with_inputs(source: &Path, watermark: Option<&Path>) -> FfmpegCommand {
    let cmd = FfmpegCommand::new().input(source);
    match watermark {
        Some(image) => cmd.input(image),
        None => cmd,
    }
}

fn video_args(quality: &Quality, options: &TranscodingOptions, has_watermark: bool) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match (&options.watermark, has_watermark) {
        (Some(watermark), true) => {
            args.push("-filter_complex".into());
            args.push(watermark_filter(quality, watermark));
            args.extend(["-map", "[v]", "-map", "0:a?"].map(String::from));
        }
        _ => {
            args.push("-vf".into());
            args.push(format!("scale={}:{}", quality.width, quality.height));
        }
    }

    args.push("-c:v".into());
    args.push(options.codec.ffmpeg_encoder().into());

    let speed = options.preset.speed_level();
    match options.codec {
        VideoCodec::H264 | VideoCodec::H265 => {
            args.push("-preset".into());
            args.push(options.preset.as_str().into());
        }
        VideoCodec::Vp9 => {
            args.extend(["-deadline".to_string(), "good".to_string()]);
            args.push("-cpu-used".into());
            args.push(speed.to_string());
        }
        VideoCodec::Av1 => {
            args.push("-preset".into());
            args.push((speed + 2).to_string());
        }
    }

    let bitrate = u64::from(quality.bitrate);
    args.push("-b:v".into());
    args.push(format!("{}k", bitrate));
    args.push("-maxrate".into());
    args.push(format!("{}k", bitrate + bitrate / 10));
    args.push("-bufsize".into());
    args.push(format!("{}k", bitrate * 2));
    args.push("-r".into());
    args.push(quality.frame_rate.to_string());
    args.push("-pix_fmt".into());
    args.push("yuv420p".into());
    args
}

fn audio_args(options: &TranscodingOptions) -> Vec<String> {
    vec![
        "-c:a".to_string(),
        options.audio_codec.ffmpeg_encoder().to_string(),
        "-b:a".to_string(),
        format!("{}k", options.audio_bitrate),
    ]
}
