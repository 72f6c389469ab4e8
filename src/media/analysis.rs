//! Source media analysis with ffprobe.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AnalysisError;
use crate::job::model::Quality;
use crate::job::presets;

/// What ffprobe reports about a source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    /// Container format, e.g. "mov,mp4,m4a,3gp,3g2,mj2".
    pub format: String,
    /// Duration in seconds.
    pub duration: f64,
    /// File size in bytes.
    pub size: u64,
    /// Overall bitrate in bits per second.
    pub bitrate: u64,
    /// First video stream, if any.
    pub video: Option<VideoStreamInfo>,
    pub audio: Vec<AudioStreamInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// As reported, e.g. "30000/1001".
    pub frame_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    pub codec: String,
    pub channels: u8,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl VideoStreamInfo {
    /// Frame rate as a number, if the fraction is well formed.
    pub fn fps(&self) -> Option<f64> {
        let (num, den) = self.frame_rate.split_once('/')?;
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        (den > 0.0).then(|| num / den)
    }
}

impl SourceInfo {
    /// Height of the video stream.
    pub fn height(&self) -> Option<u32> {
        self.video.as_ref().map(|v| v.height)
    }

    /// Presets that do not upscale this source. Every preset when there is
    /// no video stream to compare against.
    pub fn recommended_qualities(&self) -> Vec<Quality> {
        match self.height() {
            Some(height) => presets::recommended_for_height(height),
            None => presets::catalog(),
        }
    }
}

/// Inspects a downloaded source before it is encoded.
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    /// Cancelling the token kills the analysis process.
    async fn analyze(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<SourceInfo, AnalysisError>;
}

/// Analyzes sources with the system ffprobe binary.
pub struct FfprobeAnalyzer {
    binary: PathBuf,
}

impl FfprobeAnalyzer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaAnalyzer for FfprobeAnalyzer {
    async fn analyze(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<SourceInfo, AnalysisError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true);

        debug!(path = ?path, "Running ffprobe");

        let output = tokio::select! {
            output = cmd.output() => output.map_err(|e| AnalysisError::SpawnFailed(e.to_string()))?,
            _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
        };

        if !output.status.success() {
            return Err(AnalysisError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let json: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| AnalysisError::InvalidOutput(e.to_string()))?;
        parse_output(&json)
    }
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_output(json: &Value) -> Result<SourceInfo, AnalysisError> {
    let format = json
        .get("format")
        .ok_or_else(|| AnalysisError::InvalidOutput("missing format".to_string()))?;
    let streams = json
        .get("streams")
        .and_then(Value::as_array)
        .ok_or_else(|| AnalysisError::InvalidOutput("missing streams".to_string()))?;

    let mut video = None;
    let mut audio = Vec::new();
    for stream in streams {
        match stream.get("codec_type").and_then(Value::as_str) {
            Some("video") if video.is_none() => video = parse_video_stream(stream),
            Some("audio") => audio.extend(parse_audio_stream(stream)),
            _ => {}
        }
    }

    Ok(SourceInfo {
        format: format
            .get("format_name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        duration: numeric_str(format, "duration").unwrap_or(0.0),
        size: numeric_str(format, "size").unwrap_or(0),
        bitrate: numeric_str(format, "bit_rate").unwrap_or(0),
        video,
        audio,
    })
}

fn parse_video_stream(stream: &Value) -> Option<VideoStreamInfo> {
    Some(VideoStreamInfo {
        codec: stream.get("codec_name")?.as_str()?.to_string(),
        width: u32::try_from(stream.get("width")?.as_u64()?).ok()?,
        height: u32::try_from(stream.get("height")?.as_u64()?).ok()?,
        frame_rate: stream
            .get("r_frame_rate")
            .and_then(Value::as_str)
            .unwrap_or("0/1")
            .to_string(),
    })
}

fn parse_audio_stream(stream: &Value) -> Option<AudioStreamInfo> {
    Some(AudioStreamInfo {
        codec: stream.get("codec_name")?.as_str()?.to_string(),
        channels: u8::try_from(stream.get("channels")?.as_u64()?).ok()?,
        sample_rate: numeric_str(stream, "sample_rate").unwrap_or(48000),
    })
}

/// ffprobe prints most numbers as strings.
fn numeric_str<T: std::str::FromStr>(value: &Value, key: &str) -> Option<T> {
    value.get(key)?.as_str()?.parse().ok()
}
