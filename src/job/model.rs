//! Transcoding job, quality, and record definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::StrategyKind;

/// A rendition spec: one rung of the quality ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quality {
    /// Label such as "720p".
    pub label: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Video bitrate in kbps.
    pub bitrate: u32,
    /// Output frame rate.
    pub frame_rate: u32,
}

impl Quality {
    /// Creates a new quality spec.
    pub fn new(label: impl Into<String>, width: u32, height: u32, bitrate: u32, frame_rate: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            bitrate,
            frame_rate,
        }
    }

    /// Declared bandwidth in bits per second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.bitrate) * 1000
    }

    /// Resolution as "WIDTHxHEIGHT".
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// A quality as requested by a caller: a preset name or a verbatim spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualityRequest {
    Preset(String),
    Custom(Quality),
}

/// Delivery format of the job output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One progressive file per quality.
    #[default]
    Single,
    /// Segmented output with an adaptive-streaming master manifest.
    Manifest,
}

/// Video codec family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// FFmpeg encoder name for this codec.
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Vp9 => "libvpx-vp9",
            Self::Av1 => "libsvtav1",
        }
    }
}

/// Audio codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Aac,
    Opus,
    Mp3,
}

impl AudioCodec {
    /// FFmpeg encoder name for this codec.
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Opus => "libopus",
            Self::Mp3 => "libmp3lame",
        }
    }
}

/// Encoder speed/quality tradeoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl EncoderPreset {
    /// Preset name understood by x264/x265.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }

    /// Speed level on a 0 (slowest) to 8 (fastest) scale.
    pub fn speed_level(&self) -> u8 {
        match self {
            Self::Veryslow => 0,
            Self::Slower => 1,
            Self::Slow => 2,
            Self::Medium => 3,
            Self::Fast => 4,
            Self::Faster => 5,
            Self::Veryfast => 6,
            Self::Superfast => 7,
            Self::Ultrafast => 8,
        }
    }
}

/// Corner or center placement of a watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

/// Watermark overlay spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkSpec {
    /// Location of the overlay image.
    pub image_url: String,
    #[serde(default)]
    pub position: WatermarkPosition,
    /// Opacity from 0.0 to 1.0.
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Overlay width as a fraction of the image's own width.
    #[serde(default = "default_scale")]
    pub scale: f32,
}

/// Encoding options shared by every quality of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscodingOptions {
    pub codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Audio bitrate in kbps.
    pub audio_bitrate: u32,
    pub preset: EncoderPreset,
    pub two_pass: bool,
    pub generate_thumbnails: bool,
    pub generate_preview: bool,
    pub generate_manifest: bool,
    pub watermark: Option<WatermarkSpec>,
}

impl Default for TranscodingOptions {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            audio_bitrate: 128,
            preset: EncoderPreset::Medium,
            two_pass: false,
            generate_thumbnails: true,
            generate_preview: false,
            generate_manifest: false,
            watermark: None,
        }
    }
}

/// A job submission as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub video_id: String,
    pub input_url: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub qualities: Vec<QualityRequest>,
    #[serde(default)]
    pub options: TranscodingOptions,
}

/// Lifecycle state of a transcoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not yet picked up by its strategy.
    Queued,
    /// Being driven by its strategy.
    Processing,
    /// All outputs produced.
    Completed,
    /// Terminated with an error.
    Failed,
}

impl JobStatus {
    /// Returns true for completed and failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A transcoding job and its persisted row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodingJob {
    /// Unique identifier generated at submission.
    pub id: String,

    /// Owning video.
    pub video_id: String,

    /// Source locator.
    pub input_url: String,

    pub output_format: OutputFormat,

    /// Requested qualities in request order.
    pub qualities: Vec<Quality>,

    pub options: TranscodingOptions,

    /// Strategy selected for this job.
    pub strategy: Option<StrategyKind>,

    pub status: JobStatus,

    /// Progress percentage (0-100).
    pub progress: u8,

    /// Label of the quality currently being produced.
    pub current_quality: Option<String>,

    /// Failure reason.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TranscodingJob {
    /// Creates a queued job with a fresh id.
    pub fn new(
        video_id: String,
        input_url: String,
        output_format: OutputFormat,
        qualities: Vec<Quality>,
        options: TranscodingOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            video_id,
            input_url,
            output_format,
            qualities,
            options,
            strategy: None,
            status: JobStatus::Queued,
            progress: 0,
            current_quality: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns true if segmented output with a master manifest is wanted.
    pub fn wants_manifest(&self) -> bool {
        self.output_format == OutputFormat::Manifest || self.options.generate_manifest
    }

    /// Moves a queued job into processing.
    pub fn start(&mut self) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Processing;
            self.updated_at = Utc::now();
        }
    }

    /// Applies a progress report. Progress never decreases.
    ///
    /// Returns false if the job is already terminal.
    pub fn update_progress(&mut self, percent: u8, current_quality: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.start();
        self.progress = self.progress.max(percent.min(100));
        if current_quality.is_some() {
            self.current_quality = current_quality;
        }
        self.updated_at = Utc::now();
        true
    }

    /// Marks the job as completed.
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.current_quality = None;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    /// Marks the job as failed.
    pub fn fail(&mut self, error: String) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    /// Status view exposed to callers.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status,
            progress: self.progress,
            current_quality: self.current_quality.clone(),
            error: self.error.clone(),
        }
    }
}

/// Caller-facing job status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A produced output as reported by a remote service or worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRecord {
    pub quality: String,
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub file_size: u64,
}

impl VariantRecord {
    /// Converts into a variant row for the given video.
    pub fn into_variant(self, video_id: &str) -> QualityVariant {
        QualityVariant::new(
            video_id,
            self.quality,
            self.width,
            self.height,
            self.bitrate,
            self.file_size,
            self.url,
        )
    }
}

/// One row per (video id, quality label).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityVariant {
    pub video_id: String,
    pub quality: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub file_size: u64,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QualityVariant {
    pub fn new(
        video_id: &str,
        quality: String,
        width: u32,
        height: u32,
        bitrate: u32,
        file_size: u64,
        url: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            video_id: video_id.to_string(),
            quality,
            width,
            height,
            bitrate,
            file_size,
            url,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a variant row from a locally produced quality.
    pub fn from_quality(video_id: &str, quality: &Quality, file_size: u64, url: String) -> Self {
        Self::new(
            video_id,
            quality.label.clone(),
            quality.width,
            quality.height,
            quality.bitrate,
            file_size,
            url,
        )
    }
}

/// Processing status of the owning video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    Failed,
}

/// The fields of the owning video touched by this subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub status: VideoStatus,
    pub thumbnails: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub preview_url: Option<String>,
    pub manifest_url: Option<String>,
    pub format: Option<OutputFormat>,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Media artifacts attached to the video on completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoArtifacts {
    pub thumbnails: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub preview_url: Option<String>,
    pub manifest_url: Option<String>,
    pub format: Option<OutputFormat>,
}

/// A partial update of a video row. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoUpdate {
    pub status: Option<VideoStatus>,
    pub error: Option<String>,
    pub artifacts: Option<VideoArtifacts>,
}

impl VideoUpdate {
    pub fn processing() -> Self {
        Self {
            status: Some(VideoStatus::Processing),
            ..Default::default()
        }
    }

    pub fn ready(artifacts: VideoArtifacts) -> Self {
        Self {
            status: Some(VideoStatus::Ready),
            error: None,
            artifacts: Some(artifacts),
        }
    }

    pub fn failed(reason: String) -> Self {
        Self {
            status: Some(VideoStatus::Failed),
            error: Some(reason),
            artifacts: None,
        }
    }

    /// Applies this update to a video row.
    ///
    /// Moving out of `Failed` clears the previous failure reason.
    pub fn apply(self, video: &mut VideoRecord) {
        if let Some(status) = self.status {
            video.status = status;
            if status != VideoStatus::Failed {
                video.error = None;
            }
        }
        if let Some(error) = self.error {
            video.error = Some(error);
        }
        if let Some(artifacts) = self.artifacts {
            if !artifacts.thumbnails.is_empty() {
                video.thumbnails = artifacts.thumbnails;
            }
            if artifacts.thumbnail_url.is_some() {
                video.thumbnail_url = artifacts.thumbnail_url;
            }
            if artifacts.preview_url.is_some() {
                video.preview_url = artifacts.preview_url;
            }
            if artifacts.manifest_url.is_some() {
                video.manifest_url = artifacts.manifest_url;
            }
            if artifacts.format.is_some() {
                video.format = artifacts.format;
            }
        }
        video.updated_at = Some(Utc::now());
    }
}

fn default_opacity() -> f32 {
    0.7
}

fn default_scale() -> f32 {
    1.0
}
