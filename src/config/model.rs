//! Configuration data structures.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::strategy::ProgressBand;

/// Root configuration structure containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Global application settings.
    #[serde(default)]
    pub global: GlobalConfig,

    /// Where encoded outputs are published.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Local encode pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Managed cloud video service. Absent means the strategy is unavailable.
    #[serde(default)]
    pub cloud: Option<CloudConfig>,

    /// Edge transcoding worker. Absent means the strategy is unavailable.
    #[serde(default)]
    pub edge: Option<EdgeConfig>,
}

/// Global application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root for job-scoped scratch directories.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Durable job/variant/video records.
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP listener for submissions, status and webhooks.
    #[serde(default)]
    pub server: ServerConfig,

    /// Prometheus metrics settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Record store backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process maps. Records do not survive a restart.
    #[default]
    Memory,
    /// Redis server.
    Redis(RedisConfig),
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis server hostname.
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis server port.
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis database number.
    #[serde(default)]
    pub db: u8,

    /// Optional Redis password.
    #[serde(default)]
    pub password: Option<String>,
}

impl RedisConfig {
    /// Connection URL in `redis://` form.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Whether to expose `/metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Output publishing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that published objects are written under.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Public URL prefix that maps onto `output_root`.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

/// Local encode pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// FFmpeg binary name or path.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// FFprobe binary name or path, used to inspect sources.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Accept `file://` input and watermark URLs. Off unless the caller is trusted.
    #[serde(default)]
    pub allow_file_sources: bool,

    /// Handling of requested qualities taller than the source.
    #[serde(default)]
    pub upscale: UpscalePolicy,

    /// Progress range covered by the per-quality encode loop.
    #[serde(default = "default_rendition_band")]
    pub rendition_band: ProgressBand,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub preview: PreviewConfig,

    /// HLS segment length in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_seconds: u32,

    /// What happens to already uploaded variants when a later step fails.
    #[serde(default)]
    pub partial_variants: PartialVariantPolicy,
}

/// Thumbnail extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Timestamps, in seconds, at which frames are extracted.
    #[serde(default = "default_thumbnail_offsets")]
    pub offsets_seconds: Vec<f64>,

    /// Output width; height follows the aspect ratio.
    #[serde(default = "default_thumbnail_width")]
    pub width: u32,

    /// Index into `offsets_seconds` of the primary thumbnail.
    #[serde(default)]
    pub primary_index: usize,
}

/// Preview clip settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_start")]
    pub start_seconds: f64,

    #[serde(default = "default_preview_duration")]
    pub duration_seconds: f64,

    #[serde(default = "default_preview_width")]
    pub width: u32,

    #[serde(default = "default_preview_height")]
    pub height: u32,

    /// Video bitrate in kbps.
    #[serde(default = "default_preview_bitrate")]
    pub bitrate: u32,
}

/// Handling of variants uploaded before a local pipeline failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PartialVariantPolicy {
    /// Leave them published.
    #[default]
    Keep,
    /// Delete their rows and objects.
    Rollback,
}

/// Handling of renditions that would upscale the source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpscalePolicy {
    /// Encode every requested quality.
    Allow,
    /// Drop qualities taller than the source, keeping at least the smallest.
    #[default]
    Skip,
    /// Fail the job.
    Reject,
}

/// Managed cloud video service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// API base URL.
    pub api_base: String,

    /// Account identifier.
    pub account_id: String,

    /// Bearer token.
    pub api_token: String,

    /// Seconds between status polls.
    #[serde(default = "default_cloud_poll_interval")]
    pub poll_interval_seconds: f64,

    /// Status polls before the job is failed as timed out.
    #[serde(default = "default_cloud_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Progress range covered by remote processing.
    #[serde(default = "default_cloud_band")]
    pub progress_band: ProgressBand,

    /// The service accepts watermark assets.
    #[serde(default)]
    pub supports_watermarks: bool,
}

/// Edge transcoding worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Where dispatch requests are posted.
    pub dispatch_url: String,

    /// Public base URL of this service, used to build the callback address.
    pub callback_base_url: String,

    /// Optional bearer token for dispatch requests.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Shared secret for webhook signatures.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/transcode")
}

fn default_redis_host() -> String {
    "redis".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_output_root() -> PathBuf {
    PathBuf::from("/data/media")
}

fn default_public_base_url() -> String {
    "http://localhost:8080/media".to_string()
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_rendition_band() -> ProgressBand {
    ProgressBand::new(10, 70)
}

fn default_segment_duration() -> u32 {
    6
}

fn default_thumbnail_offsets() -> Vec<f64> {
    vec![1.0, 5.0, 10.0]
}

fn default_thumbnail_width() -> u32 {
    320
}

fn default_preview_start() -> f64 {
    5.0
}

fn default_preview_duration() -> f64 {
    10.0
}

fn default_preview_width() -> u32 {
    640
}

fn default_preview_height() -> u32 {
    360
}

fn default_preview_bitrate() -> u32 {
    500
}

fn default_cloud_poll_interval() -> f64 {
    5.0
}

fn default_cloud_poll_attempts() -> u32 {
    120
}

fn default_cloud_band() -> ProgressBand {
    ProgressBand::new(10, 90)
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            temp_dir: default_temp_dir(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            prometheus: PrometheusConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            allow_file_sources: false,
            upscale: UpscalePolicy::default(),
            rendition_band: default_rendition_band(),
            thumbnails: ThumbnailConfig::default(),
            preview: PreviewConfig::default(),
            segment_duration_seconds: default_segment_duration(),
            partial_variants: PartialVariantPolicy::default(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            offsets_seconds: default_thumbnail_offsets(),
            width: default_thumbnail_width(),
            primary_index: 0,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            start_seconds: default_preview_start(),
            duration_seconds: default_preview_duration(),
            width: default_preview_width(),
            height: default_preview_height(),
            bitrate: default_preview_bitrate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert!(matches!(config.global.store, StoreConfig::Memory));
        assert_eq!(config.pipeline.segment_duration_seconds, 6);
        assert_eq!(config.pipeline.thumbnails.offsets_seconds, vec![1.0, 5.0, 10.0]);
        assert_eq!(config.pipeline.partial_variants, PartialVariantPolicy::Keep);
        assert!(!config.pipeline.allow_file_sources);
        assert_eq!(config.pipeline.upscale, UpscalePolicy::Skip);
        assert!(config.cloud.is_none());
        assert!(config.edge.is_none());
    }

    #[test]
    fn parses_optional_sections() {
        let yaml = r#"
global:
  store:
    backend: redis
    host: cache
    password: hunter2
pipeline:
  partial_variants: rollback
  allow_file_sources: true
  upscale: reject
cloud:
  api_base: https://api.video.example.com
  account_id: acct-1
  api_token: secret
  max_poll_attempts: 3
edge:
  dispatch_url: https://edge.example.com/transcode
  callback_base_url: https://api.example.com
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        match &config.global.store {
            StoreConfig::Redis(redis) => {
                assert_eq!(redis.url(), "redis://:hunter2@cache:6379/0");
            }
            other => panic!("unexpected store {:?}", other),
        }
        assert_eq!(config.pipeline.partial_variants, PartialVariantPolicy::Rollback);
        assert!(config.pipeline.allow_file_sources);
        assert_eq!(config.pipeline.upscale, UpscalePolicy::Reject);

        let cloud = config.cloud.unwrap();
        assert_eq!(cloud.max_poll_attempts, 3);
        assert_eq!(cloud.progress_band, ProgressBand::new(10, 90));
        assert!(!cloud.supports_watermarks);

        let edge = config.edge.unwrap();
        assert!(edge.webhook_secret.is_none());
    }
}
