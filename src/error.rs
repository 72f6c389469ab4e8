//! Error types for the transcoding orchestrator.

use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationIssue;

/// Failure reason recorded when a job is cancelled.
pub const CANCELLED_REASON: &str = "Cancelled by request";

/// Configuration loading and parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Config validation failed with {error_count} error(s)")]
    ValidationFailed { error_count: usize },
}

/// Job submission errors. Validation failures never create a job row.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Invalid submission: {summary}")]
    Invalid {
        summary: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("Failed to persist job: {0}")]
    Store(#[from] StoreError),
}

impl SubmissionError {
    /// Returns true if the submission was rejected by validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// Record store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to Redis at '{url}': {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Failed to serialize record: {0}")]
    SerializationFailed(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationFailed(e.to_string())
    }
}

/// Encoder subprocess errors.
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("FFmpeg failed with exit code {code}: {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Encoder was cancelled")]
    Cancelled,
}

/// Source analysis errors.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("ffprobe failed with exit code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Unreadable ffprobe output: {0}")]
    InvalidOutput(String),

    #[error("Analysis was cancelled")]
    Cancelled,
}

/// Object storage and source download errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage IO failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Download of '{url}' failed: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Unsupported source scheme '{0}'")]
    UnsupportedScheme(String),
}

/// Errors raised while a strategy drives a job.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Remote processing failed: {reason}")]
    Remote { reason: String },

    #[error("Transcoding timed out after {attempts} status polls")]
    Timeout { attempts: u32 },

    #[error("Remote service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("Source analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Quality '{label}' ({height}p) would upscale the {source_height}p source")]
    Upscale {
        label: String,
        height: u32,
        source_height: u32,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job was cancelled")]
    Cancelled,
}

impl StrategyError {
    /// Returns the human-readable reason recorded on the failed job.
    pub fn failure_reason(&self) -> String {
        match self {
            Self::Remote { reason } => reason.clone(),
            Self::Cancelled
            | Self::Encoder(EncoderError::Cancelled)
            | Self::Analysis(AnalysisError::Cancelled) => CANCELLED_REASON.to_string(),
            Self::Encoder(EncoderError::FfmpegFailed { code, stderr }) => {
                format!("Encoder exited with code {}: {}", code, stderr.trim())
            }
            other => other.to_string(),
        }
    }
}

/// HTTP service errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {message}")]
    BindFailed { addr: String, message: String },

    #[error("Prometheus metrics failed: {0}")]
    MetricsFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_reason_is_surfaced_verbatim() {
        let err = StrategyError::Remote {
            reason: "unsupported codec".to_string(),
        };
        assert_eq!(err.failure_reason(), "unsupported codec");
    }

    #[test]
    fn timeout_reason_names_the_attempt_ceiling() {
        let err = StrategyError::Timeout { attempts: 60 };
        assert_eq!(err.failure_reason(), "Transcoding timed out after 60 status polls");
    }

    #[test]
    fn cancelled_encoder_maps_to_cancel_reason() {
        let err = StrategyError::Encoder(EncoderError::Cancelled);
        assert_eq!(err.failure_reason(), CANCELLED_REASON);
    }

    #[test]
    fn encoder_failure_includes_captured_stderr() {
        let err = StrategyError::Encoder(EncoderError::FfmpegFailed {
            code: 1,
            stderr: "Invalid argument\n".to_string(),
        });
        assert_eq!(err.failure_reason(), "Encoder exited with code 1: Invalid argument");
    }
}
