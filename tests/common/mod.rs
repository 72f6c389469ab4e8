//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use transcode_orchestrator::config::model::PipelineConfig;
use transcode_orchestrator::encoder::{EncoderRunner, FfmpegCommand};
use transcode_orchestrator::error::EncoderError;
use transcode_orchestrator::job::model::{
    JobSubmission, OutputFormat, QualityRequest, TranscodingOptions,
};
use transcode_orchestrator::job::JobRegistry;
use transcode_orchestrator::media::FsObjectStore;
use transcode_orchestrator::orchestrator::{Orchestrator, Strategies};
use transcode_orchestrator::store::MemoryStore;
use transcode_orchestrator::strategy::{ExecutionStrategy, LocalPipeline};
use transcode_orchestrator::validation::SubmissionPolicy;

pub const PUBLIC_BASE: &str = "https://cdn.example.com";

/// Stands in for ffmpeg: writes a placeholder for each output.
///
/// Outputs whose path contains `fail_on` fail with a conversion error.
/// Outputs whose path contains `park_on` wait for cancellation.
#[derive(Default)]
pub struct FakeEncoder {
    pub fail_on: Option<String>,
    pub park_on: Option<String>,
    pub parked: Notify,
    pub outputs: Mutex<Vec<PathBuf>>,
}

impl FakeEncoder {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_string()),
            ..Default::default()
        }
    }

    pub fn parking_on(needle: &str) -> Self {
        Self {
            park_on: Some(needle.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EncoderRunner for FakeEncoder {
    async fn run(
        &self,
        command: &FfmpegCommand,
        cancel: &CancellationToken,
    ) -> Result<(), EncoderError> {
        let Some(output) = command.output_path() else {
            return Ok(());
        };
        let path = output.to_string_lossy().into_owned();

        if self.park_on.as_deref().is_some_and(|n| path.contains(n)) {
            self.parked.notify_one();
            cancel.cancelled().await;
            return Err(EncoderError::Cancelled);
        }
        if self.fail_on.as_deref().is_some_and(|n| path.contains(n)) {
            return Err(EncoderError::FfmpegFailed {
                code: 1,
                stderr: "Conversion failed!".to_string(),
            });
        }

        tokio::fs::write(output, b"encoded").await.unwrap();
        if output.extension().is_some_and(|ext| ext == "m3u8") {
            tokio::fs::write(output.with_file_name("segment_000.ts"), b"ts")
                .await
                .unwrap();
        }
        self.outputs.lock().unwrap().push(output.to_path_buf());
        Ok(())
    }
}

/// A local-only orchestrator over temp directories and an in-memory store.
pub struct Harness {
    _dirs: (TempDir, TempDir, TempDir),
    pub input_url: String,
    pub scratch: PathBuf,
    pub output_root: PathBuf,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<JobRegistry>,
    pub local: Arc<dyn ExecutionStrategy>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub async fn new(encoder: Arc<FakeEncoder>) -> Self {
        Self::with_config(encoder, PipelineConfig::default()).await
    }

    pub async fn with_config(encoder: Arc<FakeEncoder>, config: PipelineConfig) -> Self {
        let inputs = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let outputs = TempDir::new().unwrap();

        let source = inputs.path().join("upload.mov");
        tokio::fs::write(&source, b"raw upload").await.unwrap();
        let input_url = url::Url::from_file_path(&source).unwrap().to_string();

        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(JobRegistry::new(store.clone()));
        let objects = Arc::new(FsObjectStore::new(outputs.path(), PUBLIC_BASE));
        let local: Arc<dyn ExecutionStrategy> = Arc::new(LocalPipeline::new(
            encoder,
            objects,
            config,
            scratch.path(),
        ));
        let orchestrator = Arc::new(
            Orchestrator::new(Arc::clone(&registry), Strategies::local_only(Arc::clone(&local)))
                .with_submission_policy(SubmissionPolicy {
                    allow_file_sources: true,
                }),
        );

        Self {
            input_url,
            scratch: scratch.path().to_path_buf(),
            output_root: outputs.path().to_path_buf(),
            _dirs: (inputs, scratch, outputs),
            store,
            registry,
            local,
            orchestrator,
        }
    }

    pub fn submission(&self, qualities: &[&str], format: OutputFormat) -> JobSubmission {
        JobSubmission {
            video_id: "video-42".to_string(),
            input_url: self.input_url.clone(),
            output_format: format,
            qualities: qualities
                .iter()
                .map(|q| QualityRequest::Preset(q.to_string()))
                .collect(),
            options: TranscodingOptions {
                generate_thumbnails: false,
                ..Default::default()
            },
        }
    }
}
