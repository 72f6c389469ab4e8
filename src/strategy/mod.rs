//! Execution strategies that drive a job to a terminal state.

pub mod cloud;
pub mod edge;
pub mod local;
pub mod selector;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::StrategyError;
use crate::job::model::{TranscodingJob, VideoArtifacts};
use crate::job::JobRegistry;
use crate::store::RecordStore;

pub use cloud::CloudStrategy;
pub use edge::EdgeStrategy;
pub use local::LocalPipeline;
pub use selector::{select_strategy, StrategyAvailability};

/// The three ways a job can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Managed cloud video service, polled for completion.
    Cloud,
    /// Remote stateless worker, reports back through webhooks.
    Edge,
    /// In-process FFmpeg pipeline.
    Local,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Edge => "edge",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a strategy hands the job back once `execute` returns.
#[derive(Debug)]
pub enum Completion {
    /// All outputs exist; the job can be marked completed.
    Finished(VideoArtifacts),
    /// A remote party will report the outcome through webhook ingest.
    AwaitingCallbacks,
}

/// Everything a strategy may touch while driving one job.
#[derive(Clone)]
pub struct JobContext {
    pub registry: Arc<JobRegistry>,
    pub store: Arc<dyn RecordStore>,
    pub cancel: CancellationToken,
}

impl JobContext {
    /// Reports progress. Persistence failures are logged, not propagated.
    pub async fn report_progress(&self, job_id: &str, percent: u8, current_quality: Option<&str>) {
        if let Err(e) = self
            .registry
            .on_progress(job_id, percent, current_quality.map(str::to_string))
            .await
        {
            warn!(job_id, error = %e, "Failed to persist progress");
        }
    }

    /// Fails fast if the job was cancelled.
    pub fn check_cancelled(&self) -> Result<(), StrategyError> {
        if self.cancel.is_cancelled() {
            Err(StrategyError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A way of executing a transcoding job.
///
/// Errors are returned, never recorded by the strategy itself; the caller
/// funnels them into a single failed transition.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(
        &self,
        job: &TranscodingJob,
        ctx: &JobContext,
    ) -> Result<Completion, StrategyError>;
}

/// A reserved slice of the 0-100 progress range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl ProgressBand {
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// Maps a fraction (0.0-1.0) of the work into this band.
    pub fn at_fraction(&self, fraction: f32) -> u8 {
        let fraction = fraction.clamp(0.0, 1.0);
        let span = f32::from(self.end.saturating_sub(self.start));
        self.start + (span * fraction).floor() as u8
    }

    /// Maps a completion percentage (0-100) into this band.
    pub fn at_percent(&self, percent: f32) -> u8 {
        self.at_fraction(percent / 100.0)
    }

    /// Progress after `done` of `total` steps.
    pub fn at_step(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.end;
        }
        self.at_fraction(done as f32 / total as f32)
    }
}
