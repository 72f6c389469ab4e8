//! Webhook ingest: the only state-mutation path for edge-worker jobs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::job::model::{VariantRecord, VideoArtifacts};
use crate::job::JobRegistry;
use crate::server::metrics::Metrics;
use crate::strategy::StrategyKind;

/// Event kind reported by an edge worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Progress,
    Completed,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Body of an edge worker callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub job_id: String,
    pub status: WebhookStatus,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub current_quality: Option<String>,
    #[serde(default)]
    pub files: Vec<VariantRecord>,
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// Unknown, terminal, or not an edge job; nothing changed.
    Ignored,
}

/// Applies edge worker events to the registry.
///
/// Per-job state lives in the registry entries, so events for different
/// jobs can be applied concurrently.
pub struct WebhookIngest {
    registry: Arc<JobRegistry>,
    metrics: Option<Arc<Metrics>>,
}

impl WebhookIngest {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self {
            registry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn on_webhook_event(
        &self,
        payload: WebhookPayload,
    ) -> Result<WebhookOutcome, StoreError> {
        if let Some(metrics) = &self.metrics {
            metrics.webhook_event(payload.status.as_str());
        }

        let Some(job) = self.registry.active_job(&payload.job_id).await? else {
            debug!(
                job_id = %payload.job_id,
                status = payload.status.as_str(),
                "Ignoring webhook for unknown or finished job"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        if job.strategy != Some(StrategyKind::Edge) {
            debug!(
                job_id = %job.id,
                strategy = ?job.strategy,
                status = payload.status.as_str(),
                "Ignoring webhook for a job not run by an edge worker"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        let applied = match payload.status {
            WebhookStatus::Progress => {
                self.registry.mark_processing(&job.id).await?;
                self.registry
                    .on_progress(
                        &job.id,
                        payload.progress.unwrap_or(job.progress),
                        payload.current_quality,
                    )
                    .await?
            }
            WebhookStatus::Completed => {
                let store = self.registry.store();
                for file in payload.files {
                    store.upsert_variant(&file.into_variant(&job.video_id)).await?;
                }
                let artifacts = VideoArtifacts {
                    manifest_url: payload.manifest_url,
                    format: Some(job.output_format),
                    ..Default::default()
                };
                self.registry.mark_completed(&job.id, artifacts).await?
            }
            WebhookStatus::Failed => {
                let reason = payload
                    .error
                    .unwrap_or_else(|| "Edge worker reported failure".to_string());
                self.registry.mark_failed(&job.id, &reason).await?
            }
        };

        if applied {
            info!(job_id = %job.id, status = payload.status.as_str(), "Webhook applied");
            Ok(WebhookOutcome::Applied)
        } else {
            Ok(WebhookOutcome::Ignored)
        }
    }
}
