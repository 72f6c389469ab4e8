//! Managed cloud video service strategy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Completion, ExecutionStrategy, JobContext, ProgressBand, StrategyKind};
use crate::config::model::CloudConfig;
use crate::error::StrategyError;
use crate::job::model::{TranscodingJob, VariantRecord, VideoArtifacts, WatermarkSpec};

/// Correlation data attached to the remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationMetadata {
    pub job_id: String,
    pub video_id: String,
}

/// Create/copy request sent to the managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    pub source_url: String,
    pub correlation_metadata: CorrelationMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_asset_id: Option<String>,
}

/// Remote job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Processing,
    Ready,
    Error,
}

/// Status of a remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub state: RemoteState,
    #[serde(default)]
    pub percent_complete: f32,
    #[serde(default)]
    pub error_reason: Option<String>,
}

/// Outputs of a finished remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResult {
    #[serde(default)]
    pub variants: Vec<VariantRecord>,
    #[serde(default)]
    pub manifest_url: Option<String>,
}

/// Client for the managed video service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudVideoService: Send + Sync {
    /// Uploads a watermark profile and returns its asset id.
    async fn register_watermark(&self, watermark: &WatermarkSpec) -> Result<String, StrategyError>;

    /// Starts a remote job and returns its remote id.
    async fn create_copy(&self, request: &CopyRequest) -> Result<String, StrategyError>;

    async fn status(&self, remote_id: &str) -> Result<RemoteStatus, StrategyError>;

    async fn result(&self, remote_id: &str) -> Result<RemoteResult, StrategyError>;
}

/// HTTP client for the managed video service.
pub struct HttpCloudVideoService {
    client: reqwest::Client,
    /// `{api_base}/accounts/{account_id}`
    account_url: String,
    api_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCopyResponse {
    remote_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkResponse {
    asset_id: String,
}

impl HttpCloudVideoService {
    pub fn new(config: &CloudConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_url: format!(
                "{}/accounts/{}",
                config.api_base.trim_end_matches('/'),
                config.account_id
            ),
            api_token: config.api_token.clone(),
        }
    }

    async fn reject(response: reqwest::Response) -> StrategyError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        StrategyError::Dispatch(format!("HTTP {}: {}", status, body))
    }
}

#[async_trait]
impl CloudVideoService for HttpCloudVideoService {
    async fn register_watermark(&self, watermark: &WatermarkSpec) -> Result<String, StrategyError> {
        let response = self
            .client
            .post(format!("{}/watermarks", self.account_url))
            .bearer_auth(&self.api_token)
            .json(watermark)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        Ok(response.json::<WatermarkResponse>().await?.asset_id)
    }

    async fn create_copy(&self, request: &CopyRequest) -> Result<String, StrategyError> {
        let response = self
            .client
            .post(format!("{}/videos/copy", self.account_url))
            .bearer_auth(&self.api_token)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        Ok(response.json::<CreateCopyResponse>().await?.remote_id)
    }

    async fn status(&self, remote_id: &str) -> Result<RemoteStatus, StrategyError> {
        let status = self
            .client
            .get(format!("{}/videos/{}/status", self.account_url, remote_id))
            .bearer_auth(&self.api_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status)
    }

    async fn result(&self, remote_id: &str) -> Result<RemoteResult, StrategyError> {
        let result = self
            .client
            .get(format!("{}/videos/{}/result", self.account_url, remote_id))
            .bearer_auth(&self.api_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }
}

/// Delegates a job to the managed service and polls it to completion.
pub struct CloudStrategy {
    service: Arc<dyn CloudVideoService>,
    poll_interval: Duration,
    max_poll_attempts: u32,
    band: ProgressBand,
}

impl CloudStrategy {
    pub fn new(
        service: Arc<dyn CloudVideoService>,
        poll_interval: Duration,
        max_poll_attempts: u32,
        band: ProgressBand,
    ) -> Self {
        Self {
            service,
            poll_interval,
            max_poll_attempts,
            band,
        }
    }

    /// Polls until the remote job is ready, errors, or the ceiling is hit.
    async fn wait_until_ready(
        &self,
        job: &TranscodingJob,
        remote_id: &str,
        ctx: &JobContext,
    ) -> Result<(), StrategyError> {
        for attempt in 1..=self.max_poll_attempts {
            ctx.check_cancelled()?;

            match self.service.status(remote_id).await {
                Ok(status) => match status.state {
                    RemoteState::Ready => return Ok(()),
                    RemoteState::Error => {
                        return Err(StrategyError::Remote {
                            reason: status
                                .error_reason
                                .unwrap_or_else(|| "Remote transcoding failed".to_string()),
                        });
                    }
                    RemoteState::Processing => {
                        debug!(job_id = %job.id, attempt, percent = status.percent_complete, "Remote job processing");
                        ctx.report_progress(&job.id, self.band.at_percent(status.percent_complete), None)
                            .await;
                    }
                },
                Err(e) => {
                    warn!(job_id = %job.id, attempt, error = %e, "Status poll failed");
                }
            }

            if attempt < self.max_poll_attempts {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(StrategyError::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        Err(StrategyError::Timeout {
            attempts: self.max_poll_attempts,
        })
    }
}

#[async_trait]
impl ExecutionStrategy for CloudStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Cloud
    }

    async fn execute(
        &self,
        job: &TranscodingJob,
        ctx: &JobContext,
    ) -> Result<Completion, StrategyError> {
        let watermark_asset_id = match &job.options.watermark {
            Some(watermark) => Some(self.service.register_watermark(watermark).await?),
            None => None,
        };

        let request = CopyRequest {
            source_url: job.input_url.clone(),
            correlation_metadata: CorrelationMetadata {
                job_id: job.id.clone(),
                video_id: job.video_id.clone(),
            },
            watermark_asset_id,
        };
        let remote_id = self.service.create_copy(&request).await.map_err(|e| match e {
            StrategyError::Http(e) => StrategyError::Dispatch(e.to_string()),
            other => other,
        })?;
        info!(job_id = %job.id, remote_id = %remote_id, "Remote job created");
        ctx.report_progress(&job.id, self.band.start, None).await;

        self.wait_until_ready(job, &remote_id, ctx).await?;

        let result = self.service.result(&remote_id).await?;
        for record in result.variants {
            ctx.store
                .upsert_variant(&record.into_variant(&job.video_id))
                .await?;
        }
        ctx.report_progress(&job.id, self.band.end, None).await;

        Ok(Completion::Finished(VideoArtifacts {
            manifest_url: result.manifest_url,
            format: Some(job.output_format),
            ..Default::default()
        }))
    }
}
