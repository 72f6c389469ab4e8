//! Edge worker strategy: fire-and-forget dispatch, webhook-driven completion.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Completion, ExecutionStrategy, JobContext, StrategyKind};
use crate::config::model::EdgeConfig;
use crate::error::StrategyError;
use crate::job::model::{Quality, TranscodingJob, TranscodingOptions};

/// Path on this service that edge workers call back.
pub const WEBHOOK_PATH: &str = "/webhooks/edge";

/// Payload dispatched to the edge worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPayload {
    pub job_id: String,
    pub input_url: String,
    pub qualities: Vec<Quality>,
    pub options: TranscodingOptions,
    pub callback_url: String,
}

/// Sends dispatch requests to a remote transcoder.
#[async_trait]
pub trait EdgeDispatcher: Send + Sync {
    async fn dispatch(&self, payload: &DispatchPayload) -> Result<(), StrategyError>;
}

/// HTTP dispatcher for the edge worker.
pub struct HttpEdgeDispatcher {
    client: reqwest::Client,
    dispatch_url: String,
    api_key: Option<String>,
}

impl HttpEdgeDispatcher {
    pub fn new(config: &EdgeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            dispatch_url: config.dispatch_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl EdgeDispatcher for HttpEdgeDispatcher {
    async fn dispatch(&self, payload: &DispatchPayload) -> Result<(), StrategyError> {
        let mut request = self.client.post(&self.dispatch_url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StrategyError::Dispatch(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StrategyError::Dispatch(format!("HTTP {}: {}", status, body)));
        }
        Ok(())
    }
}

/// Hands the job to an edge worker and leaves the rest to webhook ingest.
pub struct EdgeStrategy {
    dispatcher: Arc<dyn EdgeDispatcher>,
    callback_url: String,
}

impl EdgeStrategy {
    pub fn new(dispatcher: Arc<dyn EdgeDispatcher>, callback_base_url: &str) -> Self {
        Self {
            dispatcher,
            callback_url: format!("{}{}", callback_base_url.trim_end_matches('/'), WEBHOOK_PATH),
        }
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }
}

#[async_trait]
impl ExecutionStrategy for EdgeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Edge
    }

    async fn execute(
        &self,
        job: &TranscodingJob,
        ctx: &JobContext,
    ) -> Result<Completion, StrategyError> {
        ctx.check_cancelled()?;

        let payload = DispatchPayload {
            job_id: job.id.clone(),
            input_url: job.input_url.clone(),
            qualities: job.qualities.clone(),
            options: job.options.clone(),
            callback_url: self.callback_url.clone(),
        };
        self.dispatcher.dispatch(&payload).await?;

        info!(job_id = %job.id, "Dispatched to edge worker");
        Ok(Completion::AwaitingCallbacks)
    }
}
