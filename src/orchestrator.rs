//! Submission, strategy dispatch and cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{StoreError, SubmissionError, CANCELLED_REASON};
use crate::job::model::{JobSubmission, ProgressSnapshot, TranscodingJob};
use crate::job::JobRegistry;
use crate::strategy::{
    select_strategy, Completion, ExecutionStrategy, JobContext, StrategyAvailability, StrategyKind,
};
use crate::validation::{validate_submission, SubmissionPolicy};

/// Failure reason recorded when a strategy task dies without returning.
pub const ABORTED_REASON: &str = "Transcoding aborted by an internal error";

/// The strategies this process can run.
pub struct Strategies {
    pub cloud: Option<Arc<dyn ExecutionStrategy>>,
    /// The cloud service accepts watermark assets.
    pub cloud_watermarks: bool,
    pub edge: Option<Arc<dyn ExecutionStrategy>>,
    pub local: Arc<dyn ExecutionStrategy>,
}

impl Strategies {
    /// Only the local pipeline.
    pub fn local_only(local: Arc<dyn ExecutionStrategy>) -> Self {
        Self {
            cloud: None,
            cloud_watermarks: false,
            edge: None,
            local,
        }
    }

    fn availability(&self) -> StrategyAvailability {
        StrategyAvailability {
            cloud: self.cloud.is_some(),
            cloud_watermarks: self.cloud_watermarks,
            edge: self.edge.is_some(),
        }
    }

    fn get(&self, kind: StrategyKind) -> Arc<dyn ExecutionStrategy> {
        let chosen = match kind {
            StrategyKind::Cloud => self.cloud.as_ref(),
            StrategyKind::Edge => self.edge.as_ref(),
            StrategyKind::Local => None,
        };
        chosen.cloned().unwrap_or_else(|| Arc::clone(&self.local))
    }
}

/// An accepted job and the task driving it.
pub struct JobHandle {
    pub job_id: String,
    pub strategy: StrategyKind,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Waits until the strategy returns. For edge jobs this is when the
    /// dispatch is sent, not when the job is terminal.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(job_id = %self.job_id, error = %e, "Job task panicked");
        }
    }
}

/// Accepts jobs and runs each on its selected strategy.
pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    strategies: Strategies,
    policy: SubmissionPolicy,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<JobRegistry>, strategies: Strategies) -> Self {
        Self {
            registry,
            strategies,
            policy: SubmissionPolicy::default(),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_submission_policy(mut self, policy: SubmissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Validates and persists a job, then starts its strategy.
    ///
    /// Invalid submissions fail before anything is written.
    pub async fn submit(
        self: &Arc<Self>,
        submission: JobSubmission,
    ) -> Result<JobHandle, SubmissionError> {
        let qualities = validate_submission(&submission, &self.policy)?;

        let mut job = TranscodingJob::new(
            submission.video_id,
            submission.input_url,
            submission.output_format,
            qualities,
            submission.options,
        );
        let kind = select_strategy(&job, &self.strategies.availability());
        job.strategy = Some(kind);
        let strategy = self.strategies.get(kind);

        self.registry.register(job.clone()).await?;

        let cancel = CancellationToken::new();
        self.running
            .lock()
            .await
            .insert(job.id.clone(), cancel.clone());

        info!(job_id = %job.id, strategy = %kind, qualities = job.qualities.len(), "Job accepted");

        let job_id = job.id.clone();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.drive(job, strategy, cancel).await });

        Ok(JobHandle {
            job_id,
            strategy: kind,
            task,
        })
    }

    /// Runs a job's strategy and funnels the outcome into one terminal transition.
    ///
    /// The strategy runs in its own task so a panic inside it still ends in
    /// `mark_failed` and releases the running slot.
    async fn drive(
        &self,
        job: TranscodingJob,
        strategy: Arc<dyn ExecutionStrategy>,
        cancel: CancellationToken,
    ) {
        let ctx = JobContext {
            registry: Arc::clone(&self.registry),
            store: Arc::clone(self.registry.store()),
            cancel,
        };

        if let Err(e) = self.registry.mark_processing(&job.id).await {
            error!(job_id = %job.id, error = %e, "Failed to persist processing state");
        }

        let kind = strategy.kind();
        let execution = {
            let job = job.clone();
            tokio::spawn(async move { strategy.execute(&job, &ctx).await })
        };

        let transition = match execution.await {
            Ok(Ok(Completion::Finished(artifacts))) => {
                self.registry.mark_completed(&job.id, artifacts).await
            }
            Ok(Ok(Completion::AwaitingCallbacks)) => {
                info!(job_id = %job.id, strategy = %kind, "Awaiting worker callbacks");
                Ok(false)
            }
            Ok(Err(e)) => self.registry.mark_failed(&job.id, &e.failure_reason()).await,
            Err(e) => {
                error!(job_id = %job.id, strategy = %kind, error = %e, "Strategy task aborted");
                self.registry.mark_failed(&job.id, ABORTED_REASON).await
            }
        };

        if let Err(e) = transition {
            error!(job_id = %job.id, error = %e, "Failed to persist terminal state");
        }

        self.running.lock().await.remove(&job.id);
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<ProgressSnapshot>, StoreError> {
        self.registry.get_status(job_id).await
    }

    /// Cancels a job: stops its strategy and fails it.
    ///
    /// Returns false when the job is unknown or already terminal.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, StoreError> {
        if let Some(token) = self.running.lock().await.remove(job_id) {
            token.cancel();
        }
        let cancelled = self.registry.mark_failed(job_id, CANCELLED_REASON).await?;
        if cancelled {
            info!(job_id, "Job cancelled");
        }
        Ok(cancelled)
    }

    /// Number of jobs whose strategy is still executing.
    pub async fn running(&self) -> usize {
        self.running.lock().await.len()
    }
}
