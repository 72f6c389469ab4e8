//! Jobs delegated to the managed cloud service or an edge worker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use transcode_orchestrator::error::StrategyError;
use transcode_orchestrator::ingest::{WebhookIngest, WebhookOutcome, WebhookPayload};
use transcode_orchestrator::job::model::{
    JobStatus, JobSubmission, OutputFormat, QualityRequest, TranscodingJob, TranscodingOptions,
    VariantRecord, VideoStatus, WatermarkSpec,
};
use transcode_orchestrator::job::JobRegistry;
use transcode_orchestrator::orchestrator::{Orchestrator, Strategies};
use transcode_orchestrator::store::{MemoryStore, RecordStore};
use transcode_orchestrator::strategy::cloud::{
    CloudVideoService, CopyRequest, RemoteResult, RemoteState, RemoteStatus,
};
use transcode_orchestrator::strategy::edge::{DispatchPayload, EdgeDispatcher};
use transcode_orchestrator::strategy::{
    CloudStrategy, Completion, EdgeStrategy, ExecutionStrategy, JobContext, ProgressBand,
    StrategyKind,
};

/// Replays scripted status responses; the last one repeats.
struct ScriptedCloud {
    statuses: Mutex<VecDeque<RemoteStatus>>,
    result: RemoteResult,
    requests: Mutex<Vec<CopyRequest>>,
}

impl ScriptedCloud {
    fn new(statuses: Vec<RemoteStatus>, result: RemoteResult) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            result,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CloudVideoService for ScriptedCloud {
    async fn register_watermark(&self, _watermark: &WatermarkSpec) -> Result<String, StrategyError> {
        Ok("wm-1".to_string())
    }

    async fn create_copy(&self, request: &CopyRequest) -> Result<String, StrategyError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok("remote-1".to_string())
    }

    async fn status(&self, _remote_id: &str) -> Result<RemoteStatus, StrategyError> {
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        next.ok_or_else(|| StrategyError::Dispatch("no scripted status".to_string()))
    }

    async fn result(&self, _remote_id: &str) -> Result<RemoteResult, StrategyError> {
        Ok(self.result.clone())
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<DispatchPayload>>,
}

#[async_trait]
impl EdgeDispatcher for RecordingDispatcher {
    async fn dispatch(&self, payload: &DispatchPayload) -> Result<(), StrategyError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Never runs; remote tests must not fall back to local encoding.
struct UnreachableLocal;

#[async_trait]
impl ExecutionStrategy for UnreachableLocal {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Local
    }

    async fn execute(
        &self,
        _job: &TranscodingJob,
        _ctx: &JobContext,
    ) -> Result<Completion, StrategyError> {
        Err(StrategyError::Dispatch("local pipeline should not run".to_string()))
    }
}

fn processing(percent: f32) -> RemoteStatus {
    RemoteStatus {
        state: RemoteState::Processing,
        percent_complete: percent,
        error_reason: None,
    }
}

fn submission(format: OutputFormat) -> JobSubmission {
    JobSubmission {
        video_id: "video-9".to_string(),
        input_url: "https://uploads.example.com/raw.mov".to_string(),
        output_format: format,
        qualities: vec![
            QualityRequest::Preset("480p".to_string()),
            QualityRequest::Preset("1080p".to_string()),
        ],
        options: TranscodingOptions::default(),
    }
}

struct Remote {
    store: Arc<MemoryStore>,
    registry: Arc<JobRegistry>,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Arc<RecordingDispatcher>,
}

fn remote(cloud: Arc<ScriptedCloud>) -> Remote {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(JobRegistry::new(store.clone()));
    let dispatcher = Arc::new(RecordingDispatcher::default());

    let strategies = Strategies {
        cloud: Some(Arc::new(CloudStrategy::new(
            cloud,
            Duration::from_millis(1),
            10,
            ProgressBand::new(10, 90),
        ))),
        cloud_watermarks: false,
        edge: Some(Arc::new(EdgeStrategy::new(
            dispatcher.clone(),
            "https://api.example.com/",
        ))),
        local: Arc::new(UnreachableLocal),
    };

    Remote {
        orchestrator: Arc::new(Orchestrator::new(Arc::clone(&registry), strategies)),
        store,
        registry,
        dispatcher,
    }
}

#[tokio::test]
async fn remote_error_fails_the_job_with_its_reason() {
    let cloud = Arc::new(ScriptedCloud::new(
        vec![
            processing(50.0),
            RemoteStatus {
                state: RemoteState::Error,
                percent_complete: 50.0,
                error_reason: Some("unsupported codec".to_string()),
            },
        ],
        RemoteResult {
            variants: Vec::new(),
            manifest_url: None,
        },
    ));
    let r = remote(cloud.clone());

    let handle = r
        .orchestrator
        .submit(submission(OutputFormat::Manifest))
        .await
        .unwrap();
    assert_eq!(handle.strategy, StrategyKind::Cloud);
    let job_id = handle.job_id.clone();
    handle.join().await;

    let job = r.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("unsupported codec"));
    assert_eq!(job.progress, 50);
    assert!(r.store.list_variants("video-9").await.unwrap().is_empty());

    let video = r.store.get_video("video-9").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Failed);

    let requests = cloud.requests.lock().unwrap();
    assert_eq!(requests[0].correlation_metadata.job_id, job_id);
    assert_eq!(requests[0].source_url, "https://uploads.example.com/raw.mov");
}

#[tokio::test]
async fn ready_remote_job_records_variants_and_manifest() {
    let cloud = Arc::new(ScriptedCloud::new(
        vec![
            processing(20.0),
            processing(80.0),
            RemoteStatus {
                state: RemoteState::Ready,
                percent_complete: 100.0,
                error_reason: None,
            },
        ],
        RemoteResult {
            variants: vec![VariantRecord {
                quality: "1080p".to_string(),
                url: "https://stream.example.com/remote-1/1080p.mp4".to_string(),
                width: 1920,
                height: 1080,
                bitrate: 5000,
                file_size: 42,
            }],
            manifest_url: Some("https://stream.example.com/remote-1/manifest.m3u8".to_string()),
        },
    ));
    let r = remote(cloud);

    let handle = r
        .orchestrator
        .submit(submission(OutputFormat::Manifest))
        .await
        .unwrap();
    let job_id = handle.job_id.clone();
    handle.join().await;

    let status = r.orchestrator.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 100);

    let variants = r.store.list_variants("video-9").await.unwrap();
    assert_eq!(variants.len(), 1);
    assert_eq!(variants[0].file_size, 42);

    let video = r.store.get_video("video-9").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Ready);
    assert_eq!(
        video.manifest_url.as_deref(),
        Some("https://stream.example.com/remote-1/manifest.m3u8")
    );
}

#[tokio::test]
async fn edge_job_is_driven_by_webhooks() {
    let cloud = Arc::new(ScriptedCloud::new(vec![processing(0.0)], RemoteResult {
        variants: Vec::new(),
        manifest_url: None,
    }));
    let r = remote(cloud);
    let ingest = WebhookIngest::new(Arc::clone(&r.registry));

    let handle = r
        .orchestrator
        .submit(submission(OutputFormat::Single))
        .await
        .unwrap();
    assert_eq!(handle.strategy, StrategyKind::Edge);
    let job_id = handle.job_id.clone();
    handle.join().await;

    {
        let sent = r.dispatcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].job_id, job_id);
        assert_eq!(sent[0].callback_url, "https://api.example.com/webhooks/edge");
        assert_eq!(sent[0].qualities.len(), 2);
    }
    let status = r.orchestrator.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Processing);

    let event = |json: serde_json::Value| -> WebhookPayload { serde_json::from_value(json).unwrap() };

    let outcome = ingest
        .on_webhook_event(event(serde_json::json!({
            "jobId": job_id,
            "status": "progress",
            "progress": 40,
            "currentQuality": "480p"
        })))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);
    let status = r.orchestrator.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.progress, 40);
    assert_eq!(status.current_quality.as_deref(), Some("480p"));

    let outcome = ingest
        .on_webhook_event(event(serde_json::json!({
            "jobId": job_id,
            "status": "completed",
            "files": [
                {"quality": "480p", "url": "https://edge.example.com/480p.mp4", "width": 854, "height": 480, "bitrate": 1400, "fileSize": 10},
                {"quality": "1080p", "url": "https://edge.example.com/1080p.mp4", "width": 1920, "height": 1080, "bitrate": 5000, "fileSize": 30}
            ]
        })))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let late = ingest
        .on_webhook_event(event(serde_json::json!({
            "jobId": job_id,
            "status": "failed",
            "error": "worker crashed"
        })))
        .await
        .unwrap();
    assert_eq!(late, WebhookOutcome::Ignored);

    let job = r.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());
    assert_eq!(r.store.list_variants("video-9").await.unwrap().len(), 2);
}

#[tokio::test]
async fn cancelled_edge_job_ignores_later_callbacks() {
    let cloud = Arc::new(ScriptedCloud::new(vec![processing(0.0)], RemoteResult {
        variants: Vec::new(),
        manifest_url: None,
    }));
    let r = remote(cloud);
    let ingest = WebhookIngest::new(Arc::clone(&r.registry));

    let handle = r
        .orchestrator
        .submit(submission(OutputFormat::Single))
        .await
        .unwrap();
    let job_id = handle.job_id.clone();
    handle.join().await;

    assert!(r.orchestrator.cancel(&job_id).await.unwrap());

    let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
        "jobId": job_id,
        "status": "completed",
        "files": [{"quality": "480p", "url": "https://edge.example.com/480p.mp4"}]
    }))
    .unwrap();
    assert_eq!(
        ingest.on_webhook_event(payload).await.unwrap(),
        WebhookOutcome::Ignored
    );
    assert!(r.store.list_variants("video-9").await.unwrap().is_empty());

    let video = r.store.get_video("video-9").await.unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Failed);
}
