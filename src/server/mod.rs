//! HTTP surface: submissions, status, cancellation, webhooks and metrics.

pub mod metrics;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, SubmissionError};
use crate::ingest::signature::{self, SIGNATURE_HEADER};
use crate::ingest::{WebhookIngest, WebhookOutcome, WebhookPayload};
use crate::job::model::JobSubmission;
use crate::job::presets;
use crate::orchestrator::Orchestrator;
use crate::strategy::edge::WEBHOOK_PATH;

pub use metrics::Metrics;

/// Shared state behind every request.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub ingest: Arc<WebhookIngest>,
    pub metrics: Option<Arc<Metrics>>,
    /// When set, webhook bodies must carry a valid signature.
    pub webhook_secret: Option<String>,
}

type HttpResponse = Response<Full<Bytes>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Accepts connections until `shutdown` is cancelled.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::BindFailed {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;

    info!(%addr, "HTTP server listening");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => {
                accepted.map_err(|e| ServerError::Connection(e.to_string()))?
            }
            _ = shutdown.cancelled() => {
                info!("HTTP server stopping");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(route(&state, req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %e, "Error serving connection");
            }
        });
    }
}

/// Dispatches one request.
pub async fn route<B>(state: &AppState, req: Request<B>) -> HttpResponse
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => text(StatusCode::OK, "ok"),
        (&Method::GET, ["metrics"]) => metrics_text(state),
        (&Method::GET, ["presets"]) => json_response(StatusCode::OK, &presets::catalog()),
        (&Method::POST, ["jobs"]) => submit(state, req).await,
        (&Method::GET, ["jobs", job_id]) => status(state, job_id).await,
        (&Method::POST, ["jobs", job_id, "cancel"]) => cancel(state, job_id).await,
        (&Method::POST, _) if path == WEBHOOK_PATH => webhook(state, req).await,
        _ => error_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn submit<B>(state: &AppState, req: Request<B>) -> HttpResponse
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let submission: JobSubmission = match serde_json::from_slice(&body) {
        Ok(submission) => submission,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {}", e)),
    };

    match state.orchestrator.submit(submission).await {
        Ok(handle) => json_response(
            StatusCode::CREATED,
            &json!({ "jobId": handle.job_id, "strategy": handle.strategy }),
        ),
        Err(SubmissionError::Invalid { summary, issues }) => json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": summary, "issues": issues }),
        ),
        Err(e) => {
            error!(error = %e, "Submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn status(state: &AppState, job_id: &str) -> HttpResponse {
    match state.orchestrator.get_status(job_id).await {
        Ok(Some(snapshot)) => json_response(StatusCode::OK, &snapshot),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => {
            error!(job_id, error = %e, "Status lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn cancel(state: &AppState, job_id: &str) -> HttpResponse {
    match state.orchestrator.cancel(job_id).await {
        Ok(true) => json_response(StatusCode::ACCEPTED, &json!({ "jobId": job_id })),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Job not found or already finished"),
        Err(e) => {
            error!(job_id, error = %e, "Cancellation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn webhook<B>(state: &AppState, req: Request<B>) -> HttpResponse
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let provided = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    if let Some(secret) = &state.webhook_secret {
        let valid = provided
            .as_deref()
            .is_some_and(|sig| signature::verify(secret, &body, sig));
        if !valid {
            warn!("Rejected webhook with missing or invalid signature");
            return error_response(StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {}", e)),
    };

    match state.ingest.on_webhook_event(payload).await {
        Ok(outcome) => {
            let outcome = match outcome {
                WebhookOutcome::Applied => "applied",
                WebhookOutcome::Ignored => "ignored",
            };
            json_response(StatusCode::OK, &json!({ "outcome": outcome }))
        }
        Err(e) => {
            error!(error = %e, "Webhook ingest failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn metrics_text(state: &AppState) -> HttpResponse {
    let Some(metrics) = &state.metrics else {
        return error_response(StatusCode::NOT_FOUND, "Metrics disabled");
    };
    match metrics.gather() {
        Ok(body) => text(StatusCode::OK, body),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn read_body<B>(req: Request<B>) -> Result<Bytes, HttpResponse>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(limit = MAX_BODY_BYTES, "Rejected oversized request body");
            Err(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &format!("Request body exceeds {} bytes", MAX_BODY_BYTES),
            ))
        }
        Err(e) => Err(error_response(
            StatusCode::BAD_REQUEST,
            &format!("Failed to read body: {}", e),
        )),
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> HttpResponse {
    json_response(status, &json!({ "error": message }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrategyError;
    use crate::job::model::{JobStatus, TranscodingJob, VideoArtifacts};
    use crate::job::JobRegistry;
    use crate::orchestrator::Strategies;
    use crate::store::MemoryStore;
    use crate::strategy::{Completion, ExecutionStrategy, JobContext, StrategyKind};
    use async_trait::async_trait;

    struct InstantStrategy;

    #[async_trait]
    impl ExecutionStrategy for InstantStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Local
        }

        async fn execute(
            &self,
            _job: &TranscodingJob,
            _ctx: &JobContext,
        ) -> Result<Completion, StrategyError> {
            Ok(Completion::Finished(VideoArtifacts::default()))
        }
    }

    fn state(secret: Option<&str>) -> AppState {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(JobRegistry::new(store));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            Strategies::local_only(Arc::new(InstantStrategy)),
        ));
        AppState {
            orchestrator,
            ingest: Arc::new(WebhookIngest::new(registry)),
            metrics: Some(Arc::new(Metrics::new().unwrap())),
            webhook_secret: secret.map(str::to_string),
        }
    }

    fn request(method: Method, path: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn body_json(response: HttpResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_then_query_status() {
        let state = state(None);
        let response = route(
            &state,
            request(
                Method::POST,
                "/jobs",
                r#"{"videoId":"v1","inputUrl":"https://cdn.example.com/in.mp4","qualities":["360p"]}"#,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["strategy"], "local");
        let job_id = created["jobId"].as_str().unwrap().to_string();

        let response = route(&state, request(Method::GET, &format!("/jobs/{}", job_id), "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = body_json(response).await;
        assert!(snapshot["status"].is_string());
    }

    #[tokio::test]
    async fn invalid_submission_is_bad_request() {
        let state = state(None);
        let response = route(
            &state,
            request(
                Method::POST,
                "/jobs",
                r#"{"videoId":"v1","inputUrl":"https://cdn.example.com/in.mp4","qualities":[]}"#,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["issues"][0]["path"], "qualities");
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let state = state(None);
        let response = route(&state, request(Method::GET, "/jobs/missing", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = route(&state, request(Method::POST, "/jobs/missing/cancel", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_requires_valid_signature_when_configured() {
        let state = state(Some("edge-secret"));
        let body = r#"{"jobId":"unknown","status":"progress","progress":10}"#;

        let unsigned = route(&state, request(Method::POST, WEBHOOK_PATH, body)).await;
        assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

        let mut signed = request(Method::POST, WEBHOOK_PATH, body);
        signed.headers_mut().insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&signature::sign("edge-secret", body.as_bytes())).unwrap(),
        );
        let response = route(&state, signed).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["outcome"], "ignored");
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let state = state(None);
        let padding = "x".repeat(MAX_BODY_BYTES);
        let body = format!(
            r#"{{"jobId":"unknown","status":"failed","error":"{}"}}"#,
            padding
        );

        let response = route(&state, request(Method::POST, WEBHOOK_PATH, &body)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let response = route(&state, request(Method::POST, "/jobs", &body)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn health_presets_and_metrics() {
        let state = state(None);
        assert_eq!(route(&state, request(Method::GET, "/health", "")).await.status(), StatusCode::OK);

        let presets = body_json(route(&state, request(Method::GET, "/presets", "")).await).await;
        assert_eq!(presets[0]["label"], "240p");

        let metrics = route(&state, request(Method::GET, "/metrics", "")).await;
        assert_eq!(metrics.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reflects_completion() {
        let state = state(None);
        let handle = state
            .orchestrator
            .submit(serde_json::from_str(
                r#"{"videoId":"v2","inputUrl":"https://cdn.example.com/in.mp4","qualities":["720p"]}"#,
            ).unwrap())
            .await
            .unwrap();
        let job_id = handle.job_id.clone();
        handle.join().await;

        let snapshot = body_json(route(&state, request(Method::GET, &format!("/jobs/{}", job_id), "")).await).await;
        assert_eq!(snapshot["status"], serde_json::to_value(JobStatus::Completed).unwrap());
        assert_eq!(snapshot["progress"], 100);
    }
}
