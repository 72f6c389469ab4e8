//! Prometheus metrics for the orchestrator.

use chrono::Utc;
use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

use crate::error::ServerError;
use crate::job::model::{JobStatus, TranscodingJob};
use crate::strategy::StrategyKind;

/// Prometheus metrics for transcoding jobs.
pub struct Metrics {
    /// Registry for all metrics.
    registry: Registry,
    /// Submitted jobs by strategy.
    pub jobs_submitted_total: CounterVec,
    /// Finished jobs by terminal status.
    pub jobs_finished_total: CounterVec,
    /// Jobs queued or processing.
    pub jobs_in_flight: Gauge,
    /// Submission to terminal state, in seconds.
    pub job_duration_seconds: Histogram,
    /// Webhook events received by kind.
    pub webhook_events_total: CounterVec,
}

impl Metrics {
    /// Creates and registers all metrics.
    pub fn new() -> Result<Self, ServerError> {
        let registry = Registry::new();

        let jobs_submitted_total = CounterVec::new(
            Opts::new("transcode_jobs_submitted_total", "Jobs accepted for transcoding"),
            &["strategy"],
        )
        .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;

        let jobs_finished_total = CounterVec::new(
            Opts::new("transcode_jobs_finished_total", "Jobs that reached a terminal state"),
            &["status"],
        )
        .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;

        let jobs_in_flight = Gauge::new(
            "transcode_jobs_in_flight",
            "Jobs currently queued or processing",
        )
        .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;

        let job_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "transcode_job_duration_seconds",
                "Time from submission to terminal state in seconds",
            )
            .buckets(vec![10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0]),
        )
        .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;

        let webhook_events_total = CounterVec::new(
            Opts::new("transcode_webhook_events_total", "Edge worker webhook events received"),
            &["kind"],
        )
        .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;

        registry
            .register(Box::new(jobs_submitted_total.clone()))
            .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;
        registry
            .register(Box::new(jobs_finished_total.clone()))
            .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;
        registry
            .register(Box::new(jobs_in_flight.clone()))
            .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;
        registry
            .register(Box::new(job_duration_seconds.clone()))
            .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;
        registry
            .register(Box::new(webhook_events_total.clone()))
            .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;

        Ok(Self {
            registry,
            jobs_submitted_total,
            jobs_finished_total,
            jobs_in_flight,
            job_duration_seconds,
            webhook_events_total,
        })
    }

    /// Records an accepted job.
    pub fn job_started(&self, strategy: Option<StrategyKind>) {
        let label = strategy.map(|s| s.as_str()).unwrap_or("unknown");
        self.jobs_submitted_total.with_label_values(&[label]).inc();
        self.jobs_in_flight.inc();
    }

    /// Records a job reaching a terminal state.
    ///
    /// `counted` is false for jobs adopted from another instance, which never
    /// went through `job_started` here and so are not in the gauge.
    pub fn job_finished(&self, job: &TranscodingJob, counted: bool) {
        let status = match job.status {
            JobStatus::Completed => "completed",
            _ => "failed",
        };
        self.jobs_finished_total.with_label_values(&[status]).inc();
        if counted {
            self.jobs_in_flight.dec();
        }

        let finished_at = job.completed_at.unwrap_or_else(Utc::now);
        let elapsed = (finished_at - job.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.job_duration_seconds.observe(elapsed);
    }

    /// Records a received webhook event.
    pub fn webhook_event(&self, kind: &str) {
        self.webhook_events_total.with_label_values(&[kind]).inc();
    }

    /// Returns the metrics in Prometheus text format.
    pub fn gather(&self) -> Result<String, ServerError> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ServerError::MetricsFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| ServerError::MetricsFailed(e.to_string()))
    }
}
