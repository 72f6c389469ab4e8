//! Configuration validation.

use url::Url;

use crate::config::model::{AppConfig, CloudConfig, EdgeConfig, PipelineConfig, StoreConfig};
use crate::strategy::ProgressBand;

use super::{ValidationIssue, ValidationResult};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validates a loaded configuration.
pub fn validate_config(config: &AppConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if !LOG_LEVELS.contains(&config.global.log_level.to_lowercase().as_str()) {
        result.add(
            ValidationIssue::error(
                "global.log_level",
                format!("Unknown log level '{}'", config.global.log_level),
            )
            .with_suggestion(format!("Use one of: {}", LOG_LEVELS.join(", "))),
        );
    }
    if let StoreConfig::Redis(redis) = &config.global.store {
        if redis.host.trim().is_empty() {
            result.add(ValidationIssue::error("global.store.host", "Redis host must not be empty"));
        }
    }
    if config.global.server.port == 0 {
        result.add(ValidationIssue::error("global.server.port", "Port must be non-zero"));
    }

    check_url(&config.storage.public_base_url, "storage.public_base_url", &mut result);
    validate_pipeline(&config.pipeline, &mut result);

    if let Some(cloud) = &config.cloud {
        validate_cloud(cloud, &mut result);
    }
    if let Some(edge) = &config.edge {
        validate_edge(edge, &mut result);
    }

    result
}

fn validate_pipeline(pipeline: &PipelineConfig, result: &mut ValidationResult) {
    check_band(pipeline.rendition_band, "pipeline.rendition_band", result);

    let thumbnails = &pipeline.thumbnails;
    if thumbnails.offsets_seconds.is_empty() {
        result.add(ValidationIssue::error(
            "pipeline.thumbnails.offsets_seconds",
            "At least one thumbnail offset is required",
        ));
    }
    if thumbnails.offsets_seconds.iter().any(|o| !o.is_finite() || *o < 0.0) {
        result.add(ValidationIssue::error(
            "pipeline.thumbnails.offsets_seconds",
            "Thumbnail offsets must be non-negative",
        ));
    }
    if !thumbnails.offsets_seconds.is_empty()
        && thumbnails.primary_index >= thumbnails.offsets_seconds.len()
    {
        result.add(
            ValidationIssue::warning(
                "pipeline.thumbnails.primary_index",
                format!(
                    "Primary index {} is past the last offset; the first thumbnail will be used",
                    thumbnails.primary_index
                ),
            ),
        );
    }
    if thumbnails.width == 0 || thumbnails.width % 2 != 0 {
        result.add(ValidationIssue::error(
            "pipeline.thumbnails.width",
            "Thumbnail width must be a positive even number",
        ));
    }

    let preview = &pipeline.preview;
    if preview.duration_seconds <= 0.0 {
        result.add(ValidationIssue::error(
            "pipeline.preview.duration_seconds",
            "Preview duration must be positive",
        ));
    }
    if preview.start_seconds < 0.0 {
        result.add(ValidationIssue::error(
            "pipeline.preview.start_seconds",
            "Preview start must be non-negative",
        ));
    }

    if pipeline.segment_duration_seconds == 0 {
        result.add(ValidationIssue::error(
            "pipeline.segment_duration_seconds",
            "Segment duration must be at least 1 second",
        ));
    }

    if pipeline.allow_file_sources {
        result.add(ValidationIssue::warning(
            "pipeline.allow_file_sources",
            "Any submitter can make the service read files on this host",
        ));
    }
}

fn validate_cloud(cloud: &CloudConfig, result: &mut ValidationResult) {
    check_url(&cloud.api_base, "cloud.api_base", result);
    if cloud.max_poll_attempts == 0 {
        result.add(ValidationIssue::error(
            "cloud.max_poll_attempts",
            "Poll attempt ceiling must be at least 1",
        ));
    }
    if !(cloud.poll_interval_seconds.is_finite() && cloud.poll_interval_seconds > 0.0) {
        result.add(ValidationIssue::error(
            "cloud.poll_interval_seconds",
            "Poll interval must be greater than zero",
        ));
    }
    if cloud.account_id.trim().is_empty() {
        result.add(ValidationIssue::error("cloud.account_id", "Account id must not be empty"));
    }
    check_band(cloud.progress_band, "cloud.progress_band", result);
}

fn validate_edge(edge: &EdgeConfig, result: &mut ValidationResult) {
    check_url(&edge.dispatch_url, "edge.dispatch_url", result);
    check_url(&edge.callback_base_url, "edge.callback_base_url", result);
    if edge.webhook_secret.is_none() {
        result.add(
            ValidationIssue::warning(
                "edge.webhook_secret",
                "Webhook callbacks will be accepted without signature verification",
            )
            .with_suggestion("Set a shared secret and sign callbacks with HMAC-SHA256"),
        );
    }
}

fn check_band(band: ProgressBand, path: &str, result: &mut ValidationResult) {
    if band.start >= band.end || band.end > 100 {
        result.add(ValidationIssue::error(
            path,
            format!(
                "Progress band {}-{} must be increasing and within 0-100",
                band.start, band.end
            ),
        ));
    }
}

fn check_url(value: &str, path: &str, result: &mut ValidationResult) {
    match Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => result.add(ValidationIssue::error(
            path,
            format!("Expected an http(s) URL, got scheme '{}'", url.scheme()),
        )),
        Err(e) => result.add(ValidationIssue::error(
            path,
            format!("Invalid URL '{}': {}", value, e),
        )),
    }
}
