//! Submission validation. Runs before anything is persisted.

use std::collections::HashSet;

use url::Url;

use crate::error::SubmissionError;
use crate::job::model::{JobSubmission, Quality, QualityRequest, WatermarkSpec};
use crate::job::presets;

use super::{ValidationIssue, ValidationResult};

const REMOTE_SCHEMES: &[&str] = &["http", "https"];
const MAX_FRAME_RATE: u32 = 120;
const MAX_DIMENSION: u32 = 7680;
/// Upper bound for a rendition bitrate, in kbps.
pub const MAX_BITRATE_KBPS: u32 = 200_000;

/// What a submitter may ask of this host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionPolicy {
    /// Accept `file://` locators. Off unless submitters are trusted with
    /// this host's filesystem.
    pub allow_file_sources: bool,
}

impl SubmissionPolicy {
    fn allows(&self, scheme: &str) -> bool {
        REMOTE_SCHEMES.contains(&scheme) || (self.allow_file_sources && scheme == "file")
    }
}

/// Validates a submission and resolves its quality ladder.
pub fn validate_submission(
    submission: &JobSubmission,
    policy: &SubmissionPolicy,
) -> Result<Vec<Quality>, SubmissionError> {
    let mut result = ValidationResult::new();

    if submission.video_id.trim().is_empty() {
        result.add(ValidationIssue::error("videoId", "Video id must not be empty"));
    }

    check_locator(&submission.input_url, "inputUrl", policy, &mut result);

    if submission.qualities.is_empty() {
        result.add(
            ValidationIssue::error("qualities", "At least one quality is required")
                .with_suggestion(format!(
                    "Use preset names such as {}",
                    presets::catalog()
                        .iter()
                        .map(|q| q.label.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
        );
    }

    let mut resolved = Vec::with_capacity(submission.qualities.len());
    let mut labels = HashSet::new();
    for (i, request) in submission.qualities.iter().enumerate() {
        let path = format!("qualities[{}]", i);
        let Some(quality) = resolve_quality(request, &path, &mut result) else {
            continue;
        };
        if !labels.insert(quality.label.clone()) {
            result.add(ValidationIssue::error(
                format!("{}.label", path),
                format!("Duplicate quality '{}'", quality.label),
            ));
        }
        resolved.push(quality);
    }

    let options = &submission.options;
    if options.audio_bitrate == 0 {
        result.add(ValidationIssue::error(
            "options.audioBitrate",
            "Audio bitrate must be greater than zero",
        ));
    }
    if let Some(watermark) = &options.watermark {
        check_watermark(watermark, policy, &mut result);
    }

    if result.is_valid() {
        Ok(resolved)
    } else {
        Err(SubmissionError::Invalid {
            summary: result.error_summary(),
            issues: result.into_issues(),
        })
    }
}

fn check_locator(
    locator: &str,
    path: &str,
    policy: &SubmissionPolicy,
    result: &mut ValidationResult,
) {
    match Url::parse(locator) {
        Ok(url) if policy.allows(url.scheme()) => {}
        Ok(url) if url.scheme() == "file" => result.add(
            ValidationIssue::error(path, "Local file sources are disabled")
                .with_suggestion("Use an http or https URL, or set pipeline.allow_file_sources"),
        ),
        Ok(url) => result.add(
            ValidationIssue::error(path, format!("Unsupported scheme '{}'", url.scheme()))
                .with_suggestion("Use an http or https URL"),
        ),
        Err(e) => result.add(ValidationIssue::error(
            path,
            format!("Malformed locator '{}': {}", locator, e),
        )),
    }
}

fn resolve_quality(
    request: &QualityRequest,
    path: &str,
    result: &mut ValidationResult,
) -> Option<Quality> {
    let quality = match request {
        QualityRequest::Preset(name) => match presets::preset(name) {
            Some(quality) => quality,
            None => {
                let mut issue =
                    ValidationIssue::error(path, format!("Unknown quality preset '{}'", name));
                if let Some(closest) = presets::closest_preset_name(name) {
                    issue = issue.with_suggestion(format!("Did you mean '{}'?", closest));
                }
                result.add(issue);
                return None;
            }
        },
        QualityRequest::Custom(quality) => quality.clone(),
    };

    let before = result.error_count();
    if quality.label.is_empty()
        || !quality
            .label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        result.add(ValidationIssue::error(
            format!("{}.label", path),
            format!("Label '{}' must be non-empty and use only letters, digits, '-' or '_'", quality.label),
        ));
    }
    for (field, value) in [("width", quality.width), ("height", quality.height)] {
        if value == 0 || value > MAX_DIMENSION || value % 2 != 0 {
            result.add(ValidationIssue::error(
                format!("{}.{}", path, field),
                format!("{} {} must be an even number between 2 and {}", field, value, MAX_DIMENSION),
            ));
        }
    }
    if quality.bitrate == 0 || quality.bitrate > MAX_BITRATE_KBPS {
        result.add(ValidationIssue::error(
            format!("{}.bitrate", path),
            format!(
                "Bitrate {} kbps is out of range 1-{}",
                quality.bitrate, MAX_BITRATE_KBPS
            ),
        ));
    }
    if quality.frame_rate == 0 || quality.frame_rate > MAX_FRAME_RATE {
        result.add(ValidationIssue::error(
            format!("{}.frameRate", path),
            format!("Frame rate {} is out of range 1-{}", quality.frame_rate, MAX_FRAME_RATE),
        ));
    }

    (result.error_count() == before).then_some(quality)
}

fn check_watermark(
    watermark: &WatermarkSpec,
    policy: &SubmissionPolicy,
    result: &mut ValidationResult,
) {
    check_locator(&watermark.image_url, "options.watermark.imageUrl", policy, result);
    if !(0.0..=1.0).contains(&watermark.opacity) {
        result.add(ValidationIssue::error(
            "options.watermark.opacity",
            format!("Opacity {} must be between 0.0 and 1.0", watermark.opacity),
        ));
    }
    if !(watermark.scale > 0.0 && watermark.scale <= 4.0) {
        result.add(ValidationIssue::error(
            "options.watermark.scale",
            format!("Scale {} must be greater than 0.0 and at most 4.0", watermark.scale),
        ));
    }
}
