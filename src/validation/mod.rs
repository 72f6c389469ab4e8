//! Validation of job submissions and configuration.
//!
//! Both passes collect every issue instead of stopping at the first, so a
//! caller sees the whole list in one response.

pub mod config;
pub mod report;
pub mod submission;

use serde::Serialize;

pub use config::validate_config;
pub use submission::{validate_submission, SubmissionPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    /// Rejects the submission, or refuses to start with the config.
    Error,
    Warning,
}

/// One problem, addressed by field path (e.g. `qualities[1].bitrate`).
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    fn new(severity: ValidationSeverity, path: String, message: String) -> Self {
        Self {
            severity,
            path,
            message,
            suggestion: None,
        }
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationSeverity::Error, path.into(), message.into())
    }

    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationSeverity::Warning, path.into(), message.into())
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    fn is_error(&self) -> bool {
        self.severity == ValidationSeverity::Error
    }
}

/// Issues collected by one validation pass.
#[derive(Debug, Default)]
pub struct ValidationResult {
    issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// True when nothing but warnings was found.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(ValidationIssue::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// `path: message` for every error, joined with `; `.
    pub fn error_summary(&self) -> String {
        self.errors()
            .map(|issue| format!("{}: {}", issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }
}
