//! Human-readable validation reports.

use std::fmt::Write;

use super::{ValidationIssue, ValidationResult, ValidationSeverity};

/// Multi-line report, errors first. Used when a config is rejected.
pub fn format_report(result: &ValidationResult) -> String {
    if result.issue_count() == 0 {
        return "Configuration is valid.".to_string();
    }

    let mut report = format!("Configuration check: {}\n", counts(result));
    for issue in result.errors().chain(result.warnings()) {
        write_issue(&mut report, issue);
    }
    if !result.is_valid() {
        report.push_str("Configuration rejected.\n");
    }
    report
}

/// One-line summary for logs.
pub fn format_brief_summary(result: &ValidationResult) -> String {
    if result.issue_count() == 0 {
        "Configuration valid".to_string()
    } else if result.is_valid() {
        format!("Configuration valid with {} warning(s)", result.warnings().count())
    } else {
        format!("Configuration invalid: {}", counts(result))
    }
}

fn counts(result: &ValidationResult) -> String {
    format!(
        "{} error(s), {} warning(s)",
        result.error_count(),
        result.warnings().count()
    )
}

fn write_issue(out: &mut String, issue: &ValidationIssue) {
    let label = match issue.severity {
        ValidationSeverity::Error => "error",
        ValidationSeverity::Warning => "warning",
    };
    let _ = writeln!(out, "  {:<7} {}: {}", label, issue.path, issue.message);
    if let Some(suggestion) = &issue.suggestion {
        let _ = writeln!(out, "          hint: {}", suggestion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_errors_before_warnings() {
        let mut result = ValidationResult::new();
        result.add(ValidationIssue::warning("edge.webhook_secret", "unsigned callbacks"));
        result.add(
            ValidationIssue::error("cloud.max_poll_attempts", "must be at least 1")
                .with_suggestion("Set max_poll_attempts: 120"),
        );

        let report = format_report(&result);
        let error_at = report.find("error   cloud.max_poll_attempts").unwrap();
        let warning_at = report.find("warning edge.webhook_secret").unwrap();
        assert!(error_at < warning_at);
        assert!(report.contains("hint: Set max_poll_attempts: 120"));
        assert!(report.starts_with("Configuration check: 1 error(s), 1 warning(s)\n"));
        assert!(report.ends_with("Configuration rejected.\n"));
        assert_eq!(
            format_brief_summary(&result),
            "Configuration invalid: 1 error(s), 1 warning(s)"
        );
    }

    #[test]
    fn warnings_alone_are_not_a_rejection() {
        let mut result = ValidationResult::new();
        result.add(ValidationIssue::warning("pipeline.thumbnails.primary_index", "past the end"));

        assert!(!format_report(&result).contains("rejected"));
        assert_eq!(
            format_brief_summary(&result),
            "Configuration valid with 1 warning(s)"
        );
    }

    #[test]
    fn clean_result_reports_valid() {
        let result = ValidationResult::new();
        assert_eq!(format_report(&result), "Configuration is valid.");
        assert_eq!(format_brief_summary(&result), "Configuration valid");
    }
}
