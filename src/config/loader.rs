//! Configuration file loading and parsing.

use std::path::Path;

use anyhow::{Context, Result};

use super::model::AppConfig;
use crate::error::ConfigError;
use crate::validation::report::{format_brief_summary, format_report};
use crate::validation::validate_config;

/// Loads the configuration file from disk and parses it.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse(&content, path)
}

/// Parses a YAML document. `path` is only used in error messages.
pub fn parse(content: &str, path: &Path) -> Result<AppConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::ParseFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Loads and fully validates the configuration file.
pub fn load_and_validate(path: &Path) -> Result<AppConfig> {
    let config = load_from_path(path).context("Failed to load configuration")?;
    let result = validate_config(&config);

    for issue in result.warnings() {
        tracing::warn!(
            path = %issue.path,
            message = %issue.message,
            suggestion = ?issue.suggestion,
            "Config validation warning"
        );
    }

    if !result.is_valid() {
        tracing::error!("{}", format_report(&result));
        anyhow::bail!(ConfigError::ValidationFailed {
            error_count: result.error_count()
        });
    }

    tracing::info!(path = ?path, "{}", format_brief_summary(&result));
    Ok(config)
}
