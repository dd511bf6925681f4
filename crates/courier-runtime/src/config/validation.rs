//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{CourierConfig, LogOutput, LoggingConfig, PipelineConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_pipeline_config(&config.pipeline)?;
    Ok(())
}

/// Validates logging configuration.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "File output requires logging.file_path",
        ));
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation("max_files must be greater than 0"));
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation("Log filter module cannot be empty"));
    }

    if logging
        .message_levels
        .keys()
        .any(|prefix| prefix.trim().is_empty())
    {
        return Err(ConfigError::validation(
            "Message logger prefix cannot be empty",
        ));
    }

    Ok(())
}

/// Validates pipe selection.
fn validate_pipeline_config(pipeline: &PipelineConfig) -> ConfigResult<()> {
    let enabled: HashSet<&str> = pipeline.enabled_pipes.iter().map(String::as_str).collect();

    for name in pipeline.enabled_pipes.iter().chain(&pipeline.disabled_pipes) {
        if name.trim().is_empty() {
            return Err(ConfigError::validation("Pipe name cannot be empty"));
        }
    }

    if let Some(name) = pipeline
        .disabled_pipes
        .iter()
        .find(|name| enabled.contains(name.as_str()))
    {
        return Err(ConfigError::validation(format!(
            "Pipe '{name}' is both enabled and disabled"
        )));
    }

    Ok(())
}
