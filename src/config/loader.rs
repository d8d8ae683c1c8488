// Configuration loader
// Reads optional TOML settings; command-line flags are applied on top by the caller

use std::fs;
use std::path::Path;

use super::settings::TrainingConfig;
use crate::errors::{file_not_found_error, PipelineError, Result};

/// Load settings from a TOML file, or defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<TrainingConfig> {
    let Some(path) = path else {
        return Ok(TrainingConfig::default());
    };

    if !path.is_file() {
        return Err(PipelineError::config(file_not_found_error(
            path,
            "Config file",
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let config = parse_config(&contents)
        .map_err(|e| PipelineError::config(format!("{} ({})", e, path.display())))?;

    tracing::debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Parse TOML settings; unspecified keys keep their defaults
pub fn parse_config(contents: &str) -> Result<TrainingConfig> {
    toml::from_str(contents)
        .map_err(|e| PipelineError::config(format!("Failed to parse config: {}", e)))
}
