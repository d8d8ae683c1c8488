// Pipeline error taxonomy
//
// Every stage converts its internal faults (io, csv, candle, tokenizers,
// serde) into one of these four kinds at its boundary. Messages carry
// suggestions where the fix is usually on the operator's side.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error raised by any stage of the fine-tuning pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing paths, malformed table schema, invalid settings
    #[error("{0}")]
    Configuration(String),

    /// The correction table has no usable rows
    #[error("{0}")]
    DataValidation(String),

    /// Numeric divergence or device failure during training
    #[error("{0}")]
    Training(String),

    /// Artifact persistence failure
    #[error("failed to write {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl PipelineError {
    /// Taxonomy name shown in stage summaries
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "ConfigurationError",
            PipelineError::DataValidation(_) => "DataValidationError",
            PipelineError::Training(_) => "TrainingError",
            PipelineError::Io { .. } => "IOError",
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        PipelineError::DataValidation(message.into())
    }

    pub fn training(message: impl Into<String>) -> Self {
        PipelineError::Training(message.into())
    }

    pub fn io(path: &Path, err: impl fmt::Display) -> Self {
        PipelineError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Format a file not found error with helpful suggestions
pub fn file_not_found_error(path: &Path, description: &str) -> String {
    format!(
        "{} not found: {}\n\n\
        Possible causes:\n\
        • Wrong path specified\n\
        • File has not been created yet\n\n\
        Try:\n\
        1. Check if the path exists:\n\
           ls -la {}\n\n\
        2. Pass the correct location on the command line",
        description,
        path.display(),
        path.display()
    )
}

/// Format a missing column error for the correction table
pub fn missing_columns_error(path: &str, missing: &[&str], found: &[String]) -> String {
    format!(
        "Correction table {} is missing required column(s): {}\n\n\
        Found columns: {}\n\n\
        Try:\n\
        1. Make sure the first row is a header\n\
        2. Name the columns exactly `text` and `label`",
        path,
        missing.join(", "),
        if found.is_empty() {
            "(none)".to_string()
        } else {
            found.join(", ")
        }
    )
}

/// Format a non-empty output directory error
pub fn output_exists_error(path: &Path) -> String {
    format!(
        "Output directory already contains files: {}\n\n\
        Each fine-tuned model is written to a fresh directory.\n\n\
        Try:\n\
        1. Choose a new version path, e.g. {}_next\n\
        2. Or remove the old artifact if it is no longer needed",
        path.display(),
        path.display()
    )
}

/// Wrap a generic error with a suggestion
pub fn wrap_error_with_suggestion(error: impl fmt::Display, suggestion: &str) -> String {
    format!("{}\n\nSuggestion: {}", error, suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_taxonomy() {
        assert_eq!(PipelineError::config("x").kind(), "ConfigurationError");
        assert_eq!(PipelineError::data("x").kind(), "DataValidationError");
        assert_eq!(PipelineError::training("x").kind(), "TrainingError");
        assert_eq!(
            PipelineError::io(Path::new("/tmp/out"), "disk full").kind(),
            "IOError"
        );
    }

    #[test]
    fn test_io_error_names_path() {
        let err = PipelineError::io(Path::new("/tmp/out/model.safetensors"), "disk full");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/out/model.safetensors"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_missing_columns_lists_found_columns() {
        let msg = missing_columns_error(
            "data.csv",
            &["label"],
            &["text".to_string(), "score".to_string()],
        );
        assert!(msg.contains("label"));
        assert!(msg.contains("text, score"));
    }

    #[test]
    fn test_file_not_found_has_suggestion() {
        let msg = file_not_found_error(Path::new("missing.csv"), "Correction table");
        assert!(msg.starts_with("Correction table not found: missing.csv"));
        assert!(msg.contains("Try:"));
    }
}
