// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::backend::ComputeDevice;
use crate::errors::{PipelineError, Result};

pub const DEFAULT_CSV_PATH: &str = "active_learning_data.csv";

/// Settings for one fine-tuning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Base model directory (config.json, tokenizer.json, safetensors weights)
    pub model_dir: PathBuf,

    /// Hub repository tried when `model_dir` cannot be loaded.
    /// Only used when set explicitly; its label space may differ.
    pub hub_fallback: Option<String>,

    /// Fresh directory the artifact is written to
    pub output_dir: PathBuf,

    /// Correction table (CSV with `text` and `label` columns)
    pub csv_path: PathBuf,

    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,

    /// Token sequence length (pad + truncate)
    pub max_length: usize,

    /// Shuffle seed; a fresh seed is drawn when absent
    pub seed: Option<u64>,

    pub device: ComputeDevice,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/base"),
            hub_fallback: None,
            output_dir: PathBuf::from("models/fine_tuned"),
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            epochs: 3,
            batch_size: 8,
            learning_rate: 2e-5,
            max_length: 256,
            seed: None,
            device: ComputeDevice::Auto,
        }
    }
}

impl TrainingConfig {
    /// Reject settings no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(PipelineError::config("epochs must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch size must be at least 1"));
        }
        if self.max_length == 0 {
            return Err(PipelineError::config("max length must be at least 1"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PipelineError::config(format!(
                "learning rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(PipelineError::config("output directory must not be empty"));
        }
        Ok(())
    }
}
