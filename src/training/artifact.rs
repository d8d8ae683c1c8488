// Artifact writer: persists a fine-tuned classifier as a self-describing directory
//
// Layout: model.safetensors, config.json, tokenizer files, label_mapping.json
// and metadata.json. A failure part-way leaves whatever was written.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::LabelSpace;
use crate::errors::{file_not_found_error, output_exists_error, PipelineError, Result};
use crate::models::loader::{CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE};
use crate::models::{BaseModel, SequenceClassifier};
use crate::pipeline::{PipelineEvent, ProgressSink};

pub const LABEL_MAPPING_FILE: &str = "label_mapping.json";
pub const METADATA_FILE: &str = "metadata.json";

/// Run description stored as `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// RFC 3339 local time
    pub created: String,
    pub source_model: String,
    pub training_epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub max_length: usize,
    pub device: String,
    pub training_samples: usize,
    pub model_type: String,
    pub num_labels: usize,
    pub label_mapping: LabelSpace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_data_sha256: Option<String>,
}

/// What was written
#[derive(Debug, Clone)]
pub struct ArtifactSummary {
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
}

pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// The output directory must be absent or empty
    pub fn ensure_fresh(&self) -> Result<()> {
        if !self.output_dir.exists() {
            return Ok(());
        }
        if !self.output_dir.is_dir() {
            return Err(PipelineError::config(format!(
                "Output path exists and is not a directory: {}",
                self.output_dir.display()
            )));
        }

        let mut entries = fs::read_dir(&self.output_dir).map_err(|e| {
            PipelineError::config(format!(
                "Cannot read output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;
        if entries.next().is_some() {
            return Err(PipelineError::config(output_exists_error(&self.output_dir)));
        }
        Ok(())
    }

    /// Create the directory, then populate it
    ///
    /// `model` must have one output per label in `metadata.label_mapping`.
    pub fn write(
        &self,
        model: &dyn SequenceClassifier,
        base: &BaseModel,
        metadata: &ArtifactMetadata,
        sink: &dyn ProgressSink,
    ) -> Result<ArtifactSummary> {
        let label_space = &metadata.label_mapping;
        debug_assert_eq!(
            model.num_labels(),
            label_space.len(),
            "classifier head and label mapping disagree on the number of labels"
        );
        debug_assert_eq!(metadata.num_labels, label_space.len());

        fs::create_dir_all(&self.output_dir)
            .map_err(|e| PipelineError::io(&self.output_dir, e))?;

        let mut files = Vec::new();
        let mut record = |path: PathBuf| {
            tracing::debug!(path = %path.display(), "Wrote artifact file");
            sink.emit(PipelineEvent::ArtifactFile { path: path.clone() });
            files.push(path);
        };

        let weights_path = self.output_dir.join(WEIGHTS_FILE);
        model.save_weights(&weights_path)?;
        record(weights_path);

        let config_path = self.output_dir.join(CONFIG_FILE);
        write_json(&config_path, &classifier_config(&base.raw_config, label_space))?;
        record(config_path);

        let tokenizer_path = self.output_dir.join(TOKENIZER_FILE);
        base.tokenizer
            .save(&tokenizer_path, true)
            .map_err(|e| PipelineError::io(&tokenizer_path, e))?;
        record(tokenizer_path);

        for source in &base.tokenizer_files {
            let Some(name) = source.file_name() else {
                continue;
            };
            let target = self.output_dir.join(name);
            fs::copy(source, &target).map_err(|e| PipelineError::io(&target, e))?;
            record(target);
        }

        let mapping_path = self.output_dir.join(LABEL_MAPPING_FILE);
        write_json(&mapping_path, label_space)?;
        record(mapping_path);

        let metadata_path = self.output_dir.join(METADATA_FILE);
        write_json(&metadata_path, metadata)?;
        record(metadata_path);

        tracing::info!(
            output_dir = %self.output_dir.display(),
            files = files.len(),
            "Artifact written"
        );

        Ok(ArtifactSummary {
            output_dir: self.output_dir.clone(),
            files,
        })
    }
}

/// Base config with the label head's size and maps merged in
fn classifier_config(raw: &serde_json::Value, label_space: &LabelSpace) -> serde_json::Value {
    let mut config = match raw {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    config.insert(
        "architectures".to_string(),
        serde_json::json!(["BertForSequenceClassification"]),
    );
    config.insert("num_labels".to_string(), serde_json::json!(label_space.len()));
    config.insert(
        "id2label".to_string(),
        serde_json::Value::Object(label_space.id2label()),
    );
    config.insert(
        "label2id".to_string(),
        serde_json::Value::Object(label_space.label2id()),
    );
    serde_json::Value::Object(config)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| PipelineError::io(path, e))?;
    fs::write(path, json).map_err(|e| PipelineError::io(path, e))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, description: &str) -> Result<T> {
    if !path.is_file() {
        return Err(PipelineError::config(file_not_found_error(path, description)));
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| PipelineError::config(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| PipelineError::config(format!("Invalid {}: {}", path.display(), e)))
}

/// Load `label_mapping.json` from an artifact directory
pub fn read_label_mapping(dir: &Path) -> Result<LabelSpace> {
    read_json(&dir.join(LABEL_MAPPING_FILE), "Label mapping")
}

/// Load `metadata.json` from an artifact directory
pub fn read_metadata(dir: &Path) -> Result<ArtifactMetadata> {
    read_json(&dir.join(METADATA_FILE), "Artifact metadata")
}
