// Base model loading with an ordered fallback chain
//
// Sources are tried in order; the first loadable one wins. Each failed
// attempt is kept so the final error can explain every miss.

use candle_core::{Device, Tensor};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use super::bert::BertConfig;
use super::download::ModelDownloader;
use super::AUX_TOKENIZER_FILES;
use crate::config::TrainingConfig;
use crate::errors::{file_not_found_error, wrap_error_with_suggestion, PipelineError, Result};
use crate::pipeline::ProgressSink;

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";

pub const SUPPORTED_MODEL_TYPE: &str = "bert";

/// Where a base model can come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Directory with config.json, tokenizer.json and safetensors weights
    Local(PathBuf),
    /// Hugging Face Hub repository, fetched into the local cache
    Hub { repo_id: String },
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Local(path) => write!(f, "{}", path.display()),
            ModelSource::Hub { repo_id } => write!(f, "hub:{}", repo_id),
        }
    }
}

/// Pretrained encoder ready to be wrapped by a classifier
pub struct BaseModel {
    /// Identifier recorded as `source_model` in the artifact
    pub source_id: String,
    pub model_dir: PathBuf,
    pub config: BertConfig,
    /// config.json as read, merged with label maps when written back
    pub raw_config: serde_json::Value,
    pub tokenizer: Tokenizer,
    pub tensors: HashMap<String, Tensor>,
    /// Optional tokenizer files found next to tokenizer.json
    pub tokenizer_files: Vec<PathBuf>,
}

impl fmt::Debug for BaseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseModel")
            .field("source_id", &self.source_id)
            .field("model_dir", &self.model_dir)
            .field("model_type", &self.config.model_type)
            .field("tensors", &self.tensors.len())
            .finish()
    }
}

/// A source that could not be loaded
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub source: ModelSource,
    pub error: String,
}

/// Result of walking the fallback chain
#[derive(Debug)]
pub struct LoadedModel {
    pub model: BaseModel,
    pub source: ModelSource,
    /// Position of `source` in the chain; non-zero means a fallback was used
    pub source_index: usize,
    pub failed_attempts: Vec<FailedAttempt>,
}

impl LoadedModel {
    pub fn used_fallback(&self) -> bool {
        self.source_index > 0
    }
}

pub struct ModelLoader {
    sources: Vec<ModelSource>,
}

impl ModelLoader {
    pub fn new(sources: Vec<ModelSource>) -> Self {
        Self { sources }
    }

    /// Local model directory first, then the hub repository if one was given
    pub fn from_config(config: &TrainingConfig) -> Self {
        let mut sources = vec![ModelSource::Local(config.model_dir.clone())];
        if let Some(repo_id) = &config.hub_fallback {
            sources.push(ModelSource::Hub {
                repo_id: repo_id.clone(),
            });
        }
        Self::new(sources)
    }

    pub fn sources(&self) -> &[ModelSource] {
        &self.sources
    }

    pub fn load(&self, device: &Device, sink: &dyn ProgressSink) -> Result<LoadedModel> {
        let mut failed_attempts = Vec::new();

        for (source_index, source) in self.sources.iter().enumerate() {
            match load_source(source, device, sink) {
                Ok(model) => {
                    tracing::info!(
                        source = %source,
                        tensors = model.tensors.len(),
                        hidden_size = model.config.hidden_size,
                        layers = model.config.num_hidden_layers,
                        "Loaded base model"
                    );
                    return Ok(LoadedModel {
                        model,
                        source: source.clone(),
                        source_index,
                        failed_attempts,
                    });
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Base model source failed");
                    failed_attempts.push(FailedAttempt {
                        source: source.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let details = failed_attempts
            .iter()
            .map(|a| format!("• {}: {}", a.source, a.error))
            .collect::<Vec<_>>()
            .join("\n");
        Err(PipelineError::config(wrap_error_with_suggestion(
            format!("No base model source could be loaded:\n{}", details),
            "Pass --model-dir pointing at a BERT checkpoint, or --hub-fallback <repo>",
        )))
    }
}

fn load_source(
    source: &ModelSource,
    device: &Device,
    sink: &dyn ProgressSink,
) -> Result<BaseModel> {
    match source {
        ModelSource::Local(path) => load_dir(path, &path.display().to_string(), device),
        ModelSource::Hub { repo_id } => {
            let dir = ModelDownloader::new()?.download_model(repo_id, sink)?;
            load_dir(&dir, repo_id, device)
        }
    }
}

/// Load a model directory laid out like a Hugging Face BERT checkpoint
pub fn load_dir(dir: &Path, source_id: &str, device: &Device) -> Result<BaseModel> {
    if !dir.is_dir() {
        return Err(PipelineError::config(file_not_found_error(dir, "Model directory")));
    }

    let config_path = dir.join(CONFIG_FILE);
    let raw_config: serde_json::Value = fs::read_to_string(&config_path)
        .map_err(|e| {
            PipelineError::config(format!("Failed to read {}: {}", config_path.display(), e))
        })
        .and_then(|s| {
            serde_json::from_str(&s).map_err(|e| {
                PipelineError::config(format!("Invalid JSON in {}: {}", config_path.display(), e))
            })
        })?;

    let config: BertConfig = serde_json::from_value(raw_config.clone()).map_err(|e| {
        PipelineError::config(format!(
            "{} is not a BERT configuration: {}",
            config_path.display(),
            e
        ))
    })?;
    if config.model_type != SUPPORTED_MODEL_TYPE {
        return Err(PipelineError::config(format!(
            "Unsupported model_type '{}' in {} (only '{}' checkpoints can be fine-tuned)",
            config.model_type,
            config_path.display(),
            SUPPORTED_MODEL_TYPE
        )));
    }

    let tokenizer_path = dir.join(TOKENIZER_FILE);
    let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
        PipelineError::config(format!(
            "Failed to load tokenizer {}: {}",
            tokenizer_path.display(),
            e
        ))
    })?;

    let mut tensors = HashMap::new();
    for file in weight_files(dir)? {
        let loaded = candle_core::safetensors::load(&file, device).map_err(|e| {
            PipelineError::config(format!("Failed to load weights {}: {}", file.display(), e))
        })?;
        tensors.extend(loaded);
    }

    let tokenizer_files = AUX_TOKENIZER_FILES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect();

    Ok(BaseModel {
        source_id: source_id.to_string(),
        model_dir: dir.to_path_buf(),
        config,
        raw_config,
        tokenizer,
        tensors,
        tokenizer_files,
    })
}

/// Weight files of a checkpoint: the single file, else the indexed or named shards
fn weight_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let single = dir.join(WEIGHTS_FILE);
    if single.is_file() {
        return Ok(vec![single]);
    }

    let index_path = dir.join(SAFETENSORS_INDEX_FILE);
    if index_path.is_file() {
        let index: serde_json::Value = fs::read_to_string(&index_path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
            .map_err(|e| {
                PipelineError::config(format!("Invalid {}: {}", index_path.display(), e))
            })?;
        return Ok(shard_files(&index).into_iter().map(|f| dir.join(f)).collect());
    }

    let mut shards: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| PipelineError::config(format!("Failed to list {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(is_shard_name)
                .unwrap_or(false)
        })
        .collect();
    shards.sort();

    if shards.is_empty() {
        return Err(PipelineError::config(format!(
            "No safetensors weights in {} (expected {} or sharded model-NNNNN-of-MMMMM.safetensors)",
            dir.display(),
            WEIGHTS_FILE
        )));
    }
    Ok(shards)
}

fn is_shard_name(name: &str) -> bool {
    name.starts_with("model-") && name.contains("-of-") && name.ends_with(".safetensors")
}

/// Distinct shard files named in a safetensors index, sorted
pub(crate) fn shard_files(index: &serde_json::Value) -> Vec<String> {
    index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .map(|map| {
            map.values()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineEvent, ProgressSink};
    use tempfile::TempDir;

    #[test]
    fn test_shard_files_from_index() {
        let index = serde_json::json!({
            "metadata": {"total_size": 10},
            "weight_map": {
                "a": "model-00002-of-00002.safetensors",
                "b": "model-00001-of-00002.safetensors",
                "c": "model-00001-of-00002.safetensors"
            }
        });
        assert_eq!(
            shard_files(&index),
            vec![
                "model-00001-of-00002.safetensors",
                "model-00002-of-00002.safetensors"
            ]
        );
        assert!(shard_files(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn test_shard_name_pattern() {
        assert!(is_shard_name("model-00001-of-00003.safetensors"));
        assert!(!is_shard_name("model.safetensors"));
        assert!(!is_shard_name("optimizer-00001-of-00002.bin"));
    }

    #[test]
    fn test_from_config_orders_sources() {
        let config = TrainingConfig {
            model_dir: PathBuf::from("/models/base"),
            hub_fallback: Some("org/bert".to_string()),
            ..TrainingConfig::default()
        };
        let loader = ModelLoader::from_config(&config);
        assert_eq!(
            loader.sources(),
            &[
                ModelSource::Local(PathBuf::from("/models/base")),
                ModelSource::Hub {
                    repo_id: "org/bert".to_string()
                }
            ]
        );

        let loader = ModelLoader::from_config(&TrainingConfig::default());
        assert_eq!(loader.sources().len(), 1);
    }

    #[test]
    fn test_exhausted_chain_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let loader = ModelLoader::new(vec![
            ModelSource::Local(dir.path().join("missing_a")),
            ModelSource::Local(dir.path().join("missing_b")),
        ]);

        let err = loader.load(&Device::Cpu, &()).unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
        let msg = err.to_string();
        assert!(msg.contains("missing_a"));
        assert!(msg.contains("missing_b"));
    }

    #[test]
    fn test_non_bert_config_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"model_type": "gpt2", "vocab_size": 10, "hidden_size": 4,
                "num_hidden_layers": 1, "num_attention_heads": 1, "intermediate_size": 8}"#,
        )
        .unwrap();

        let err = load_dir(dir.path(), "x", &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("gpt2"));
    }

    struct Recorder(std::cell::RefCell<Vec<PipelineEvent>>);

    impl ProgressSink for Recorder {
        fn emit(&self, event: PipelineEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    #[test]
    fn test_missing_weights_reported() {
        let dir = TempDir::new().unwrap();
        assert!(weight_files(dir.path()).is_err());

        fs::write(dir.path().join("model-00001-of-00001.safetensors"), b"").unwrap();
        let files = weight_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);

        // No events for purely local sources
        let recorder = Recorder(Default::default());
        let _ = ModelLoader::new(vec![ModelSource::Local(dir.path().to_path_buf())])
            .load(&Device::Cpu, &recorder);
        assert!(recorder.0.borrow().is_empty());
    }
}
