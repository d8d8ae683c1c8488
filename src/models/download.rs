// Model Downloader - fetches a base model snapshot from the Hugging Face Hub
// Files land in the standard HF cache; the snapshot directory is returned

use hf_hub::{api::sync::Api, Repo, RepoType};
use std::path::PathBuf;

use super::loader::{shard_files, CONFIG_FILE, SAFETENSORS_INDEX_FILE, TOKENIZER_FILE, WEIGHTS_FILE};
use super::AUX_TOKENIZER_FILES;
use crate::errors::{wrap_error_with_suggestion, PipelineError, Result};
use crate::pipeline::{PipelineEvent, ProgressSink};

/// Model downloader with HuggingFace Hub integration
pub struct ModelDownloader {
    api: Api,
}

impl ModelDownloader {
    /// Create new downloader (uses default HF cache: ~/.cache/huggingface/)
    pub fn new() -> Result<Self> {
        let api = Api::new().map_err(|e| {
            PipelineError::config(format!("Failed to initialize Hugging Face Hub client: {}", e))
        })?;
        Ok(Self { api })
    }

    /// Download config, tokenizer and weights of `repo_id`
    ///
    /// Blocking. Returns the cached snapshot directory.
    pub fn download_model(&self, repo_id: &str, sink: &dyn ProgressSink) -> Result<PathBuf> {
        let repo = self
            .api
            .repo(Repo::new(repo_id.to_string(), RepoType::Model));

        tracing::info!(repo_id, "Downloading base model to cache");

        let fetch = |file: &str| {
            sink.emit(PipelineEvent::DownloadingFile {
                repo_id: repo_id.to_string(),
                file: file.to_string(),
            });
            repo.get(file)
        };

        let mut required_failed = Vec::new();
        let mut snapshot_dir = None;
        for file in [CONFIG_FILE, TOKENIZER_FILE] {
            match fetch(file) {
                Ok(path) => {
                    tracing::debug!(file, path = %path.display(), "Downloaded");
                    if snapshot_dir.is_none() {
                        snapshot_dir = path.parent().map(|p| p.to_path_buf());
                    }
                }
                Err(e) => {
                    tracing::error!(file, error = %e, "Failed to download required file");
                    required_failed.push(file.to_string());
                }
            }
        }

        if !required_failed.is_empty() {
            return Err(PipelineError::config(wrap_error_with_suggestion(
                format!(
                    "Failed to download required files from {}: {}",
                    repo_id,
                    required_failed.join(", ")
                ),
                "Check the repository id, your network connection, and your token at ~/.cache/huggingface/token",
            )));
        }

        for file in AUX_TOKENIZER_FILES {
            if let Err(e) = fetch(file) {
                tracing::debug!(file, error = %e, "Optional file not available");
            }
        }

        // Single weights file, else the shards named by the index
        if let Err(single_err) = fetch(WEIGHTS_FILE) {
            tracing::info!("Single model file not found, looking for sharded files...");
            let index_path = fetch(SAFETENSORS_INDEX_FILE).map_err(|_| {
                PipelineError::config(format!(
                    "No safetensors weights in {} ({})",
                    repo_id, single_err
                ))
            })?;
            let index: serde_json::Value = std::fs::read_to_string(&index_path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
                .map_err(|e| {
                    PipelineError::config(format!(
                        "Invalid {} in {}: {}",
                        SAFETENSORS_INDEX_FILE, repo_id, e
                    ))
                })?;

            let shards = shard_files(&index);
            for shard in &shards {
                fetch(shard.as_str()).map_err(|e| {
                    PipelineError::config(format!(
                        "Failed to download {} from {}: {}",
                        shard, repo_id, e
                    ))
                })?;
            }
            tracing::info!(shards = shards.len(), "Downloaded sharded weights");
        }

        snapshot_dir.ok_or_else(|| {
            PipelineError::config(format!("Could not determine cache directory for {}", repo_id))
        })
    }
}
