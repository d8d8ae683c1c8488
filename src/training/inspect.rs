// Artifact inspection: read a fine-tuned model directory back and check it is complete

use safetensors::SafeTensors;
use std::fs;
use std::path::{Path, PathBuf};

use super::artifact::{read_label_mapping, read_metadata, ArtifactMetadata};
use crate::data::LabelSpace;
use crate::errors::{file_not_found_error, PipelineError, Result};
use crate::models::loader::{CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE};

const CLASSIFIER_WEIGHT: &str = "classifier.weight";

#[derive(Debug, Clone)]
pub struct ArtifactInspection {
    pub dir: PathBuf,
    pub metadata: ArtifactMetadata,
    pub label_space: LabelSpace,
    pub tensor_count: usize,
    pub parameter_count: usize,
    pub weights_bytes: u64,
}

/// Verify an artifact directory and summarize it
pub fn inspect_artifact(dir: &Path) -> Result<ArtifactInspection> {
    if !dir.is_dir() {
        return Err(PipelineError::config(file_not_found_error(dir, "Artifact directory")));
    }

    let metadata = read_metadata(dir)?;
    let label_space = read_label_mapping(dir)?;

    if metadata.label_mapping != label_space {
        return Err(PipelineError::config(
            "metadata.json and label_mapping.json disagree on the label mapping",
        ));
    }
    if metadata.num_labels != label_space.len() {
        return Err(PipelineError::config(format!(
            "metadata.json declares {} labels but the mapping has {}",
            metadata.num_labels,
            label_space.len()
        )));
    }

    for file in [CONFIG_FILE, TOKENIZER_FILE] {
        if !dir.join(file).is_file() {
            return Err(PipelineError::config(format!(
                "Artifact is incomplete: {} is missing from {}",
                file,
                dir.display()
            )));
        }
    }

    let weights_path = dir.join(WEIGHTS_FILE);
    let bytes = fs::read(&weights_path).map_err(|e| {
        PipelineError::config(format!("Failed to read {}: {}", weights_path.display(), e))
    })?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| {
        PipelineError::config(format!("Invalid safetensors file {}: {}", weights_path.display(), e))
    })?;

    let head = tensors.tensor(CLASSIFIER_WEIGHT).map_err(|_| {
        PipelineError::config(format!(
            "{} has no {} tensor",
            weights_path.display(),
            CLASSIFIER_WEIGHT
        ))
    })?;
    if head.shape().first() != Some(&label_space.len()) {
        return Err(PipelineError::config(format!(
            "{} has shape {:?}, expected {} rows (one per label)",
            CLASSIFIER_WEIGHT,
            head.shape(),
            label_space.len()
        )));
    }

    let parameter_count = tensors
        .tensors()
        .iter()
        .map(|(_, view)| view.shape().iter().product::<usize>())
        .sum();

    Ok(ArtifactInspection {
        dir: dir.to_path_buf(),
        tensor_count: tensors.len(),
        parameter_count,
        weights_bytes: bytes.len() as u64,
        metadata,
        label_space,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory() {
        let err = inspect_artifact(Path::new("/nonexistent/artifact")).unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn test_empty_directory_reports_metadata() {
        let dir = TempDir::new().unwrap();
        let err = inspect_artifact(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Artifact metadata not found"));
    }
}
