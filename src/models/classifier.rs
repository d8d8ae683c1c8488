// BERT sequence classifier: encoder, pooler and a linear label head
//
// All parameters live in one VarMap, so every weight is trainable and
// `save_weights` emits the same names a pretrained checkpoint uses.

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{linear, Dropout, Linear, VarBuilder, VarMap};
use std::collections::HashMap;
use std::path::Path;

use super::bert::{BertConfig, BertEncoder};
use super::common::SequenceClassifier;
use super::loader::BaseModel;
use crate::errors::{PipelineError, Result};

/// How pretrained tensors mapped onto the classifier's parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightReport {
    /// Parameters initialized from the checkpoint
    pub loaded: usize,
    /// Parameters with no tensor in the checkpoint (fresh init kept)
    pub missing: Vec<String>,
    /// Parameters whose checkpoint tensor had another shape (fresh init kept)
    pub mismatched: Vec<String>,
}

pub struct BertClassifier {
    varmap: VarMap,
    encoder: BertEncoder,
    dropout: Dropout,
    classifier: Linear,
    num_labels: usize,
}

impl BertClassifier {
    /// Randomly initialized classifier
    pub fn new(config: &BertConfig, num_labels: usize, device: &Device) -> Result<Self> {
        if num_labels == 0 {
            return Err(PipelineError::config("classifier needs at least one label"));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let build_err = |e: candle_core::Error| {
            PipelineError::config(format!("Failed to build BERT classifier: {}", e))
        };

        let encoder = BertEncoder::new(config, vb.pp("bert")).map_err(build_err)?;
        let classifier =
            linear(config.hidden_size, num_labels, vb.pp("classifier")).map_err(build_err)?;
        let dropout_p = config.classifier_dropout.unwrap_or(config.hidden_dropout_prob);

        Ok(Self {
            varmap,
            encoder,
            dropout: Dropout::new(dropout_p as f32),
            classifier,
            num_labels,
        })
    }

    /// Classifier initialized from the base model's pretrained tensors
    pub fn from_pretrained(
        base: &BaseModel,
        num_labels: usize,
        device: &Device,
    ) -> Result<(Self, WeightReport)> {
        let classifier = Self::new(&base.config, num_labels, device)?;
        let report = classifier.load_tensors(&base.tensors)?;

        tracing::info!(
            source = %base.source_id,
            loaded = report.loaded,
            missing = report.missing.len(),
            mismatched = report.mismatched.len(),
            num_labels,
            "Initialized classifier from pretrained weights"
        );
        if !report.missing.is_empty() {
            tracing::info!(params = ?report.missing, "Newly initialized (not in checkpoint)");
        }
        if !report.mismatched.is_empty() {
            tracing::warn!(
                params = ?report.mismatched,
                "Newly initialized (shape differs from checkpoint)"
            );
        }

        Ok((classifier, report))
    }

    /// Copy matching tensors into the classifier's variables
    pub fn load_tensors(&self, tensors: &HashMap<String, Tensor>) -> Result<WeightReport> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| PipelineError::training("classifier parameters are poisoned"))?;

        let mut report = WeightReport::default();
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();

        for name in names {
            let var = &data[name];
            let Some(tensor) = checkpoint_names(name).iter().find_map(|n| tensors.get(n)) else {
                report.missing.push(name.clone());
                continue;
            };

            if tensor.dims() != var.dims() {
                tracing::debug!(
                    name = %name,
                    expected = ?var.dims(),
                    found = ?tensor.dims(),
                    "Shape mismatch"
                );
                report.mismatched.push(name.clone());
                continue;
            }

            tensor
                .to_dtype(var.dtype())
                .and_then(|t| t.to_device(var.device()))
                .and_then(|t| var.set(&t))
                .map_err(|e| PipelineError::config(format!("Failed to set {}: {}", name, e)))?;
            report.loaded += 1;
        }

        Ok(report)
    }
}

/// Names a parameter may carry in a checkpoint, preferred first
fn checkpoint_names(name: &str) -> Vec<String> {
    let mut base = vec![name.to_string()];
    if let Some(stripped) = name.strip_prefix("bert.") {
        base.push(stripped.to_string());
    }

    let mut names = base.clone();
    for n in &base {
        if let Some(prefix) = n.strip_suffix("LayerNorm.weight") {
            names.push(format!("{}LayerNorm.gamma", prefix));
        } else if let Some(prefix) = n.strip_suffix("LayerNorm.bias") {
            names.push(format!("{}LayerNorm.beta", prefix));
        }
    }
    names
}

impl SequenceClassifier for BertClassifier {
    fn forward_t(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let pooled = self
            .encoder
            .forward_t(input_ids, attention_mask, token_type_ids, train)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        self.classifier.forward(&pooled)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        self.varmap.save(path).map_err(|e| PipelineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> BertConfig {
        serde_json::from_value(serde_json::json!({
            "vocab_size": 12,
            "hidden_size": 8,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "max_position_embeddings": 8,
            "hidden_act": "relu",
            "hidden_dropout_prob": 0.0,
            "attention_probs_dropout_prob": 0.0
        }))
        .unwrap()
    }

    fn inputs() -> (Tensor, Tensor, Tensor) {
        let ids = Tensor::new(&[[2u32, 5, 3, 0]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 1, 0]], &Device::Cpu).unwrap();
        let types = ids.zeros_like().unwrap();
        (ids, mask, types)
    }

    #[test]
    fn test_logits_shape() {
        let model = BertClassifier::new(&config(), 3, &Device::Cpu).unwrap();
        let (ids, mask, types) = inputs();
        let logits = model.forward_t(&ids, &mask, &types, true).unwrap();
        assert_eq!(logits.dims(), &[1, 3]);
        assert_eq!(model.num_labels(), 3);
    }

    #[test]
    fn test_checkpoint_name_candidates() {
        let names = checkpoint_names("bert.embeddings.LayerNorm.weight");
        assert_eq!(
            names,
            vec![
                "bert.embeddings.LayerNorm.weight",
                "embeddings.LayerNorm.weight",
                "bert.embeddings.LayerNorm.gamma",
                "embeddings.LayerNorm.gamma",
            ]
        );
        assert_eq!(checkpoint_names("classifier.bias"), vec!["classifier.bias"]);
    }

    #[test]
    fn test_saved_weights_reload_identically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.safetensors");
        let (ids, mask, types) = inputs();

        let original = BertClassifier::new(&config(), 2, &Device::Cpu).unwrap();
        original.save_weights(&path).unwrap();
        let expected = original.forward_t(&ids, &mask, &types, false).unwrap();

        let tensors = candle_core::safetensors::load(&path, &Device::Cpu).unwrap();
        let reloaded = BertClassifier::new(&config(), 2, &Device::Cpu).unwrap();
        let report = reloaded.load_tensors(&tensors).unwrap();
        assert!(report.missing.is_empty());
        assert!(report.mismatched.is_empty());
        assert_eq!(report.loaded, tensors.len());

        let actual = reloaded.forward_t(&ids, &mask, &types, false).unwrap();
        let diff = (expected - actual)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_head_with_other_label_count_keeps_fresh_init() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.safetensors");
        BertClassifier::new(&config(), 2, &Device::Cpu)
            .unwrap()
            .save_weights(&path)
            .unwrap();

        let tensors = candle_core::safetensors::load(&path, &Device::Cpu).unwrap();
        let model = BertClassifier::new(&config(), 5, &Device::Cpu).unwrap();
        let report = model.load_tensors(&tensors).unwrap();

        assert_eq!(
            report.mismatched,
            vec!["classifier.bias".to_string(), "classifier.weight".to_string()]
        );
        assert_eq!(report.loaded, tensors.len() - 2);
    }

    #[test]
    fn test_unprefixed_legacy_checkpoint_loads() {
        let source = BertClassifier::new(&config(), 2, &Device::Cpu).unwrap();
        let data = source.varmap.data().lock().unwrap();
        let legacy: HashMap<String, Tensor> = data
            .iter()
            .map(|(name, var)| {
                let name = name
                    .trim_start_matches("bert.")
                    .replace("LayerNorm.weight", "LayerNorm.gamma")
                    .replace("LayerNorm.bias", "LayerNorm.beta");
                (name, var.as_tensor().clone())
            })
            .collect();

        let model = BertClassifier::new(&config(), 2, &Device::Cpu).unwrap();
        let report = model.load_tensors(&legacy).unwrap();
        assert!(report.missing.is_empty());
        assert_eq!(report.loaded, legacy.len());
    }
}
