// Shared fixtures: a tiny BERT checkpoint and word-level tokenizer built on the fly
#![allow(dead_code)]

use anyhow::Result;
use candle_core::Device;
use std::fs;
use std::path::{Path, PathBuf};

use retune::config::{ComputeDevice, TrainingConfig};
use retune::models::{BertClassifier, BertConfig, SequenceClassifier};

pub const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "great", "good", "love", "nice", "bad", "awful", "hate",
    "slow", "okay", "fine", "the", "food", "service", "was", "it", "is",
];

pub fn vocab_id(token: &str) -> u32 {
    VOCAB.iter().position(|t| *t == token).unwrap_or(1) as u32
}

pub fn bert_config_json() -> serde_json::Value {
    serde_json::json!({
        "model_type": "bert",
        "architectures": ["BertModel"],
        "vocab_size": VOCAB.len(),
        "hidden_size": 16,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "intermediate_size": 32,
        "hidden_act": "relu",
        "hidden_dropout_prob": 0.0,
        "attention_probs_dropout_prob": 0.0,
        "max_position_embeddings": 64,
        "type_vocab_size": 2,
        "layer_norm_eps": 1e-12
    })
}

pub fn tokenizer_json() -> serde_json::Value {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), serde_json::json!(id)))
        .collect();

    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {
            "type": "BertProcessing",
            "sep": ["[SEP]", 3],
            "cls": ["[CLS]", 2]
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    })
}

/// Write config.json, tokenizer.json, vocab.txt and random weights (2-label head)
pub fn write_base_model(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(
        dir.join("config.json"),
        serde_json::to_string_pretty(&bert_config_json())?,
    )?;
    fs::write(
        dir.join("tokenizer.json"),
        serde_json::to_string(&tokenizer_json())?,
    )?;
    fs::write(dir.join("vocab.txt"), VOCAB.join("\n"))?;

    let config: BertConfig = serde_json::from_value(bert_config_json())?;
    BertClassifier::new(&config, 2, &Device::Cpu)?.save_weights(&dir.join("model.safetensors"))?;
    Ok(())
}

pub fn write_corrections(path: &Path, rows: &[(&str, &str)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["text", "label"])?;
    for (text, label) in rows {
        writer.write_record([*text, *label])?;
    }
    writer.flush()?;
    Ok(())
}

pub const SENTIMENT_ROWS: &[(&str, &str)] = &[
    ("great food", "pos"),
    ("awful service", "neg"),
    ("love it", "pos"),
    ("it was okay", "neu"),
    ("great food", "neg"),
];

/// Config pointing at fixtures under `root`; data and output paths are not created
pub fn training_config(root: &Path) -> TrainingConfig {
    TrainingConfig {
        model_dir: root.join("base"),
        hub_fallback: None,
        output_dir: root.join("fine_tuned_v1"),
        csv_path: root.join("corrections.csv"),
        epochs: 2,
        batch_size: 2,
        learning_rate: 1e-3,
        max_length: 8,
        seed: Some(7),
        device: ComputeDevice::Cpu,
    }
}

pub fn artifact_file(config: &TrainingConfig, name: &str) -> PathBuf {
    config.output_dir.join(name)
}
