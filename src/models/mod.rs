// Machine learning models
// BERT encoder, sequence classifier, and base model resolution

pub mod bert;
pub mod classifier;
pub mod common;
pub mod download;
pub mod loader;

/// Tokenizer files copied alongside tokenizer.json when the base model has them
pub const AUX_TOKENIZER_FILES: [&str; 3] = [
    "tokenizer_config.json",
    "special_tokens_map.json",
    "vocab.txt",
];

pub use bert::{BertConfig, BertEncoder, HiddenAct};
pub use classifier::{BertClassifier, WeightReport};
pub use common::SequenceClassifier;
pub use download::ModelDownloader;
pub use loader::{load_dir, BaseModel, FailedAttempt, LoadedModel, ModelLoader, ModelSource};
