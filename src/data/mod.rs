// Training data: label space, tokenized dataset, batching

mod batcher;
mod dataset;
mod label_space;
mod loader;

pub use batcher::{collate, Batch};
pub use dataset::{EncodedText, FixedLengthEncoder, TextEncoder, TokenizedDataset, TrainingExample};
pub use label_space::LabelSpace;
pub use loader::BatchLoader;
