// Retune - fine-tune a text classifier from reviewer corrections
// Library exports

pub mod config;
pub mod corrections; // Correction table validation and appending
pub mod data; // Label space, tokenized dataset, batching
pub mod errors;
pub mod models; // BERT encoder and base model loading
pub mod pipeline; // Staged fine-tuning run
pub mod training; // Training loop and artifact persistence
