// Tokenized training set
//
// Every record is encoded once, up front, to a fixed-length id sequence and
// attention mask. Examples are immutable after construction.

use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::label_space::LabelSpace;
use crate::corrections::CorrectionRecord;
use crate::errors::{PipelineError, Result};

/// Fixed-length encoding of one text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedText {
    pub token_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

/// Turns text into fixed-length model inputs
pub trait TextEncoder {
    /// Output length of every encoding
    fn max_length(&self) -> usize;

    fn encode(&self, text: &str) -> Result<EncodedText>;
}

/// `tokenizers::Tokenizer` padded and truncated to a fixed length
pub struct FixedLengthEncoder {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl FixedLengthEncoder {
    /// Configure a private copy of `tokenizer`; the caller's instance is untouched
    pub fn new(tokenizer: &Tokenizer, max_length: usize) -> Result<Self> {
        if max_length == 0 {
            return Err(PipelineError::config("max length must be at least 1"));
        }

        let mut tokenizer = tokenizer.clone();
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| PipelineError::config(format!("Invalid truncation settings: {}", e)))?;

        // Keep the base model's pad token when it declares one
        let (pad_id, pad_token) = match tokenizer.get_padding() {
            Some(existing) => (existing.pad_id, existing.pad_token.clone()),
            None => match tokenizer.token_to_id("[PAD]") {
                Some(id) => (id, "[PAD]".to_string()),
                None => (0, "[PAD]".to_string()),
            },
        };
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            pad_id,
            pad_token,
            ..Default::default()
        }));

        Ok(Self {
            tokenizer,
            max_length,
        })
    }
}

impl TextEncoder for FixedLengthEncoder {
    fn max_length(&self) -> usize {
        self.max_length
    }

    fn encode(&self, text: &str) -> Result<EncodedText> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| PipelineError::data(format!("Tokenization failed: {}", e)))?;

        let token_ids = encoding.get_ids().to_vec();
        let attention_mask = encoding.get_attention_mask().to_vec();
        if token_ids.len() != self.max_length || attention_mask.len() != self.max_length {
            return Err(PipelineError::data(format!(
                "Tokenizer produced {} tokens, expected {}",
                token_ids.len(),
                self.max_length
            )));
        }

        Ok(EncodedText {
            token_ids,
            attention_mask,
        })
    }
}

/// One encoded correction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingExample {
    token_ids: Vec<u32>,
    attention_mask: Vec<u32>,
    label_id: u32,
}

impl TrainingExample {
    pub fn token_ids(&self) -> &[u32] {
        &self.token_ids
    }

    pub fn attention_mask(&self) -> &[u32] {
        &self.attention_mask
    }

    pub fn label_id(&self) -> u32 {
        self.label_id
    }
}

/// Indexed, read-only set of training examples
#[derive(Debug, Clone)]
pub struct TokenizedDataset {
    examples: Vec<TrainingExample>,
    max_length: usize,
}

impl TokenizedDataset {
    /// Encode every record; row numbers in errors are 0-based record indices
    pub fn build(
        records: &[CorrectionRecord],
        label_space: &LabelSpace,
        encoder: &dyn TextEncoder,
    ) -> Result<Self> {
        let mut examples = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            let label_id = label_space.id(&record.label).ok_or_else(|| {
                PipelineError::data(format!(
                    "Record {} has label '{}' outside the label space",
                    row, record.label
                ))
            })?;
            let encoded = encoder
                .encode(&record.text)
                .map_err(|e| PipelineError::data(format!("Record {}: {}", row, e)))?;

            examples.push(TrainingExample {
                token_ids: encoded.token_ids,
                attention_mask: encoded.attention_mask,
                label_id,
            });
        }

        tracing::debug!(
            examples = examples.len(),
            max_length = encoder.max_length(),
            "Built tokenized dataset"
        );

        Ok(Self {
            examples,
            max_length: encoder.max_length(),
        })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrainingExample> {
        self.examples.get(index)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One id per character, padded with zeros
    pub(crate) struct CharEncoder(pub usize);

    impl TextEncoder for CharEncoder {
        fn max_length(&self) -> usize {
            self.0
        }

        fn encode(&self, text: &str) -> Result<EncodedText> {
            let mut token_ids: Vec<u32> = text.chars().take(self.0).map(|c| c as u32).collect();
            let mut attention_mask = vec![1; token_ids.len()];
            token_ids.resize(self.0, 0);
            attention_mask.resize(self.0, 0);
            Ok(EncodedText {
                token_ids,
                attention_mask,
            })
        }
    }

    pub(crate) fn records(rows: &[(&str, &str)]) -> Vec<CorrectionRecord> {
        rows.iter()
            .map(|(text, label)| CorrectionRecord::new(*text, *label))
            .collect()
    }

    #[test]
    fn test_dataset_encodes_every_record() {
        let records = records(&[("ab", "pos"), ("abcdef", "neg"), ("x", "pos")]);
        let space = LabelSpace::from_labels(records.iter().map(|r| &r.label));
        let dataset = TokenizedDataset::build(&records, &space, &CharEncoder(4)).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.max_length(), 4);

        let first = dataset.get(0).unwrap();
        assert_eq!(first.token_ids(), &[97, 98, 0, 0]);
        assert_eq!(first.attention_mask(), &[1, 1, 0, 0]);
        assert_eq!(first.label_id(), 1);

        // Truncated
        assert_eq!(dataset.get(1).unwrap().attention_mask(), &[1, 1, 1, 1]);
        assert_eq!(dataset.get(1).unwrap().label_id(), 0);
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn test_unknown_label_rejected() {
        let space = LabelSpace::from_labels(["neg"]);
        let err = TokenizedDataset::build(&records(&[("a", "pos")]), &space, &CharEncoder(2))
            .unwrap_err();
        assert_eq!(err.kind(), "DataValidationError");
    }

    #[test]
    fn test_zero_max_length_is_configuration_error() {
        let tokenizer = Tokenizer::new(tokenizers::models::wordlevel::WordLevel::default());
        let err = FixedLengthEncoder::new(&tokenizer, 0).err().unwrap();
        assert_eq!(err.kind(), "ConfigurationError");
    }
}
