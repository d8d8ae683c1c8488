// Batch collation: stack examples into device tensors

use candle_core::{DType, Device, Tensor};

use super::dataset::TokenizedDataset;
use crate::errors::{PipelineError, Result};

/// Stacked model inputs for one optimizer step
#[derive(Debug)]
pub struct Batch {
    /// [b, max_len] u32
    pub input_ids: Tensor,
    /// [b, max_len] u32, 1 for real tokens
    pub attention_mask: Tensor,
    /// [b, max_len] u32 zeros (single segment)
    pub token_type_ids: Tensor,
    /// [b] u32
    pub labels: Tensor,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }
}

/// Gather `indices` from the dataset into one batch on `device`
pub fn collate(dataset: &TokenizedDataset, indices: &[usize], device: &Device) -> Result<Batch> {
    if indices.is_empty() {
        return Err(PipelineError::training("cannot collate an empty batch"));
    }

    let batch_size = indices.len();
    let seq_len = dataset.max_length();
    let mut ids_flat = Vec::with_capacity(batch_size * seq_len);
    let mut mask_flat = Vec::with_capacity(batch_size * seq_len);
    let mut labels = Vec::with_capacity(batch_size);

    for &idx in indices {
        let example = dataset.get(idx).ok_or_else(|| {
            PipelineError::training(format!(
                "batch index {} out of range for dataset of {}",
                idx,
                dataset.len()
            ))
        })?;
        ids_flat.extend_from_slice(example.token_ids());
        mask_flat.extend_from_slice(example.attention_mask());
        labels.push(example.label_id());
    }

    let to_err =
        |e: candle_core::Error| PipelineError::training(format!("Failed to build batch: {}", e));

    Ok(Batch {
        input_ids: Tensor::from_vec(ids_flat, (batch_size, seq_len), device).map_err(to_err)?,
        attention_mask: Tensor::from_vec(mask_flat, (batch_size, seq_len), device).map_err(to_err)?,
        token_type_ids: Tensor::zeros((batch_size, seq_len), DType::U32, device).map_err(to_err)?,
        labels: Tensor::from_vec(labels, batch_size, device).map_err(to_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::{records, CharEncoder};
    use crate::data::LabelSpace;

    fn dataset() -> TokenizedDataset {
        let records = records(&[("ab", "b"), ("cde", "a"), ("f", "b")]);
        let space = LabelSpace::from_labels(["a", "b"]);
        TokenizedDataset::build(&records, &space, &CharEncoder(3)).unwrap()
    }

    #[test]
    fn test_collate_shapes_and_order() {
        let batch = collate(&dataset(), &[2, 0], &Device::Cpu).unwrap();

        assert_eq!(batch.size(), 2);
        assert_eq!(batch.input_ids.dims(), &[2, 3]);
        assert_eq!(batch.token_type_ids.dims(), &[2, 3]);
        assert_eq!(batch.labels.to_vec1::<u32>().unwrap(), vec![1, 1]);
        assert_eq!(
            batch.attention_mask.to_vec2::<u32>().unwrap(),
            vec![vec![1, 0, 0], vec![1, 1, 0]]
        );
        assert_eq!(
            batch.token_type_ids.to_vec2::<u32>().unwrap(),
            vec![vec![0, 0, 0], vec![0, 0, 0]]
        );
    }

    #[test]
    fn test_out_of_range_index_fails() {
        assert!(collate(&dataset(), &[0, 9], &Device::Cpu).is_err());
        assert!(collate(&dataset(), &[], &Device::Cpu).is_err());
    }
}
