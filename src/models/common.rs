// Common model traits

use candle_core::{Tensor, Var};
use std::path::Path;

use crate::errors::Result;

/// A trainable text classifier producing one logit per label
///
/// This is the seam the training engine drives: it needs a differentiable
/// forward pass, the parameters to optimize, and a way to persist them.
pub trait SequenceClassifier {
    /// Logits `[b, num_labels]`; `train` enables dropout
    fn forward_t(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor>;

    /// Every parameter the optimizer updates
    fn trainable_vars(&self) -> Vec<Var>;

    fn num_labels(&self) -> usize;

    /// Write all parameters to a safetensors file
    fn save_weights(&self, path: &Path) -> Result<()>;
}
