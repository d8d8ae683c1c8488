// Epoch-wise shuffled batching over dataset indices

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::errors::{PipelineError, Result};

/// Produces a fresh permutation of `0..len` per epoch, split into batches
pub struct BatchLoader {
    len: usize,
    batch_size: usize,
    rng: StdRng,
}

impl BatchLoader {
    /// `seed` makes every epoch's order reproducible; `None` draws from entropy
    pub fn new(len: usize, batch_size: usize, seed: Option<u64>) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::config("batch size must be at least 1"));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            len,
            batch_size,
            rng,
        })
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.len.div_ceil(self.batch_size)
    }

    /// Index groups for the next epoch; the last may be short
    pub fn epoch(&mut self) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.len).collect();
        indices.shuffle(&mut self.rng);
        indices
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}
