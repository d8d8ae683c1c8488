// Training loop engine
//
// One run: epochs of shuffled batches, cross-entropy loss, global norm
// clipping, one AdamW step per batch at the scheduled learning rate.
// Any non-finite loss or gradient norm ends the run in `Failed`.

use candle_core::backprop::GradStore;
use candle_core::{Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use super::schedule::LinearSchedule;
use crate::data::{collate, Batch, BatchLoader, TokenizedDataset};
use crate::errors::{PipelineError, Result};
use crate::models::SequenceClassifier;
use crate::pipeline::{PipelineEvent, ProgressSink};

/// Ceiling on the global L2 norm of the gradients of one step
pub const MAX_GRAD_NORM: f64 = 1.0;
pub const ADAM_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Idle,
    /// 1-based epoch and batch currently being processed
    Training { epoch: usize, batch: usize },
    Converged,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub warmup_steps: usize,
}

impl EngineConfig {
    pub fn new(epochs: usize, learning_rate: f64) -> Self {
        Self {
            epochs,
            learning_rate,
            warmup_steps: 0,
        }
    }
}

/// Outcome of one optimizer step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub loss: f64,
    /// Global gradient norm before clipping
    pub grad_norm: f64,
    pub lr: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub mean_loss: f64,
    pub batches: usize,
    pub examples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub epochs: Vec<EpochSummary>,
    pub total_steps: usize,
    pub final_lr: f64,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.mean_loss)
    }
}

/// Owns the model, optimizer and schedule for the duration of one run
pub struct TrainingEngine<M: SequenceClassifier> {
    model: M,
    vars: Vec<Var>,
    optimizer: AdamW,
    schedule: LinearSchedule,
    config: EngineConfig,
    batches_per_epoch: usize,
    device: Device,
    state: EngineState,
}

impl<M: SequenceClassifier> TrainingEngine<M> {
    pub fn new(
        model: M,
        config: EngineConfig,
        batches_per_epoch: usize,
        device: &Device,
    ) -> Result<Self> {
        if config.epochs == 0 {
            return Err(PipelineError::config("epochs must be at least 1"));
        }
        if !config.learning_rate.is_finite() || config.learning_rate <= 0.0 {
            return Err(PipelineError::config(format!(
                "learning rate must be a positive number, got {}",
                config.learning_rate
            )));
        }
        if batches_per_epoch == 0 {
            return Err(PipelineError::data("cannot train on an empty dataset"));
        }

        let vars = model.trainable_vars();
        let optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: config.learning_rate,
                eps: ADAM_EPSILON,
                weight_decay: 0.0,
                ..Default::default()
            },
        )
        .map_err(|e| PipelineError::training(format!("Failed to create optimizer: {}", e)))?;

        let total_steps = config.epochs * batches_per_epoch;
        let schedule = LinearSchedule::new(config.learning_rate, config.warmup_steps, total_steps);

        tracing::debug!(
            params = vars.len(),
            total_steps,
            lr = config.learning_rate,
            "Training engine ready"
        );

        Ok(Self {
            model,
            vars,
            optimizer,
            schedule,
            config,
            batches_per_epoch,
            device: device.clone(),
            state: EngineState::Idle,
        })
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Forward, backward, clip, optimizer step, schedule advance
    pub fn train_step(&mut self, batch: &Batch) -> Result<StepMetrics> {
        let lr = self.schedule.current_lr();
        self.optimizer.set_learning_rate(lr);

        let loss = self
            .model
            .forward_t(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids, true)
            .and_then(|logits| candle_nn::loss::cross_entropy(&logits, &batch.labels))
            .map_err(|e| self.fail(format!("forward pass failed: {}", e)))?;

        let loss_value = loss
            .to_scalar::<f32>()
            .map_err(|e| self.fail(format!("failed to read loss: {}", e)))? as f64;
        if !loss_value.is_finite() {
            return Err(self.fail(format!("loss is not finite ({})", loss_value)));
        }

        let mut grads = loss
            .backward()
            .map_err(|e| self.fail(format!("backward pass failed: {}", e)))?;
        let norm = clip_grad_norm(&mut grads, &self.vars, MAX_GRAD_NORM)
            .map_err(|e| self.fail(format!("gradient clipping failed: {}", e)))?;
        if !norm.is_finite() {
            return Err(self.fail(format!("gradient norm is not finite ({})", norm)));
        }

        self.optimizer
            .step(&grads)
            .map_err(|e| self.fail(format!("optimizer step failed: {}", e)))?;
        self.schedule.advance();

        Ok(StepMetrics {
            loss: loss_value,
            grad_norm: norm,
            lr,
        })
    }

    /// Run every epoch; ends in `Converged` or `Failed`
    pub fn run(
        &mut self,
        dataset: &TokenizedDataset,
        loader: &mut BatchLoader,
        sink: &dyn ProgressSink,
    ) -> Result<TrainingReport> {
        if loader.batches_per_epoch() != self.batches_per_epoch {
            return Err(self.fail(format!(
                "loader yields {} batches per epoch, schedule expects {}",
                loader.batches_per_epoch(),
                self.batches_per_epoch
            )));
        }

        let epochs = self.config.epochs;
        let mut summaries = Vec::with_capacity(epochs);

        for epoch in 1..=epochs {
            let batches = loader.epoch();
            let num_batches = batches.len();
            sink.emit(PipelineEvent::EpochStarted {
                epoch,
                epochs,
                batches: num_batches,
            });

            let mut total_loss = 0.0;
            let mut examples = 0;
            for (i, indices) in batches.iter().enumerate() {
                self.state = EngineState::Training { epoch, batch: i + 1 };

                let batch = collate(dataset, indices, &self.device)
                    .map_err(|e| self.fail(e.to_string()))?;
                let metrics = self.train_step(&batch)?;

                total_loss += metrics.loss;
                examples += batch.size();
                let running_loss = total_loss / (i + 1) as f64;

                sink.emit(PipelineEvent::BatchFinished {
                    epoch,
                    batch: i + 1,
                    batches: num_batches,
                    loss: metrics.loss,
                    running_loss,
                    lr: metrics.lr,
                });
            }

            let mean_loss = total_loss / num_batches as f64;
            tracing::info!(epoch, epochs, mean_loss, examples, "Epoch complete");
            sink.emit(PipelineEvent::EpochFinished {
                epoch,
                epochs,
                mean_loss,
            });

            summaries.push(EpochSummary {
                epoch,
                mean_loss,
                batches: num_batches,
                examples,
            });
        }

        self.state = EngineState::Converged;
        Ok(TrainingReport {
            epochs: summaries,
            total_steps: self.schedule.step(),
            final_lr: self.schedule.current_lr(),
        })
    }

    fn fail(&mut self, reason: String) -> PipelineError {
        tracing::error!(state = ?self.state, "Training failed: {}", reason);
        self.state = EngineState::Failed {
            reason: reason.clone(),
        };
        PipelineError::training(reason)
    }
}

/// Global L2 norm of the gradients of `vars`
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> candle_core::Result<f64> {
    let mut total = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            total += g.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    Ok(total.sqrt())
}

/// Scale gradients so their global L2 norm is at most `max_norm`
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(
    grads: &mut GradStore,
    vars: &[Var],
    max_norm: f64,
) -> candle_core::Result<f64> {
    let norm = grad_norm(grads, vars)?;
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            if let Some(g) = grads.remove(var.as_tensor()) {
                grads.insert(var.as_tensor(), g.affine(scale, 0.0)?);
            }
        }
    }
    Ok(norm)
}
