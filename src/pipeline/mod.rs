// Pipeline orchestrator
//
// Four ordered stages, each consuming the previous stage's output:
// load model -> load training data -> fine-tune -> write artifact.
// The first failure stops the run. Nothing is retried or rolled back.

mod progress;

pub use progress::{PipelineEvent, ProgressSink, TracingSink};

use candle_core::Device;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{device_label, TrainingConfig};
use crate::corrections::{load_corrections, ValidationReport};
use crate::data::{BatchLoader, FixedLengthEncoder, LabelSpace, TokenizedDataset};
use crate::errors::{PipelineError, Result};
use crate::models::{BaseModel, BertClassifier, ModelLoader};
use crate::training::{
    ArtifactMetadata, ArtifactSummary, ArtifactWriter, EngineConfig, EngineState, TrainingEngine,
    TrainingReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadModel,
    LoadTrainingData,
    FineTune,
    WriteArtifact,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::LoadModel,
        Stage::LoadTrainingData,
        Stage::FineTune,
        Stage::WriteArtifact,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::LoadModel => "load model",
            Stage::LoadTrainingData => "load training data",
            Stage::FineTune => "fine-tune",
            Stage::WriteArtifact => "write artifact",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    Failed,
}

/// Outcome of one stage, for the run summary
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub detail: String,
    pub elapsed: Duration,
}

/// Output of "load training data"
pub struct TrainingData {
    pub report: ValidationReport,
    pub label_space: LabelSpace,
    pub dataset: TokenizedDataset,
    pub source_sha256: String,
}

/// Output of "fine-tune"
pub struct TrainedClassifier {
    pub classifier: BertClassifier,
    pub report: TrainingReport,
}

/// A run that completed all four stages
#[derive(Debug)]
pub struct PipelineOutcome {
    pub records: Vec<StageRecord>,
    pub artifact: ArtifactSummary,
    pub training: TrainingReport,
    pub label_space: LabelSpace,
}

/// A run that stopped at `stage`
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: Stage,
    pub error: PipelineError,
    /// Records of the stages that ran, the failing one last
    pub records: Vec<StageRecord>,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage '{}' failed with {}: {}",
            self.stage,
            self.error.kind(),
            self.error
        )
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// One fine-tuning run bound to a device
pub struct Pipeline<'a> {
    config: TrainingConfig,
    device: Device,
    seed: u64,
    sink: &'a dyn ProgressSink,
}

impl<'a> Pipeline<'a> {
    /// Validate settings, pick the device and check the output path before any stage runs
    pub fn new(config: TrainingConfig, sink: &'a dyn ProgressSink) -> Result<Self> {
        config.validate()?;
        ArtifactWriter::new(&config.output_dir).ensure_fresh()?;
        let device = config.device.open()?;
        // Recorded in metadata so an unseeded run can be replayed
        let seed = config.seed.unwrap_or_else(rand::random);

        Ok(Self {
            config,
            device,
            seed,
            sink,
        })
    }

    pub fn run(self) -> std::result::Result<PipelineOutcome, PipelineFailure> {
        let mut records = Vec::with_capacity(Stage::ALL.len());

        let base = self.stage(Stage::LoadModel, &mut records, || self.load_model())?;
        let data = self.stage(Stage::LoadTrainingData, &mut records, || {
            self.load_training_data(&base)
        })?;
        let trained = self.stage(Stage::FineTune, &mut records, || {
            self.fine_tune(&base, &data)
        })?;
        let artifact = self.stage(Stage::WriteArtifact, &mut records, || {
            self.write_artifact(&base, &data, &trained)
        })?;

        Ok(PipelineOutcome {
            records,
            artifact,
            training: trained.report,
            label_space: data.label_space,
        })
    }

    fn stage<T>(
        &self,
        stage: Stage,
        records: &mut Vec<StageRecord>,
        run: impl FnOnce() -> Result<(T, String)>,
    ) -> std::result::Result<T, PipelineFailure> {
        self.sink.emit(PipelineEvent::StageStarted { stage });
        let started = Instant::now();

        match run() {
            Ok((output, detail)) => {
                let elapsed = started.elapsed();
                self.sink.emit(PipelineEvent::StageFinished {
                    stage,
                    detail: detail.clone(),
                    elapsed,
                });
                records.push(StageRecord {
                    stage,
                    status: StageStatus::Succeeded,
                    detail,
                    elapsed,
                });
                Ok(output)
            }
            Err(error) => {
                tracing::error!(stage = %stage, kind = error.kind(), "Stage failed: {}", error);
                self.sink.emit(PipelineEvent::StageFailed {
                    stage,
                    kind: error.kind(),
                    message: error.to_string(),
                });
                records.push(StageRecord {
                    stage,
                    status: StageStatus::Failed,
                    detail: error.to_string(),
                    elapsed: started.elapsed(),
                });
                Err(PipelineFailure {
                    stage,
                    error,
                    records: std::mem::take(records),
                })
            }
        }
    }

    fn load_model(&self) -> Result<(BaseModel, String)> {
        let loaded = ModelLoader::from_config(&self.config).load(&self.device, self.sink)?;

        if loaded.used_fallback() {
            tracing::warn!(
                source = %loaded.source,
                "Using fallback base model; its label space may not match the correction labels"
            );
            self.sink.emit(PipelineEvent::FallbackUsed {
                source: loaded.source.to_string(),
                failed: loaded
                    .failed_attempts
                    .iter()
                    .map(|a| a.source.to_string())
                    .collect(),
            });
        }

        let model = loaded.model;
        let detail = format!(
            "{} from {} ({} layers, hidden {}, {} tensors)",
            model.config.model_type,
            model.source_id,
            model.config.num_hidden_layers,
            model.config.hidden_size,
            model.tensors.len()
        );
        Ok((model, detail))
    }

    fn load_training_data(&self, base: &BaseModel) -> Result<(TrainingData, String)> {
        let max_positions = base.config.max_position_embeddings;
        if self.config.max_length > max_positions {
            return Err(PipelineError::config(format!(
                "max length {} exceeds the {} positions {} supports",
                self.config.max_length, max_positions, base.source_id
            )));
        }

        let corrections = load_corrections(&self.config.csv_path)?;
        let label_space = LabelSpace::from_labels(&corrections.labels);

        self.sink.emit(PipelineEvent::LabelSummary {
            labels: corrections
                .report
                .label_counts
                .iter()
                .map(|c| (c.label.clone(), c.count))
                .collect(),
        });

        let encoder = FixedLengthEncoder::new(&base.tokenizer, self.config.max_length)?;
        let dataset = TokenizedDataset::build(&corrections.records(), &label_space, &encoder)?;

        let detail = format!(
            "{} samples, {} labels [{}] ({} empty, {} duplicate rows dropped)",
            dataset.len(),
            label_space.len(),
            label_space.labels().join(", "),
            corrections.report.dropped_empty,
            corrections.report.dropped_duplicate
        );
        Ok((
            TrainingData {
                report: corrections.report,
                label_space,
                dataset,
                source_sha256: corrections.source_sha256,
            },
            detail,
        ))
    }

    fn fine_tune(
        &self,
        base: &BaseModel,
        data: &TrainingData,
    ) -> Result<(TrainedClassifier, String)> {
        let (classifier, _weights) =
            BertClassifier::from_pretrained(base, data.label_space.len(), &self.device)?;

        let mut loader =
            BatchLoader::new(data.dataset.len(), self.config.batch_size, Some(self.seed))?;
        let mut engine = TrainingEngine::new(
            classifier,
            EngineConfig::new(self.config.epochs, self.config.learning_rate),
            loader.batches_per_epoch(),
            &self.device,
        )?;

        tracing::info!(
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            batches_per_epoch = loader.batches_per_epoch(),
            lr = self.config.learning_rate,
            seed = self.seed,
            "Starting fine-tuning"
        );

        let report = engine.run(&data.dataset, &mut loader, self.sink)?;
        if engine.state() != &EngineState::Converged {
            return Err(PipelineError::training(format!(
                "training ended in state {:?}",
                engine.state()
            )));
        }

        let detail = format!(
            "{} epochs, {} steps, final mean loss {:.4}",
            report.epochs.len(),
            report.total_steps,
            report.final_loss().unwrap_or(f64::NAN)
        );
        Ok((
            TrainedClassifier {
                classifier: engine.into_model(),
                report,
            },
            detail,
        ))
    }

    fn write_artifact(
        &self,
        base: &BaseModel,
        data: &TrainingData,
        trained: &TrainedClassifier,
    ) -> Result<(ArtifactSummary, String)> {
        let metadata = ArtifactMetadata {
            created: chrono::Local::now().to_rfc3339(),
            source_model: base.source_id.clone(),
            training_epochs: self.config.epochs,
            learning_rate: self.config.learning_rate,
            batch_size: self.config.batch_size,
            max_length: self.config.max_length,
            device: device_label(&self.device),
            training_samples: data.dataset.len(),
            model_type: base.config.model_type.clone(),
            num_labels: data.label_space.len(),
            label_mapping: data.label_space.clone(),
            seed: Some(self.seed),
            training_data_sha256: Some(data.source_sha256.clone()),
        };

        let summary = ArtifactWriter::new(&self.config.output_dir).write(
            &trained.classifier,
            base,
            &metadata,
            self.sink,
        )?;
        let detail = format!(
            "{} files in {}",
            summary.files.len(),
            summary.output_dir.display()
        );
        Ok((summary, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let names: Vec<&str> = Stage::ALL.iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec!["load model", "load training data", "fine-tune", "write artifact"]
        );
    }

    #[test]
    fn test_invalid_config_rejected_before_any_stage() {
        let config = TrainingConfig {
            epochs: 0,
            ..TrainingConfig::default()
        };
        let err = Pipeline::new(config, &()).err().unwrap();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn test_failure_display_names_stage() {
        let failure = PipelineFailure {
            stage: Stage::LoadTrainingData,
            error: PipelineError::config("table missing"),
            records: Vec::new(),
        };
        assert_eq!(
            failure.to_string(),
            "stage 'load training data' failed with ConfigurationError: table missing"
        );
    }
}
