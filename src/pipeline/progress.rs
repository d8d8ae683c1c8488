// Progress events emitted while a pipeline runs
//
// The core never prints. Presentation layers subscribe through ProgressSink.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use super::Stage;

/// Structured progress event
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
    },
    StageFinished {
        stage: Stage,
        detail: String,
        elapsed: Duration,
    },
    StageFailed {
        stage: Stage,
        kind: &'static str,
        message: String,
    },
    /// A later source in the base model chain was used
    FallbackUsed {
        source: String,
        failed: Vec<String>,
    },
    DownloadingFile {
        repo_id: String,
        file: String,
    },
    /// Label frequencies of the cleaned table, most frequent first
    LabelSummary {
        labels: Vec<(String, usize)>,
    },
    EpochStarted {
        epoch: usize,
        epochs: usize,
        batches: usize,
    },
    BatchFinished {
        epoch: usize,
        batch: usize,
        batches: usize,
        loss: f64,
        running_loss: f64,
        lr: f64,
    },
    EpochFinished {
        epoch: usize,
        epochs: usize,
        mean_loss: f64,
    },
    ArtifactFile {
        path: PathBuf,
    },
}

/// Receiver of pipeline events
pub trait ProgressSink {
    fn emit(&self, event: PipelineEvent);
}

/// Discards every event
impl ProgressSink for () {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Forwards events to a channel; a dropped receiver is ignored
impl ProgressSink for mpsc::Sender<PipelineEvent> {
    fn emit(&self, event: PipelineEvent) {
        self.send(event).ok();
    }
}

/// Logs events through tracing, for runs without a terminal
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage } => {
                tracing::info!(stage = %stage, "Stage started")
            }
            PipelineEvent::StageFinished {
                stage,
                detail,
                elapsed,
            } => {
                let elapsed_ms = elapsed.as_millis() as u64;
                tracing::info!(stage = %stage, elapsed_ms, "{}", detail)
            }
            PipelineEvent::StageFailed { stage, kind, message } => {
                tracing::error!(stage = %stage, kind, "{}", message)
            }
            PipelineEvent::BatchFinished {
                epoch,
                batch,
                batches,
                loss,
                running_loss,
                lr,
            } => {
                tracing::debug!(epoch, batch, batches, loss, running_loss, lr, "Batch finished")
            }
            PipelineEvent::EpochFinished { epoch, epochs, mean_loss } => {
                tracing::info!(epoch, epochs, mean_loss, "Epoch finished")
            }
            other => tracing::debug!(event = ?other, "Pipeline event"),
        }
    }
}
