// Training module - training loop, schedule, and artifact persistence

pub mod artifact;
pub mod engine;
pub mod inspect;
pub mod schedule;

pub use artifact::{
    read_label_mapping, read_metadata, ArtifactMetadata, ArtifactSummary, ArtifactWriter,
    LABEL_MAPPING_FILE, METADATA_FILE,
};
pub use engine::{
    clip_grad_norm, grad_norm, EngineConfig, EngineState, EpochSummary, StepMetrics,
    TrainingEngine, TrainingReport, ADAM_EPSILON, MAX_GRAD_NORM,
};
pub use inspect::{inspect_artifact, ArtifactInspection};
pub use schedule::LinearSchedule;
