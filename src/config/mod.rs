// Configuration module
// Public interface for configuration loading

mod backend;
mod loader;
mod settings;

pub use backend::{device_label, ComputeDevice};
pub use loader::{load_config, parse_config};
pub use settings::{TrainingConfig, DEFAULT_CSV_PATH};
