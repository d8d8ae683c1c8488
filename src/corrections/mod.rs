// Reviewer correction table: validation for training, appending for reviewers

mod store;
mod validator;

pub use store::CorrectionStore;
pub use validator::{
    load_corrections, validate_reader, CorrectionRecord, LabelCount, ValidatedCorrections,
    ValidationReport, LABEL_COLUMN, TEXT_COLUMN,
};
