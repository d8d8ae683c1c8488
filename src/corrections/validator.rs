// Correction table validation
//
// Reads the reviewer correction table and returns the rows that are safe to
// train on. Row order is preserved; the first occurrence of a text wins.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::errors::{file_not_found_error, missing_columns_error, PipelineError, Result};

pub const TEXT_COLUMN: &str = "text";
pub const LABEL_COLUMN: &str = "label";

/// One surviving row of the correction table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionRecord {
    pub text: String,
    pub label: String,
}

impl CorrectionRecord {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

/// Number of surviving rows carrying one label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// What cleaning did to the table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Data rows read (header excluded)
    pub rows_read: usize,
    /// Rows with a missing or blank text or label
    pub dropped_empty: usize,
    /// Rows whose trimmed text was already seen
    pub dropped_duplicate: usize,
    /// Sorted by descending count, then label
    pub label_counts: Vec<LabelCount>,
}

impl ValidationReport {
    pub fn kept(&self) -> usize {
        self.rows_read - self.dropped_empty - self.dropped_duplicate
    }
}

/// Cleaned correction table
#[derive(Debug, Clone)]
pub struct ValidatedCorrections {
    pub texts: Vec<String>,
    pub labels: Vec<String>,
    pub report: ValidationReport,
    /// Hex SHA-256 of the raw table bytes
    pub source_sha256: String,
}

impl ValidatedCorrections {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Surviving rows in table order
    pub fn records(&self) -> Vec<CorrectionRecord> {
        self.texts
            .iter()
            .zip(&self.labels)
            .map(|(text, label)| CorrectionRecord::new(text.as_str(), label.as_str()))
            .collect()
    }
}

/// Load and clean the correction table at `path`
pub fn load_corrections(path: &Path) -> Result<ValidatedCorrections> {
    if !path.is_file() {
        return Err(PipelineError::config(file_not_found_error(
            path,
            "Correction table",
        )));
    }

    let file = fs::File::open(path).map_err(|e| {
        PipelineError::config(format!(
            "Failed to open correction table {}: {}",
            path.display(),
            e
        ))
    })?;

    let validated = validate_reader(file, &path.display().to_string())?;

    tracing::info!(
        path = %path.display(),
        rows_read = validated.report.rows_read,
        kept = validated.len(),
        dropped_empty = validated.report.dropped_empty,
        dropped_duplicate = validated.report.dropped_duplicate,
        "Validated correction table"
    );
    for entry in &validated.report.label_counts {
        tracing::info!(label = %entry.label, count = entry.count, "Label frequency");
    }

    Ok(validated)
}

/// Clean a correction table from any reader; `source` names it in errors
pub fn validate_reader<R: Read>(mut reader: R, source: &str) -> Result<ValidatedCorrections> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw).map_err(|e| {
        PipelineError::config(format!("Failed to read correction table {}: {}", source, e))
    })?;
    let source_sha256 = format!("{:x}", Sha256::digest(&raw));

    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(raw.as_slice());

    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(|e| {
            PipelineError::config(format!(
                "Failed to read header of correction table {}: {}",
                source, e
            ))
        })?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let (text_idx, label_idx) = required_columns(&headers, source)?;

    let mut texts = Vec::new();
    let mut labels = Vec::new();
    let mut seen = HashSet::new();
    let mut report = ValidationReport::default();

    for (row, record) in csv_reader.records().enumerate() {
        // Row 1 is the header
        let record = record.map_err(|e| {
            PipelineError::data(format!(
                "Malformed row {} in correction table {}: {}",
                row + 2,
                source,
                e
            ))
        })?;
        report.rows_read += 1;

        let text = record.get(text_idx).map(str::trim).unwrap_or("");
        let label = record.get(label_idx).map(str::trim).unwrap_or("");
        if text.is_empty() || label.is_empty() {
            report.dropped_empty += 1;
            continue;
        }
        if !seen.insert(text.to_string()) {
            report.dropped_duplicate += 1;
            continue;
        }

        texts.push(text.to_string());
        labels.push(label.to_string());
    }

    if texts.is_empty() {
        return Err(PipelineError::data(format!(
            "No usable corrections in {} ({} rows read, {} with empty text or label, {} duplicates)",
            source, report.rows_read, report.dropped_empty, report.dropped_duplicate
        )));
    }

    report.label_counts = count_labels(&labels);

    Ok(ValidatedCorrections {
        texts,
        labels,
        report,
        source_sha256,
    })
}

/// Positions of the `text` and `label` columns in a header row
pub(crate) fn required_columns(headers: &[String], source: &str) -> Result<(usize, usize)> {
    let text_idx = headers.iter().position(|h| h == TEXT_COLUMN);
    let label_idx = headers.iter().position(|h| h == LABEL_COLUMN);

    match (text_idx, label_idx) {
        (Some(t), Some(l)) => Ok((t, l)),
        (t, l) => {
            let mut missing = Vec::new();
            if t.is_none() {
                missing.push(TEXT_COLUMN);
            }
            if l.is_none() {
                missing.push(LABEL_COLUMN);
            }
            Err(PipelineError::config(missing_columns_error(
                source, &missing, headers,
            )))
        }
    }
}

fn count_labels(labels: &[String]) -> Vec<LabelCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for label in labels {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }

    let mut counts: Vec<LabelCount> = counts
        .into_iter()
        .map(|(label, count)| LabelCount {
            label: label.to_string(),
            count,
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    counts
}
