// Correction store appender
//
// Reviewers record one corrected label at a time. Rows are appended to the
// table the pipeline later trains from.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::validator::{required_columns, LABEL_COLUMN, TEXT_COLUMN};
use crate::errors::{PipelineError, Result};

/// Append-only handle on the correction table
pub struct CorrectionStore {
    path: PathBuf,
}

impl CorrectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one correction, creating the table when absent
    pub fn append(&self, text: &str, label: &str) -> Result<()> {
        let text = text.trim();
        let label = label.trim();
        if text.is_empty() {
            return Err(PipelineError::data("correction text must not be empty"));
        }
        if label.is_empty() {
            return Err(PipelineError::data("correction label must not be empty"));
        }

        let is_new = fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        if is_new {
            self.create_with_row(text, label)?;
        } else {
            self.append_row(text, label)?;
        }

        tracing::debug!(path = %self.path.display(), label, "Appended correction");
        Ok(())
    }

    fn create_with_row(&self, text: &str, label: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let mut writer =
            csv::Writer::from_path(&self.path).map_err(|e| PipelineError::io(&self.path, e))?;
        writer
            .write_record([TEXT_COLUMN, LABEL_COLUMN])
            .map_err(|e| PipelineError::io(&self.path, e))?;
        writer
            .write_record([text, label])
            .map_err(|e| PipelineError::io(&self.path, e))?;
        writer.flush().map_err(|e| PipelineError::io(&self.path, e))
    }

    fn append_row(&self, text: &str, label: &str) -> Result<()> {
        let source = self.path.display().to_string();

        let headers: Vec<String> = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .and_then(|mut reader| reader.headers().cloned())
            .map_err(|e| {
                PipelineError::config(format!(
                    "Correction table {} is not a readable CSV table: {}",
                    source, e
                ))
            })?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let (text_idx, label_idx) = required_columns(&headers, &source)?;

        let mut row = vec![""; headers.len()];
        row[text_idx] = text;
        row[label_idx] = label;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PipelineError::io(&self.path, e))?;

        if !ends_with_newline(&mut file).map_err(|e| PipelineError::io(&self.path, e))? {
            file.write_all(b"\n")
                .map_err(|e| PipelineError::io(&self.path, e))?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(&row)
            .map_err(|e| PipelineError::io(&self.path, e))?;
        writer.flush().map_err(|e| PipelineError::io(&self.path, e))
    }
}

fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
