use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{Writer, WriterBuilder};

use crate::error::Result;

pub const SUMMARY_HEADER: [&str; 2] = ["train_loss", "validation_loss"];
pub const FULL_HEADER: [&str; 4] = ["train_loss", "photo_loss", "explainability_loss", "smooth_loss"];

/// Tab-delimited progress log. Every row is flushed as soon as it is written,
/// so a crash loses at most the row in flight.
pub struct AppendLog {
    path: PathBuf,
    writer: Writer<File>,
}

impl AppendLog {
    /// Truncates `path` and writes `header` as its first row.
    pub fn create(path: &Path, header: &[&str]) -> Result<AppendLog> {
        let file = File::create(path)?;
        let mut log = AppendLog::from_file(path, file);
        log.writer.write_record(header)?;
        log.writer.flush()?;
        Ok(log)
    }

    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<AppendLog> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(AppendLog::from_file(path, file))
    }

    fn from_file(path: &Path, file: File) -> AppendLog {
        AppendLog {
            path: path.to_path_buf(),
            writer: WriterBuilder::new()
                .delimiter(b'\t')
                .has_headers(false)
                .from_writer(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, row: &[f64]) -> Result<()> {
        self.writer.write_record(row.iter().map(f64::to_string))?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads back the numeric rows of a log written by `AppendLog`, skipping the header.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<f64>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = record
            .iter()
            .map(|field| {
                field.parse::<f64>().map_err(|e| {
                    crate::error::Error::DataSource(format!("{}: {field:?}: {e}", path.display()))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}
