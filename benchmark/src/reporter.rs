// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Report output: timestamped JSON suites and per-message CSV files.

use crate::metrics::BenchmarkReport;
use crate::records::CsvRow;
use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Failed to write report output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON reporter for benchmark results.
pub struct JsonReporter {
    /// Output directory for benchmark data
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create a new JSON reporter with the specified output directory.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// Save a benchmark report to a JSON file.
    ///
    /// Returns the path to the created file.
    pub fn save(&self, report: &BenchmarkReport) -> Result<PathBuf, ReporterError> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
        let category = report
            .results
            .first()
            .map(|r| r.category.to_string())
            .unwrap_or_else(|| "mixed".to_string());

        let filename = format!("{}_{}.json", category, timestamp);
        let filepath = self.output_dir.join(&filename);

        let file = File::create(&filepath)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report)?;
        writer.flush()?;

        tracing::info!(path = %filepath.display(), results = report.results.len(), "Saved JSON report");
        Ok(filepath)
    }
}

/// Streams records of one kind to a CSV file, header first.
pub struct CsvReporter<R: CsvRow> {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: usize,
    _row: PhantomData<fn(&R)>,
}

impl<R: CsvRow> CsvReporter<R> {
    /// Create (or truncate) `path` and write the header line.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{}", R::HEADER)?;
        Ok(Self {
            path,
            writer,
            rows: 0,
            _row: PhantomData,
        })
    }

    pub fn write(&mut self, record: &R) -> Result<(), ReporterError> {
        record.write_row(&mut self.writer)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush buffered rows and return the file path.
    pub fn finish(mut self) -> Result<PathBuf, ReporterError> {
        self.writer.flush()?;
        tracing::info!(path = %self.path.display(), rows = self.rows, "Wrote CSV results");
        Ok(self.path)
    }
}
