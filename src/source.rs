//! Static Source Reader
//!
//! Streams rows from a CSV export, validates each one, and hands the valid
//! subset to the publisher once the file is exhausted. One-shot: the job ends
//! after a single publish attempt.

use csv::StringRecord;
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::bus::BusClient;
use crate::publisher::{BatchPublishError, Publisher};
use crate::record::{validate_row, RawRow, TransactionRecord};

/// Default location of the CSV export
pub const DEFAULT_INPUT_PATH: &str = "data/43114_txs.csv";

/// Errors that can occur reading the source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Cannot open source {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("I/O error reading row {row}: {source}")]
    Read { row: usize, source: csv::Error },

    #[error("Source reader task failed: {0}")]
    Join(String),
}

/// Errors that end a file ingestion job
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Publish(#[from] BatchPublishError),
}

/// A CSV file opened for a single front-to-back pass
pub struct CsvSource {
    reader: csv::Reader<File>,
    headers: StringRecord,
    path: String,
}

impl CsvSource {
    /// Open the file and read its header row
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let display = path.display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_path(path)
            .map_err(|source| SourceError::Open {
                path: display.clone(),
                source,
            })?;
        let headers = reader
            .headers()
            .map_err(|source| SourceError::Open {
                path: display.clone(),
                source,
            })?
            .clone();

        Ok(Self {
            reader,
            headers,
            path: display,
        })
    }

    /// Column names from the header row
    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Path the source was opened from
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Lazily yield rows as field-name to value maps
    ///
    /// A row that cannot be decoded (e.g. invalid UTF-8) is yielded as
    /// `Ok(None)` so the caller can count it; I/O errors are yielded as errors.
    pub fn rows(&mut self) -> impl Iterator<Item = Result<Option<RawRow>, SourceError>> + '_ {
        let headers = &self.headers;
        self.reader
            .records()
            .enumerate()
            .map(move |(index, result)| match result {
                Ok(record) => Ok(Some(row_from_record(headers, &record))),
                Err(source) if source.is_io_error() => Err(SourceError::Read {
                    row: index + 1,
                    source,
                }),
                Err(e) => {
                    warn!(row = index + 1, error = %e, "Unreadable row");
                    Ok(None)
                }
            })
    }
}

/// Zip a CSV record with the header names. Short rows simply lack the
/// trailing fields.
pub fn row_from_record(headers: &StringRecord, record: &StringRecord) -> RawRow {
    headers
        .iter()
        .zip(record.iter())
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect()
}

/// Valid records of one source pass plus row accounting
#[derive(Debug, Clone, Default)]
pub struct ValidatedBatch {
    pub records: Vec<TransactionRecord>,
    /// Rows read, valid or not
    pub rows: usize,
    /// Rows dropped (unreadable or invalid)
    pub skipped: usize,
}

/// Summary of a finished ingestion job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub rows: usize,
    pub valid: usize,
    pub skipped: usize,
    pub published: usize,
    pub chunks: usize,
}

/// Read and validate every row of the file (blocking)
pub fn read_valid_records(path: &Path) -> Result<ValidatedBatch, SourceError> {
    let mut source = CsvSource::open(path)?;
    let mut batch = ValidatedBatch::default();

    for (index, row) in source.rows().enumerate() {
        batch.rows += 1;
        let Some(row) = row? else {
            batch.skipped += 1;
            continue;
        };

        match validate_row(&row) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                warn!(row = index + 1, error = %e, "Invalid data");
                batch.skipped += 1;
            }
        }
    }

    Ok(batch)
}

/// Read and validate the file on the blocking pool so other tasks keep running
pub async fn load_records(path: PathBuf) -> Result<ValidatedBatch, SourceError> {
    tokio::task::spawn_blocking(move || read_valid_records(&path))
        .await
        .map_err(|e| SourceError::Join(e.to_string()))?
}

/// Run the one-shot file job: read, validate, then publish everything once
///
/// Invalid rows never fail the job. It fails only when the source cannot be
/// read or a chunk write fails.
pub async fn run_file_ingest<B: BusClient>(
    path: &Path,
    publisher: &Publisher<B>,
) -> Result<IngestReport, IngestError> {
    info!(path = %path.display(), "Reading transactions");
    let batch = load_records(path.to_path_buf()).await?;
    info!(
        rows = batch.rows,
        valid = batch.records.len(),
        skipped = batch.skipped,
        "Source exhausted"
    );

    let published = publisher.publish_batch(&batch.records).await?;

    Ok(IngestReport {
        rows: batch.rows,
        valid: batch.records.len(),
        skipped: batch.skipped,
        published: published.records,
        chunks: published.chunks,
    })
}
