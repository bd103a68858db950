//! Warehouse adapters.
//!
//! The master case table is read through [`HistorySource`]; normalized
//! records go to the staging table through [`RecordSink`]. The file-backed
//! implementations use newline-delimited JSON, one row per line.

use expedientes_core::schema;
use expedientes_core::{CaseHistory, NormalizedRecord};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::SimError;

/// Read side: the case histories used to bootstrap the registry.
pub trait HistorySource {
    fn load(&self) -> Result<Vec<CaseHistory>, SimError>;
}

/// Write side: the append-only staging table.
pub trait RecordSink {
    fn append(&mut self, record: &NormalizedRecord) -> Result<(), SimError>;

    fn flush(&mut self) -> Result<(), SimError> {
        Ok(())
    }
}

/// Case histories stored as JSON lines.
#[derive(Debug, Clone)]
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HistorySource for JsonlHistory {
    /// Unreadable rows are skipped with a warning.
    fn load(&self) -> Result<Vec<CaseHistory>, SimError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut histories = Vec::new();
        let mut skipped = 0usize;

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CaseHistory>(&line) {
                Ok(history) => histories.push(history),
                Err(e) => {
                    skipped += 1;
                    warn!(path = %self.path.display(), line = number + 1, error = %e, "skipping unreadable case row");
                }
            }
        }

        info!(path = %self.path.display(), cases = histories.len(), skipped, "loaded case histories");
        Ok(histories)
    }
}

/// Histories held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory(pub Vec<CaseHistory>);

impl HistorySource for MemoryHistory {
    fn load(&self) -> Result<Vec<CaseHistory>, SimError> {
        Ok(self.0.clone())
    }
}

/// Staging table stored as JSON lines.
///
/// The file must already exist: opening never creates it, and every write
/// appends.
pub struct JsonlTable {
    path: PathBuf,
    writer: BufWriter<File>,
    appended: u64,
}

impl JsonlTable {
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().append(true).open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SimError::TableNotFound(path.clone()),
            _ => SimError::Io(e),
        })?;
        debug!(path = %path.display(), "staging table opened for append");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            appended: 0,
        })
    }

    /// Rows appended through this handle.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every row of a table file.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<NormalizedRecord>, SimError> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(serde_json::from_str(&line)?);
            }
        }
        Ok(records)
    }
}

impl RecordSink for JsonlTable {
    fn append(&mut self, record: &NormalizedRecord) -> Result<(), SimError> {
        let row = serde_json::to_value(record)?;
        schema::validate_row(&row)?;

        let mut line = serde_json::to_vec(&row)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.appended += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SimError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Staging table held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    rows: Vec<NormalizedRecord>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[NormalizedRecord] {
        &self.rows
    }
}

impl RecordSink for MemoryTable {
    fn append(&mut self, record: &NormalizedRecord) -> Result<(), SimError> {
        self.rows.push(record.clone());
        Ok(())
    }
}
