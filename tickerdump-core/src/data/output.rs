//! Per-symbol dump files in a pre-existing output directory.
//!
//! Layout: `{output_dir}/{SYMBOL}.json` and `{output_dir}/{SYMBOL}.csv`
//!
//! Writes are atomic (write to .tmp, rename into place), so re-running a
//! batch replaces files wholesale and a crash never leaves half a file.

use super::provider::{DataError, HistoryTable, MetadataRecord};
use crate::symbol::Symbol;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// CSV header, date column first.
pub const CSV_HEADER: [&str; 8] = [
    "Date",
    "Open",
    "High",
    "Low",
    "Close",
    "Volume",
    "Dividends",
    "Stock Splits",
];

/// A validated, existing output directory.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    /// Verify the directory exists. Never creates it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DataError> {
        let root = path.into();
        if !root.is_dir() {
            return Err(DataError::OutputDirMissing { path: root });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn json_path(&self, symbol: &Symbol) -> PathBuf {
        self.root.join(symbol.json_file_name())
    }

    pub fn csv_path(&self, symbol: &Symbol) -> PathBuf {
        self.root.join(symbol.csv_file_name())
    }

    /// Pretty JSON, 4-space indent, keys sorted.
    pub fn write_metadata(
        &self,
        symbol: &Symbol,
        metadata: &MetadataRecord,
    ) -> Result<PathBuf, DataError> {
        let path = self.json_path(symbol);
        let json = metadata_to_json(metadata).map_err(|e| DataError::WriteError {
            path: path.clone(),
            message: format!("serialize metadata: {e}"),
        })?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    /// CSV with [`CSV_HEADER`], one row per trading day.
    pub fn write_history(
        &self,
        symbol: &Symbol,
        history: &HistoryTable,
    ) -> Result<PathBuf, DataError> {
        let path = self.csv_path(symbol);
        let csv = history_to_csv(history).map_err(|e| DataError::WriteError {
            path: path.clone(),
            message: format!("serialize history: {e}"),
        })?;
        write_atomic(&path, &csv)?;
        Ok(path)
    }
}

/// Render a metadata record the way the dump files store it.
pub fn metadata_to_json(metadata: &MetadataRecord) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    metadata.serialize(&mut ser)?;
    Ok(buf)
}

/// Render a history table the way the dump files store it.
pub fn history_to_csv(history: &HistoryTable) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    // Written explicitly so an empty table still carries the header.
    writer.write_record(CSV_HEADER)?;
    for row in &history.rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, bytes).map_err(|e| DataError::WriteError {
        path: tmp_path.clone(),
        message: e.to_string(),
    })?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::WriteError {
            path: path.to_path_buf(),
            message: format!("atomic rename failed: {e}"),
        }
    })
}
