//! Read dumps back from an output directory.

use super::provider::{DataError, HistoryRow, HistoryTable, MetadataRecord};
use crate::symbol::Symbol;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// What is on disk for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpEntry {
    pub symbol: Symbol,
    pub has_json: bool,
    pub has_csv: bool,
    pub row_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub chronological: bool,
    /// `longName`, falling back to `shortName`.
    pub name: Option<String>,
    pub size_bytes: u64,
    /// Set when either file failed to parse.
    pub problem: Option<String>,
}

impl DumpEntry {
    pub fn is_complete(&self) -> bool {
        self.has_json && self.has_csv && self.problem.is_none() && self.row_count > 0
    }
}

/// Parse `{dir}/{SYMBOL}.csv` back into a table.
pub fn load_history(dir: &Path, symbol: &Symbol) -> Result<HistoryTable, DataError> {
    let path = dir.join(symbol.csv_file_name());
    let read_err = |message: String| DataError::ReadError {
        path: path.clone(),
        message,
    };

    let mut reader = csv::Reader::from_path(&path).map_err(|e| read_err(e.to_string()))?;
    let rows = reader
        .deserialize::<HistoryRow>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| read_err(e.to_string()))?;

    Ok(HistoryTable::new(symbol.clone(), rows))
}

/// Parse `{dir}/{SYMBOL}.json` back into a record.
pub fn load_metadata(dir: &Path, symbol: &Symbol) -> Result<MetadataRecord, DataError> {
    let path = dir.join(symbol.json_file_name());
    let content = fs::read_to_string(&path).map_err(|e| DataError::ReadError {
        path: path.clone(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| DataError::ReadError {
        path,
        message: e.to_string(),
    })
}

/// Inspect every `*.json` / `*.csv` dump in `dir`, sorted by symbol.
///
/// Files whose stem is not a valid symbol (including `.tmp` leftovers) are ignored.
pub fn scan(dir: &Path) -> Result<Vec<DumpEntry>, DataError> {
    let entries = fs::read_dir(dir).map_err(|e| DataError::ReadError {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut symbols = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| DataError::ReadError {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        let is_dump = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json") | Some("csv")
        );
        if !is_dump {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        // Only exact matches: "voo.csv" would otherwise alias "VOO.csv".
        if let Ok(symbol) = Symbol::parse(stem) {
            if symbol.as_str() == stem {
                symbols.insert(symbol);
            }
        }
    }

    Ok(symbols.into_iter().map(|s| inspect(dir, s)).collect())
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

fn inspect(dir: &Path, symbol: Symbol) -> DumpEntry {
    let json_path = dir.join(symbol.json_file_name());
    let csv_path = dir.join(symbol.csv_file_name());
    let json_size = file_size(&json_path);
    let csv_size = file_size(&csv_path);

    let mut entry = DumpEntry {
        has_json: json_size.is_some(),
        has_csv: csv_size.is_some(),
        size_bytes: json_size.unwrap_or(0) + csv_size.unwrap_or(0),
        row_count: 0,
        first_date: None,
        last_date: None,
        chronological: true,
        name: None,
        problem: None,
        symbol,
    };

    if entry.has_json {
        match load_metadata(dir, &entry.symbol) {
            Ok(meta) => {
                entry.name = meta
                    .get_str("longName")
                    .or_else(|| meta.get_str("shortName"))
                    .map(str::to_string);
            }
            Err(e) => entry.problem = Some(e.to_string()),
        }
    }

    if entry.has_csv {
        match load_history(dir, &entry.symbol) {
            Ok(table) => {
                entry.row_count = table.len();
                entry.first_date = table.first_date();
                entry.last_date = table.last_date();
                entry.chronological = table.is_chronological();
            }
            Err(e) => entry.problem = Some(e.to_string()),
        }
    }

    entry
}
