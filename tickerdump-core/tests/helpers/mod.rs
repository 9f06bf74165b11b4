//! Scripted in-memory provider shared by the integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tickerdump_core::data::{
    DataError, DataProvider, HistoryRow, HistoryTable, MetadataRecord, Period,
};
use tickerdump_core::Symbol;

/// Which call should fail for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    Info,
    History,
    /// History fails with `RateLimited` and the provider goes unavailable.
    Ban,
    /// History fails with `RateLimited`, provider stays available.
    Throttle,
}

#[derive(Default)]
pub struct MockProvider {
    failures: HashMap<String, Fail>,
    info_calls: AtomicUsize,
    history_calls: AtomicUsize,
    banned: AtomicBool,
    log: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, symbol: &str, fail: Fail) -> Self {
        self.failures.insert(symbol.to_string(), fail);
        self
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.info_calls() + self.history_calls()
    }

    /// `"info:VOO"`, `"history:VOO"`, ... in call order.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn fail_for(&self, symbol: &Symbol) -> Option<Fail> {
        self.failures.get(symbol.as_str()).copied()
    }
}

impl DataProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn get_info(&self, symbol: &Symbol) -> Result<MetadataRecord, DataError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("info:{symbol}"));
        if self.fail_for(symbol) == Some(Fail::Info) {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        Ok(metadata(symbol))
    }

    fn get_history(&self, symbol: &Symbol, _period: Period) -> Result<HistoryTable, DataError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("history:{symbol}"));
        match self.fail_for(symbol) {
            Some(Fail::History) => Err(DataError::ResponseFormatChanged(
                "missing chart.result".into(),
            )),
            Some(Fail::Ban) => {
                self.banned.store(true, Ordering::SeqCst);
                Err(DataError::RateLimited {
                    retry_after_secs: 60,
                })
            }
            Some(Fail::Throttle) => Err(DataError::RateLimited {
                retry_after_secs: 1,
            }),
            _ => Ok(history(symbol, 5)),
        }
    }

    fn is_available(&self) -> bool {
        !self.banned.load(Ordering::SeqCst)
    }
}

pub fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

pub fn syms(list: &[&str]) -> Vec<Symbol> {
    list.iter().map(|s| sym(s)).collect()
}

/// Keys deliberately inserted out of order.
pub fn metadata(symbol: &Symbol) -> MetadataRecord {
    let mut meta = MetadataRecord::new();
    meta.insert("symbol", serde_json::json!(symbol.as_str()));
    meta.insert("longName", serde_json::json!(format!("{symbol} Fund")));
    meta.insert("currency", serde_json::json!("USD"));
    meta.insert("totalAssets", serde_json::json!(1.5e12));
    meta.insert("beta3Year", serde_json::Value::Null);
    meta
}

/// `rows` consecutive calendar days starting 2024-01-02.
pub fn history(symbol: &Symbol, rows: u32) -> HistoryTable {
    let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let rows = (0..rows)
        .map(|i| {
            let close = 100.0 + f64::from(i);
            HistoryRow {
                date: start + chrono::Duration::days(i64::from(i)),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000 + u64::from(i),
                dividends: if i == 2 { 0.25 } else { 0.0 },
                stock_splits: 0.0,
            }
        })
        .collect();
    HistoryTable::new(symbol.clone(), rows)
}
