//! Batch fetcher: for each symbol, fetch metadata and history and dump both.
//!
//! Symbols are processed strictly in order, one at a time. Each symbol's
//! outcome is captured as a `Result`; under [`FailurePolicy::Continue`] a
//! failure is recorded and the batch moves on, under [`FailurePolicy::Abort`]
//! the first failure ends the run.

use super::output::OutputDir;
use super::provider::{DataError, DataProvider, Period};
use super::rate_limit::Pacer;
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What to do when one symbol fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and fetch the remaining symbols.
    #[default]
    Continue,
    /// Stop at the first failure.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOptions {
    pub period: Period,
    pub failure_policy: FailurePolicy,
}

/// Files written for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFiles {
    pub json: PathBuf,
    pub csv: PathBuf,
    pub rows: usize,
}

/// Result of processing one symbol.
#[derive(Debug)]
pub struct SymbolOutcome {
    pub symbol: Symbol,
    pub result: Result<SymbolFiles, DataError>,
}

/// Summary of a batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<SymbolOutcome>,
}

impl BatchSummary {
    fn with_total(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn record(&mut self, symbol: Symbol, result: Result<SymbolFiles, DataError>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(_) => self.failed += 1,
        }
        self.outcomes.push(SymbolOutcome { symbol, result });
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Symbol, &DataError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.symbol, e)))
    }

    /// Error recorded for `symbol`, if it failed.
    pub fn error_for(&self, symbol: &Symbol) -> Option<&DataError> {
        self.failures().find(|(s, _)| *s == symbol).map(|(_, e)| e)
    }

    pub fn succeeded_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| &o.symbol)
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("output directory does not exist: {}", path.display())]
    OutputDirMissing { path: PathBuf },

    /// The failing symbol's error is the last outcome in `summary`.
    #[error("batch aborted at {symbol}")]
    Aborted {
        symbol: Symbol,
        /// Everything processed up to and including the failing symbol.
        summary: BatchSummary,
    },
}

/// Progress callback for multi-symbol operations.
pub trait DownloadProgress {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, symbol: &Symbol, index: usize, total: usize);

    /// Called when a symbol fetch completes.
    fn on_complete(
        &self,
        symbol: &Symbol,
        index: usize,
        total: usize,
        result: &Result<SymbolFiles, DataError>,
    );

    /// Called when the entire batch is done (or aborted).
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Prints each symbol as it is fetched, then a one-line summary.
pub struct StdoutProgress;

impl DownloadProgress for StdoutProgress {
    fn on_start(&self, symbol: &Symbol, index: usize, total: usize) {
        println!("[{}/{}] {symbol}", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &Symbol,
        _index: usize,
        _total: usize,
        result: &Result<SymbolFiles, DataError>,
    ) {
        match result {
            Ok(files) => println!("  OK: {symbol} ({} rows)", files.rows),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nFetch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// Reports nothing.
pub struct SilentProgress;

impl DownloadProgress for SilentProgress {
    fn on_start(&self, _symbol: &Symbol, _index: usize, _total: usize) {}

    fn on_complete(
        &self,
        _symbol: &Symbol,
        _index: usize,
        _total: usize,
        _result: &Result<SymbolFiles, DataError>,
    ) {
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

/// Sequential fetch-and-persist loop over a symbol list.
pub struct BatchFetcher<'a> {
    provider: &'a dyn DataProvider,
    pacer: Pacer,
    options: BatchOptions,
}

impl<'a> BatchFetcher<'a> {
    pub fn new(provider: &'a dyn DataProvider, pacer: Pacer, options: BatchOptions) -> Self {
        Self {
            provider,
            pacer,
            options,
        }
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// Fetch every symbol into `output_dir`.
    ///
    /// The directory is checked once, before any request; it is never created.
    pub fn run(
        &mut self,
        symbols: &[Symbol],
        output_dir: &Path,
        progress: &dyn DownloadProgress,
    ) -> Result<BatchSummary, BatchError> {
        let out = OutputDir::open(output_dir).map_err(|_| BatchError::OutputDirMissing {
            path: output_dir.to_path_buf(),
        })?;

        let total = symbols.len();
        let mut summary = BatchSummary::with_total(total);
        tracing::info!(
            provider = self.provider.name(),
            limiter = self.pacer.limiter_name(),
            period = %self.options.period,
            output_dir = %out.root().display(),
            total,
            "starting batch"
        );

        for (i, symbol) in symbols.iter().enumerate() {
            self.pacer.pause();
            progress.on_start(symbol, i, total);

            let result = self.fetch_one(&out, symbol);
            progress.on_complete(symbol, i, total, &result);

            match &result {
                Ok(files) => {
                    self.pacer.record_success();
                    tracing::info!(%symbol, rows = files.rows, "symbol done");
                }
                Err(e) => {
                    if e.is_throttling() {
                        self.pacer.record_throttled();
                    }
                    tracing::warn!(%symbol, error = %e, "symbol failed");
                }
            }

            let failed = result.is_err();
            summary.record(symbol.clone(), result);
            if failed && self.options.failure_policy == FailurePolicy::Abort {
                progress.on_batch_complete(summary.succeeded, summary.failed, total);
                return Err(BatchError::Aborted {
                    symbol: symbol.clone(),
                    summary,
                });
            }

            // Bail out early if the circuit breaker tripped
            if !self.provider.is_available() {
                tracing::warn!(
                    remaining = total - i - 1,
                    "provider unavailable, skipping remaining symbols"
                );
                for sym in &symbols[(i + 1)..] {
                    summary.record(sym.clone(), Err(DataError::CircuitBreakerTripped));
                }
                break;
            }
        }

        progress.on_batch_complete(summary.succeeded, summary.failed, total);
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            waited_ms = self.pacer.total_waited().as_millis() as u64,
            "batch complete"
        );

        Ok(summary)
    }

    /// Metadata first, then history. A history failure leaves the JSON behind.
    fn fetch_one(&self, out: &OutputDir, symbol: &Symbol) -> Result<SymbolFiles, DataError> {
        let info = self.provider.get_info(symbol)?;
        let json = out.write_metadata(symbol, &info)?;

        let history = self.provider.get_history(symbol, self.options.period)?;
        let csv = out.write_history(symbol, &history)?;

        Ok(SymbolFiles {
            json,
            csv,
            rows: history.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_serde() {
        let p: FailurePolicy = serde_json::from_str("\"abort\"").unwrap();
        assert_eq!(p, FailurePolicy::Abort);
        assert_eq!(FailurePolicy::default(), FailurePolicy::Continue);
    }

    #[test]
    fn summary_counts_and_failures() {
        let mut summary = BatchSummary::with_total(2);
        let voo = Symbol::parse("VOO").unwrap();
        let vti = Symbol::parse("VTI").unwrap();
        summary.record(
            voo.clone(),
            Ok(SymbolFiles {
                json: "VOO.json".into(),
                csv: "VOO.csv".into(),
                rows: 3,
            }),
        );
        summary.record(
            vti.clone(),
            Err(DataError::SymbolNotFound {
                symbol: "VTI".into(),
            }),
        );

        assert!(!summary.all_succeeded());
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        let failed: Vec<&Symbol> = summary.failures().map(|(s, _)| s).collect();
        assert_eq!(failed, vec![&vti]);
        assert!(matches!(
            summary.error_for(&vti),
            Some(DataError::SymbolNotFound { .. })
        ));
        assert!(summary.error_for(&voo).is_none());
        let ok: Vec<&Symbol> = summary.succeeded_symbols().collect();
        assert_eq!(ok, vec![&voo]);
    }

    #[test]
    fn empty_batch_succeeds() {
        assert!(BatchSummary::with_total(0).all_succeeded());
    }
}
