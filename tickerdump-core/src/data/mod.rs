//! Data fetching and persistence: provider abstraction, Yahoo Finance client,
//! pacing, output files, and the batch fetcher that ties them together.

pub mod batch;
pub mod circuit_breaker;
pub mod inventory;
pub mod output;
pub mod provider;
pub mod rate_limit;
pub mod universe;
pub mod yahoo;

pub use batch::{
    BatchError, BatchFetcher, BatchOptions, BatchSummary, DownloadProgress, FailurePolicy,
    SilentProgress, StdoutProgress, SymbolFiles, SymbolOutcome,
};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use inventory::{load_history, load_metadata, scan, DumpEntry};
pub use output::{OutputDir, CSV_HEADER};
pub use provider::{DataError, DataProvider, HistoryRow, HistoryTable, MetadataRecord, Period};
pub use rate_limit::{
    AdaptiveBackoff, FixedDelay, InvalidRateLimit, Pacer, RateLimitConfig, RateLimiter,
    TokenBucket,
};
pub use universe::{Universe, UniverseError, DEFAULT_SYMBOLS};
pub use yahoo::{YahooConfig, YahooEndpoints, YahooProvider};
