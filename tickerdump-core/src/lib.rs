//! tickerdump core: fetch per-symbol metadata and daily history from a market
//! data provider and dump them as `<SYMBOL>.json` / `<SYMBOL>.csv`.
//!
//! - Symbol parsing and validation
//! - Provider trait with a Yahoo Finance implementation
//! - Circuit breaker and pluggable rate limiters
//! - Atomic JSON/CSV output and inventory of existing dumps
//! - Batch fetcher with per-symbol results
//! - TOML configuration and symbol resolution

pub mod config;
pub mod data;
pub mod symbol;

pub use config::{ConfigError, FetchConfig, ProviderSettings};
pub use symbol::{Symbol, SymbolError};
