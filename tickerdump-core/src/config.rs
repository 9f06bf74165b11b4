//! Serializable fetch configuration.
//!
//! Everything a batch needs that used to be hard-coded: output directory,
//! symbol list, lookback, adjustment, failure policy, pacing and provider
//! tunables. Every field has a default, so an empty file is a valid config.

use crate::data::batch::{BatchOptions, FailurePolicy};
use crate::data::circuit_breaker::CircuitBreaker;
use crate::data::provider::Period;
use crate::data::rate_limit::{InvalidRateLimit, Pacer, RateLimitConfig};
use crate::data::universe::{Universe, UniverseError, DEFAULT_SYMBOLS};
use crate::data::yahoo::YahooConfig;
use crate::symbol::{Symbol, SymbolError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OUTPUT_DIR: &str = "data/yf";

/// Retries beyond this only sit at the backoff cap.
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    RateLimit(#[from] InvalidRateLimit),

    #[error("invalid provider setting: {0}")]
    Provider(String),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    Universe(#[from] UniverseError),
}

/// Top-level configuration for a `fetch` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Must already exist; the fetcher never creates it.
    pub output_dir: PathBuf,

    /// Explicit symbol list. Empty means "fall through to universe/defaults".
    pub symbols: Vec<String>,

    pub period: Period,

    /// Scale OHLC by adjclose/close.
    pub auto_adjust: bool,

    pub failure_policy: FailurePolicy,

    pub rate_limit: RateLimitConfig,

    pub provider: ProviderSettings,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            symbols: Vec::new(),
            period: Period::Max,
            auto_adjust: true,
            failure_policy: FailurePolicy::Continue,
            rate_limit: RateLimitConfig::default(),
            provider: ProviderSettings::default(),
        }
    }
}

/// HTTP client and circuit breaker tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub breaker_cooldown_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        let yahoo = YahooConfig::default();
        Self {
            max_retries: yahoo.max_retries,
            base_retry_delay_ms: yahoo.base_retry_delay.as_millis() as u64,
            timeout_secs: yahoo.timeout.as_secs(),
            breaker_cooldown_secs: CircuitBreaker::DEFAULT_COOLDOWN.as_secs(),
        }
    }
}

impl ProviderSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Provider(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.max_retries
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Provider("timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

impl FetchConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string. Validates the rate limiter and
    /// provider settings eagerly.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.rate_limit.build()?;
        config.provider.validate()?;
        Ok(config)
    }

    pub fn yahoo_config(&self) -> YahooConfig {
        YahooConfig {
            max_retries: self.provider.max_retries,
            base_retry_delay: Duration::from_millis(self.provider.base_retry_delay_ms),
            timeout: Duration::from_secs(self.provider.timeout_secs),
            auto_adjust: self.auto_adjust,
            ..YahooConfig::default()
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(Duration::from_secs(self.provider.breaker_cooldown_secs))
    }

    pub fn pacer(&self) -> Result<Pacer, ConfigError> {
        Ok(Pacer::new(self.rate_limit.build()?))
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            period: self.period,
            failure_policy: self.failure_policy,
        }
    }

    /// Decide which symbols to fetch.
    ///
    /// First non-empty source wins: `cli` (positional args or the
    /// `TICKERDUMP_SYMBOLS` variable), then `symbols` from this config, then
    /// the universe (one sector if given), then [`DEFAULT_SYMBOLS`].
    /// Repeats are dropped, keeping the first occurrence.
    pub fn resolve_symbols(
        &self,
        cli: &[String],
        universe: Option<&Universe>,
        sector: Option<&str>,
    ) -> Result<Vec<Symbol>, ConfigError> {
        let symbols = if !cli.is_empty() {
            Symbol::parse_all(cli)?
        } else if !self.symbols.is_empty() {
            Symbol::parse_all(&self.symbols)?
        } else if let Some(universe) = universe {
            universe.symbols(sector)?
        } else {
            Symbol::parse_all(&DEFAULT_SYMBOLS)?
        };

        let mut seen = HashSet::new();
        Ok(symbols
            .into_iter()
            .filter(|s| seen.insert(s.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(symbols: &[Symbol]) -> Vec<&str> {
        symbols.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config = FetchConfig::from_toml("").unwrap();
        assert_eq!(config, FetchConfig::default());
        assert_eq!(config.output_dir, PathBuf::from("data/yf"));
        assert_eq!(config.period, Period::Max);
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.provider.breaker_cooldown_secs, 1800);
    }

    #[test]
    fn full_toml_parses() {
        let config = FetchConfig::from_toml(
            r#"
output_dir = "/tmp/dumps"
symbols = ["voo", "BND"]
period = "5y"
auto_adjust = false
failure_policy = "abort"

[rate_limit]
strategy = "adaptive"
base_delay_secs = 2.0
max_delay_secs = 60.0

[provider]
max_retries = 5
base_retry_delay_ms = 250
timeout_secs = 10
breaker_cooldown_secs = 60
"#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/dumps"));
        assert_eq!(config.period, Period::FiveYears);
        assert!(!config.auto_adjust);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert!(matches!(
            config.rate_limit,
            RateLimitConfig::Adaptive { backoff_factor, .. } if backoff_factor == 2.0
        ));

        let yahoo = config.yahoo_config();
        assert_eq!(yahoo.max_retries, 5);
        assert_eq!(yahoo.base_retry_delay, Duration::from_millis(250));
        assert_eq!(yahoo.timeout, Duration::from_secs(10));
        assert!(!yahoo.auto_adjust);

        let options = config.batch_options();
        assert_eq!(options.failure_policy, FailurePolicy::Abort);
    }

    #[test]
    fn invalid_rate_limit_is_rejected_at_load() {
        let err = FetchConfig::from_toml(
            "[rate_limit]\nstrategy = \"token_bucket\"\ncapacity = 0\nrefill_per_sec = 1.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::RateLimit(_)));
    }

    #[test]
    fn excessive_retries_are_rejected_at_load() {
        let err = FetchConfig::from_toml("[provider]\nmax_retries = 40\n").unwrap_err();
        assert!(matches!(err, ConfigError::Provider(_)));
        assert!(FetchConfig::from_toml("[provider]\nmax_retries = 10\n").is_ok());
        assert!(matches!(
            FetchConfig::from_toml("[provider]\ntimeout_secs = 0\n"),
            Err(ConfigError::Provider(_))
        ));
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        assert!(matches!(
            FetchConfig::from_toml("output_directory = \"x\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn resolve_prefers_cli_then_config_then_universe_then_defaults() {
        let universe = Universe::from_toml("[sectors]\nTech = [\"AAPL\"]\n").unwrap();
        let mut config = FetchConfig::default();

        let defaults = config.resolve_symbols(&[], None, None).unwrap();
        assert_eq!(names(&defaults), DEFAULT_SYMBOLS.to_vec());

        let from_universe = config.resolve_symbols(&[], Some(&universe), None).unwrap();
        assert_eq!(names(&from_universe), vec!["AAPL"]);

        config.symbols = vec!["qqq".into()];
        let from_config = config.resolve_symbols(&[], Some(&universe), None).unwrap();
        assert_eq!(names(&from_config), vec!["QQQ"]);

        let from_cli = config
            .resolve_symbols(&["vti".into()], Some(&universe), None)
            .unwrap();
        assert_eq!(names(&from_cli), vec!["VTI"]);
    }

    #[test]
    fn resolve_drops_repeats_keeping_first() {
        let config = FetchConfig::default();
        let cli: Vec<String> = ["VOO", "vti", "voo", "BND", "VTI"]
            .into_iter()
            .map(String::from)
            .collect();
        let symbols = config.resolve_symbols(&cli, None, None).unwrap();
        assert_eq!(names(&symbols), vec!["VOO", "VTI", "BND"]);
    }

    #[test]
    fn resolve_reports_bad_symbol_and_unknown_sector() {
        let config = FetchConfig::default();
        assert!(matches!(
            config.resolve_symbols(&["A/B".into()], None, None),
            Err(ConfigError::Symbol(_))
        ));

        let universe = Universe::default_etfs();
        assert!(matches!(
            config.resolve_symbols(&[], Some(&universe), Some("Crypto")),
            Err(ConfigError::Universe(UniverseError::UnknownSector(_)))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FetchConfig::from_file(&dir.path().join("absent.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
