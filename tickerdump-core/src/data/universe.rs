//! Universe configuration: sector-organized ticker lists.
//!
//! Stored as TOML with one array of tickers per sector:
//!
//! ```toml
//! [sectors]
//! "Bond ETFs" = ["BND", "BNDX"]
//! "Equity ETFs" = ["VOO", "VTI"]
//! ```

use crate::symbol::{Symbol, SymbolError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("read universe file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse universe TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize universe: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown sector '{0}'")]
    UnknownSector(String),

    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

/// The complete universe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub sectors: BTreeMap<String, Vec<String>>,
}

impl Universe {
    /// Load a universe from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let content = std::fs::read_to_string(path).map_err(|source| UniverseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a universe from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, UniverseError> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize the universe to TOML.
    pub fn to_toml(&self) -> Result<String, UniverseError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// All tickers across all sectors, in sector-name order.
    pub fn all_tickers(&self) -> Vec<&str> {
        self.sectors
            .values()
            .flat_map(|tickers| tickers.iter().map(|t| t.as_str()))
            .collect()
    }

    pub fn sector_tickers(&self, sector: &str) -> Option<&[String]> {
        self.sectors.get(sector).map(|v| v.as_slice())
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.sectors.keys().map(|s| s.as_str()).collect()
    }

    pub fn ticker_count(&self) -> usize {
        self.sectors.values().map(|v| v.len()).sum()
    }

    /// Parsed symbols for one sector, or for the whole universe.
    pub fn symbols(&self, sector: Option<&str>) -> Result<Vec<Symbol>, UniverseError> {
        match sector {
            Some(name) => {
                let tickers = self
                    .sector_tickers(name)
                    .ok_or_else(|| UniverseError::UnknownSector(name.to_string()))?;
                Ok(Symbol::parse_all(tickers)?)
            }
            None => Ok(Symbol::parse_all(&self.all_tickers())?),
        }
    }

    /// The built-in fund list fetched when nothing else is configured.
    pub fn default_etfs() -> Self {
        let mut sectors = BTreeMap::new();

        sectors.insert(
            "Equity ETFs".into(),
            ["VOO", "VTI", "VXUS", "QQQ", "VUG", "VEA"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        sectors.insert(
            "Bond ETFs".into(),
            ["BND", "BNDX"].into_iter().map(String::from).collect(),
        );

        Self { sectors }
    }
}

/// Order in which the built-in list is fetched.
pub const DEFAULT_SYMBOLS: [&str; 8] = ["VOO", "VTI", "VXUS", "BND", "BNDX", "QQQ", "VUG", "VEA"];
