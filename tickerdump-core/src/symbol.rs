//! Ticker symbol newtype.
//!
//! A symbol doubles as a file stem in the output directory, so parsing
//! rejects anything that could escape it or collide on case-insensitive
//! filesystems.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,

    #[error("symbol '{symbol}' contains invalid character '{ch}'")]
    InvalidChar { symbol: String, ch: char },
}

/// An exchange ticker, e.g. `VOO`, `BRK-B`, `^GSPC`, `ES=F`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Trim, upper-case and validate a raw ticker string.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        let upper = trimmed.to_ascii_uppercase();
        if let Some(ch) = upper.chars().find(|c| !is_symbol_char(*c)) {
            return Err(SymbolError::InvalidChar { symbol: upper, ch });
        }

        Ok(Self(upper))
    }

    /// Parse a list of tickers, failing on the first invalid one.
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Self>, SymbolError> {
        raw.iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<SYMBOL>.json`
    pub fn json_file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    /// `<SYMBOL>.csv`
    pub fn csv_file_name(&self) -> String {
        format!("{}.csv", self.0)
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '^' | '=' | '_')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let s = Symbol::parse("  voo \n").unwrap();
        assert_eq!(s.as_str(), "VOO");
        assert_eq!(s.json_file_name(), "VOO.json");
        assert_eq!(s.csv_file_name(), "VOO.csv");
    }

    #[test]
    fn accepts_index_and_futures_tickers() {
        for raw in ["^GSPC", "ES=F", "BRK-B", "RDS.A", "EUR_USD"] {
            assert!(Symbol::parse(raw).is_ok(), "{raw} should parse");
        }
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Symbol::parse("   "), Err(SymbolError::Empty));
    }

    #[test]
    fn rejects_path_separators() {
        match Symbol::parse("../etc") {
            Err(SymbolError::InvalidChar { ch, .. }) => assert_eq!(ch, '/'),
            other => panic!("expected InvalidChar, got {other:?}"),
        }
        assert!(Symbol::parse("a\\b").is_err());
    }

    #[test]
    fn serde_goes_through_parse() {
        let s: Symbol = serde_json::from_str("\"vti\"").unwrap();
        assert_eq!(s.as_str(), "VTI");
        assert!(serde_json::from_str::<Symbol>("\"a b\"").is_err());
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"VTI\"");
    }
}
