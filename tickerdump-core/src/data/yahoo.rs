//! Yahoo Finance data provider.
//!
//! History comes from the v8 chart API; metadata from the v10 quoteSummary
//! API, which additionally needs a session cookie and a crumb token. Both go
//! through one request path that handles retries with exponential backoff
//! and feeds the circuit breaker.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataProvider, HistoryRow, HistoryTable, MetadataRecord, Period};
use crate::symbol::Symbol;
use chrono::NaiveDate;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const QUOTE_SUMMARY_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Upper bound on a single backoff sleep between retries.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// quoteSummary modules merged into the metadata record, in precedence order.
const INFO_MODULES: [&str; 7] = [
    "quoteType",
    "price",
    "summaryDetail",
    "defaultKeyStatistics",
    "financialData",
    "assetProfile",
    "summaryProfile",
];

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
    events: Option<ChartEvents>,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds.
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: HashMap<String, DividendEvent>,
    #[serde(default)]
    splits: HashMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

/// Yahoo Finance v10 quoteSummary API response.
#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryResult,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResult {
    result: Option<Vec<serde_json::Map<String, Value>>>,
    error: Option<ApiError>,
}

/// Base URLs the provider talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YahooEndpoints {
    pub chart: String,
    pub quote_summary: String,
    /// Any page that sets the session cookie.
    pub cookie: String,
    pub crumb: String,
}

impl Default for YahooEndpoints {
    fn default() -> Self {
        Self {
            chart: CHART_URL.into(),
            quote_summary: QUOTE_SUMMARY_URL.into(),
            cookie: COOKIE_URL.into(),
            crumb: CRUMB_URL.into(),
        }
    }
}

impl YahooEndpoints {
    /// All endpoints on one host, under Yahoo's own API paths.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            chart: format!("{base}/v8/finance/chart"),
            quote_summary: format!("{base}/v10/finance/quoteSummary"),
            cookie: format!("{base}/"),
            crumb: format!("{base}/v1/test/getcrumb"),
        }
    }
}

/// Tunables for [`YahooProvider`].
#[derive(Debug, Clone)]
pub struct YahooConfig {
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub timeout: Duration,
    /// Scale OHLC by adjclose/close so prices reflect splits and dividends.
    pub auto_adjust: bool,
    pub endpoints: YahooEndpoints,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            auto_adjust: true,
            endpoints: YahooEndpoints::default(),
        }
    }
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: Client,
    circuit_breaker: Arc<CircuitBreaker>,
    config: YahooConfig,
    crumb: Mutex<Option<String>>,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        Self::with_config(circuit_breaker, YahooConfig::default())
    }

    pub fn with_config(
        circuit_breaker: Arc<CircuitBreaker>,
        config: YahooConfig,
    ) -> Result<Self, DataError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            config,
            crumb: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &YahooConfig {
        &self.config
    }

    /// Build the chart API URL for a symbol and lookback.
    fn chart_url(&self, symbol: &Symbol, period: Period) -> String {
        format!(
            "{}/{symbol}?range={period}&interval=1d\
             &events=div%7Csplit&includeAdjustedClose=true",
            self.config.endpoints.chart
        )
    }

    fn quote_summary_url(&self, symbol: &Symbol, crumb: &str) -> Result<String, DataError> {
        let base = format!("{}/{symbol}", self.config.endpoints.quote_summary);
        let modules = INFO_MODULES.join(",");
        reqwest::Url::parse_with_params(
            &base,
            &[
                ("modules", modules.as_str()),
                ("formatted", "false"),
                ("crumb", crumb),
            ],
        )
        .map(String::from)
        .map_err(|e| DataError::Other(format!("bad quoteSummary url for {symbol}: {e}")))
    }

    /// Parse the chart API response into ascending history rows.
    fn parse_chart(
        symbol: &Symbol,
        resp: ChartResponse,
        auto_adjust: bool,
    ) -> Result<Vec<HistoryRow>, DataError> {
        let result = resp.chart.result.ok_or_else(|| api_error(symbol, resp.chart.error))?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

        let Some(timestamps) = data.timestamp else {
            // Yahoo omits timestamps entirely for symbols with no trading days.
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        };

        let offset = data.meta.map_or(0, |m| m.gmtoffset);
        let to_date = |ts: i64| -> Result<NaiveDate, DataError> {
            chrono::DateTime::from_timestamp(ts + offset, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))
        };

        let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let events = data.events.unwrap_or_default();
        let mut dividends: HashMap<NaiveDate, f64> = HashMap::new();
        for div in events.dividends.values() {
            *dividends.entry(to_date(div.date)?).or_default() += div.amount;
        }
        let mut splits: HashMap<NaiveDate, f64> = HashMap::new();
        for split in events.splits.values() {
            if split.denominator != 0.0 {
                splits.insert(to_date(split.date)?, split.numerator / split.denominator);
            }
        }

        // Keyed by date: a trailing intraday row can repeat the last session's date.
        let mut by_date: BTreeMap<NaiveDate, HistoryRow> = BTreeMap::new();

        for (i, &ts) in timestamps.iter().enumerate() {
            let date = to_date(ts)?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();
            let adj_close = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten());

            // Skip rows where all OHLCV are None (holidays/non-trading days)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            let mut row = HistoryRow {
                date,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(0),
                dividends: dividends.get(&date).copied().unwrap_or(0.0),
                stock_splits: splits.get(&date).copied().unwrap_or(0.0),
            };

            if auto_adjust {
                if let Some(adj) = adj_close {
                    if row.close.is_finite() && row.close != 0.0 {
                        let ratio = adj / row.close;
                        row.open *= ratio;
                        row.high *= ratio;
                        row.low *= ratio;
                        row.close = adj;
                    }
                }
            }

            by_date.insert(date, row);
        }

        if by_date.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(by_date.into_values().collect())
    }

    /// Flatten the quoteSummary modules into one record.
    fn parse_quote_summary(
        symbol: &Symbol,
        resp: QuoteSummaryResponse,
    ) -> Result<MetadataRecord, DataError> {
        let result = resp
            .quote_summary
            .result
            .ok_or_else(|| api_error(symbol, resp.quote_summary.error))?;

        let modules = result.into_iter().next().ok_or_else(|| DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;

        let mut record = MetadataRecord::new();
        for name in INFO_MODULES {
            let Some(Value::Object(fields)) = modules.get(name) else {
                continue;
            };
            for (key, value) in fields {
                if key == "maxAge" || record.contains_key(key) {
                    continue;
                }
                record.insert(key.clone(), unwrap_raw(value.clone()));
            }
        }

        if record.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if !record.contains_key("symbol") {
            record.insert("symbol", Value::String(symbol.to_string()));
        }

        Ok(record)
    }

    fn lock_crumb(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.crumb.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached crumb, fetching cookie + crumb on first use.
    fn crumb(&self) -> Result<String, DataError> {
        if let Some(crumb) = self.lock_crumb().as_ref() {
            return Ok(crumb.clone());
        }

        // fc.yahoo.com answers 404 but still sets the session cookie.
        self.client
            .get(&self.config.endpoints.cookie)
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let resp = self
            .client
            .get(&self.config.endpoints.crumb)
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after(&resp),
            });
        }
        if !status.is_success() {
            return Err(DataError::AuthenticationRequired(format!(
                "crumb request failed with HTTP {status}"
            )));
        }

        let crumb = resp
            .text()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?
            .trim()
            .to_string();
        if crumb.is_empty() || crumb.contains('<') {
            return Err(DataError::AuthenticationRequired(
                "Yahoo returned no usable crumb".into(),
            ));
        }

        tracing::debug!("obtained Yahoo crumb");
        *self.lock_crumb() = Some(crumb.clone());
        Ok(crumb)
    }

    fn fetch_info_once(&self, symbol: &Symbol) -> Result<MetadataRecord, DataError> {
        let crumb = self.crumb()?;
        let url = self.quote_summary_url(symbol, &crumb)?;
        let resp = self.get_with_retry(symbol, &url)?;
        let summary: QuoteSummaryResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!(
                "failed to parse quoteSummary for {symbol}: {e}"
            ))
        })?;
        Self::parse_quote_summary(symbol, summary)
    }

    /// Execute a GET with retry and circuit breaker logic.
    fn get_with_retry(&self, symbol: &Symbol, url: &str) -> Result<Response, DataError> {
        if !self.circuit_breaker.is_allowed() {
            tracing::warn!(
                %symbol,
                cooldown_left_secs = self.circuit_breaker.remaining_cooldown().as_secs(),
                "circuit breaker open, refusing request"
            );
            return Err(DataError::CircuitBreakerTripped);
        }

        tracing::debug!(%symbol, url, "GET");
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = retry_delay(self.config.base_retry_delay, attempt);
                tracing::warn!(
                    %symbol,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = ?last_error,
                    "retrying request"
                );
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == StatusCode::FORBIDDEN {
                // IP ban: stop talking to Yahoo for the cooldown.
                self.circuit_breaker.trip();
                return Err(DataError::CircuitBreakerTripped);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: retry_after(&resp),
                });
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(DataError::AuthenticationRequired(
                    "Yahoo Finance rejected the session".into(),
                ));
            }

            if status == StatusCode::NOT_FOUND {
                return Err(DataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }

            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::Other(format!("HTTP {status} for {symbol}")));
                continue;
            }

            self.circuit_breaker.record_success();
            return Ok(resp);
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

fn api_error(symbol: &Symbol, error: Option<ApiError>) -> DataError {
    match error {
        Some(err) if err.code == "Not Found" => DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        Some(err) => DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
        None => DataError::ResponseFormatChanged("empty result with no error".into()),
    }
}

/// Exponential backoff before retry `attempt` (1-based), capped at [`MAX_RETRY_DELAY`].
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

fn retry_after(resp: &Response) -> u64 {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60)
}

/// `{"raw": 1.5, "fmt": "1.50"}` → `1.5`; anything else unchanged.
fn unwrap_raw(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("raw") => map.remove("raw").unwrap_or(Value::Null),
        Value::Object(map) if map.is_empty() => Value::Null,
        other => other,
    }
}

impl DataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn get_info(&self, symbol: &Symbol) -> Result<MetadataRecord, DataError> {
        match self.fetch_info_once(symbol) {
            Err(DataError::AuthenticationRequired(reason)) => {
                tracing::warn!(%symbol, %reason, "crumb rejected, refreshing session");
                *self.lock_crumb() = None;
                self.fetch_info_once(symbol)
            }
            other => other,
        }
    }

    fn get_history(&self, symbol: &Symbol, period: Period) -> Result<HistoryTable, DataError> {
        let url = self.chart_url(symbol, period);
        let resp = self.get_with_retry(symbol, &url)?;
        let chart: ChartResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;
        let rows = Self::parse_chart(symbol, chart, self.config.auto_adjust)?;
        Ok(HistoryTable::new(symbol.clone(), rows))
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
