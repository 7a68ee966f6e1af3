//! Closing price history.
//!
//! [`YahooHistory`] pulls daily closes from the Yahoo Finance chart endpoint.
//! [`CachedHistory`] keeps a CSV copy of the last successful fetch and serves
//! it when the upstream is down. [`RetryingHistory`] retries transient failures
//! with exponential backoff. All three implement [`HistoryProvider`] and stack.
//! [`from_config`] wraps the retries inside the cache so the cache is only
//! consulted once every attempt has failed.

use crate::config::HistoryConfig;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// History fetch errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Ticker unknown to the provider, or no rows returned
    #[error("No price history found for {0}")]
    NotFound(String),

    /// Fewer rows than the caller asked for
    #[error("Not enough history for {ticker}: need at least {required} rows, got {actual}")]
    InsufficientHistory {
        ticker: String,
        required: usize,
        actual: usize,
    },

    /// HTTP request failed
    #[error("Request failed: {0}")]
    Request(String),

    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Local cache I/O failed
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Local cache contents are malformed
    #[error("Cache format error: {0}")]
    Csv(#[from] csv::Error),

    /// Symbol contains characters no exchange ticker uses
    #[error("Invalid ticker symbol: {0}")]
    InvalidTicker(String),
}

impl HistoryError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, HistoryError::Request(_) | HistoryError::Io(_))
    }
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Source of closing prices, oldest first.
pub trait HistoryProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Fetch closing prices for `ticker`; fails with
    /// [`HistoryError::InsufficientHistory`] when fewer than `min_len` exist.
    fn fetch_closes(&self, ticker: &str, min_len: usize) -> Result<Vec<f64>>;
}

/// Upper-case and trim a ticker symbol.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// Longest accepted ticker symbol.
pub const MAX_TICKER_LEN: usize = 16;

/// Whether a normalized ticker is safe to use as a URL path segment and a
/// cache file name: 1 to 16 characters from `A-Z 0-9 . ^ = -`.
pub fn is_valid_ticker(ticker: &str) -> bool {
    (1..=MAX_TICKER_LEN).contains(&ticker.len())
        && ticker.chars().all(|c| {
            c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '^' | '=' | '-')
        })
}

fn ensure_len(ticker: &str, closes: Vec<f64>, min_len: usize) -> Result<Vec<f64>> {
    if closes.is_empty() {
        return Err(HistoryError::NotFound(ticker.to_string()));
    }
    if closes.len() < min_len {
        return Err(HistoryError::InsufficientHistory {
            ticker: ticker.to_string(),
            required: min_len,
            actual: closes.len(),
        });
    }
    Ok(closes)
}

// Yahoo Finance chart API response structures
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Daily closes from the Yahoo Finance chart endpoint.
#[derive(Debug, Clone)]
pub struct YahooHistory {
    client: reqwest::blocking::Client,
    base_url: reqwest::Url,
    range: String,
    interval: String,
}

impl YahooHistory {
    /// Parse the endpoint and build the HTTP client shared by every fetch.
    ///
    /// Blocking client: construct outside of an async runtime worker.
    pub fn new(config: &HistoryConfig) -> Result<Self> {
        let base_url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| HistoryError::Parse(format!("base url {}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(HistoryError::Parse(format!(
                "base url {} cannot take a ticker path",
                config.base_url
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HistoryError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            range: config.range.clone(),
            interval: config.interval.clone(),
        })
    }

    /// Chart URL for `ticker`; the symbol is percent-encoded as one path segment.
    fn build_url(&self, ticker: &str) -> Result<reqwest::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                HistoryError::Parse(format!("base url {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .push(ticker);
        url.query_pairs_mut()
            .clear()
            .append_pair("range", &self.range)
            .append_pair("interval", &self.interval);
        Ok(url)
    }

    /// Parse a chart response body into closes, dropping null rows.
    fn parse_response(ticker: &str, json: &str) -> Result<Vec<f64>> {
        let response: ChartResponse =
            serde_json::from_str(json).map_err(|e| HistoryError::Parse(e.to_string()))?;

        if let Some(error) = response.chart.error {
            if error.code.eq_ignore_ascii_case("Not Found") {
                return Err(HistoryError::NotFound(ticker.to_string()));
            }
            return Err(HistoryError::Request(format!(
                "[{}] {}",
                error.code, error.description
            )));
        }

        let closes = response
            .chart
            .result
            .as_ref()
            .and_then(|r| r.first())
            .and_then(|data| data.indicators.quote.first())
            .map(|quote| {
                quote
                    .close
                    .iter()
                    .filter_map(|v| *v)
                    .filter(|v| v.is_finite())
                    .collect::<Vec<f64>>()
            })
            .unwrap_or_default();

        Ok(closes)
    }
}

impl HistoryProvider for YahooHistory {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn fetch_closes(&self, ticker: &str, min_len: usize) -> Result<Vec<f64>> {
        let url = self.build_url(ticker)?;
        debug!(%url, "Fetching price history");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| HistoryError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| HistoryError::Request(e.to_string()))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(HistoryError::NotFound(ticker.to_string()));
        }
        if !status.is_success() {
            return Err(HistoryError::Request(format!("HTTP {status} for {ticker}")));
        }

        let closes = Self::parse_response(ticker, &text)?;
        ensure_len(ticker, closes, min_len)
    }
}

/// `{dir}/{TICKER}_data.csv` files holding a single `close` column.
#[derive(Debug, Clone)]
pub struct CsvCache {
    dir: PathBuf,
}

impl CsvCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{ticker}_data.csv"))
    }

    fn checked_path(&self, ticker: &str) -> Result<PathBuf> {
        if !is_valid_ticker(ticker) {
            return Err(HistoryError::InvalidTicker(ticker.to_string()));
        }
        Ok(self.path_for(ticker))
    }

    /// Replace the cached closes for `ticker`.
    ///
    /// Written to a temporary file in the cache directory and renamed over the
    /// old copy, so readers only ever see a complete file.
    pub fn store(&self, ticker: &str, closes: &[f64]) -> Result<()> {
        let path = self.checked_path(ticker)?;
        fs::create_dir_all(&self.dir)?;

        let mut part = tempfile::Builder::new()
            .prefix(&format!(".{ticker}_data."))
            .suffix(".part")
            .tempfile_in(&self.dir)?;
        {
            let mut writer = csv::Writer::from_writer(part.as_file_mut());
            writer.write_record(["close"])?;
            for close in closes {
                writer.write_record([close.to_string()])?;
            }
            writer.flush()?;
        }
        part.persist(&path).map_err(|e| HistoryError::Io(e.error))?;
        Ok(())
    }

    /// Read cached closes; `Ok(None)` when no cache file exists.
    pub fn load(&self, ticker: &str) -> Result<Option<Vec<f64>>> {
        let path = self.checked_path(ticker)?;
        if !path.exists() {
            return Ok(None);
        }
        Self::read_closes(&path).map(Some)
    }

    fn read_closes(path: &Path) -> Result<Vec<f64>> {
        let file = File::open(path)?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));

        let column = reader
            .headers()?
            .iter()
            .position(|h| h.eq_ignore_ascii_case("close"))
            .ok_or_else(|| HistoryError::Parse(format!("{}: no close column", path.display())))?;

        let mut closes = Vec::new();
        for record in reader.records() {
            let record = record?;
            let Some(field) = record.get(column) else {
                continue;
            };
            if field.trim().is_empty() {
                continue;
            }
            let value: f64 = field.trim().parse().map_err(|_| {
                HistoryError::Parse(format!("{}: bad close value '{field}'", path.display()))
            })?;
            closes.push(value);
        }
        Ok(closes)
    }
}

/// Serves from an upstream provider, refreshing a CSV cache on success and
/// falling back to it on failure.
pub struct CachedHistory<P> {
    upstream: P,
    cache: CsvCache,
}

impl<P: HistoryProvider> CachedHistory<P> {
    pub fn new(upstream: P, cache: CsvCache) -> Self {
        Self { upstream, cache }
    }
}

impl<P: HistoryProvider> HistoryProvider for CachedHistory<P> {
    fn name(&self) -> &str {
        self.upstream.name()
    }

    fn fetch_closes(&self, ticker: &str, min_len: usize) -> Result<Vec<f64>> {
        match self.upstream.fetch_closes(ticker, min_len) {
            Ok(closes) => {
                if let Err(e) = self.cache.store(ticker, &closes) {
                    warn!(ticker, error = %e, "Failed to refresh history cache");
                }
                Ok(closes)
            }
            Err(upstream_err) => match self.cache.load(ticker) {
                Ok(Some(closes)) => {
                    warn!(
                        ticker,
                        error = %upstream_err,
                        rows = closes.len(),
                        "Upstream fetch failed, serving cached history"
                    );
                    ensure_len(ticker, closes, min_len)
                }
                Ok(None) => Err(upstream_err),
                Err(cache_err) => {
                    warn!(ticker, error = %cache_err, "Unreadable history cache");
                    Err(upstream_err)
                }
            },
        }
    }
}

/// Retries transient upstream failures with exponential backoff.
pub struct RetryingHistory<P> {
    upstream: P,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl<P: HistoryProvider> RetryingHistory<P> {
    pub fn new(upstream: P, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            upstream,
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl<P: HistoryProvider> HistoryProvider for RetryingHistory<P> {
    fn name(&self) -> &str {
        self.upstream.name()
    }

    fn fetch_closes(&self, ticker: &str, min_len: usize) -> Result<Vec<f64>> {
        let mut attempt = 1;
        loop {
            match self.upstream.fetch_closes(ticker, min_len) {
                Ok(closes) => {
                    if attempt > 1 {
                        info!(ticker, attempt, "History fetch recovered");
                    }
                    return Ok(closes);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        ticker,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "History fetch failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Build the provider stack described by `config`: Yahoo with retries, then
/// the CSV fallback cache when a cache directory is set.
pub fn from_config(config: &HistoryConfig) -> Result<Box<dyn HistoryProvider>> {
    let retrying = RetryingHistory::new(
        YahooHistory::new(config)?,
        config.max_attempts,
        Duration::from_millis(config.initial_backoff_ms),
    );

    Ok(match &config.cache_dir {
        Some(dir) => Box::new(CachedHistory::new(retrying, CsvCache::new(dir))),
        None => Box::new(retrying),
    })
}
