//! Yahoo Finance data provider.
//!
//! - Price history and dividends from the v8 chart API (`events=div`)
//! - Fundamental snapshot and price target from the v10 quoteSummary API,
//!   which needs a session cookie plus crumb (fetched once, refreshed on 401)
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. Each call is a single attempt; retries belong to the caller.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{MarketDataProvider, ProviderError};
use crate::domain::{DividendRecord, PricePoint, PriceSeries};
use chrono::{NaiveDate, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const CHART_BASE: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const SUMMARY_BASE: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query2.finance.yahoo.com/v1/test/getcrumb";

/// quoteSummary modules merged into one flat snapshot.
const SNAPSHOT_MODULES: &[&str] = &[
    "price",
    "summaryDetail",
    "defaultKeyStatistics",
    "financialData",
    "assetProfile",
];

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
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
    events: Option<ChartEvents>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ChartEvents {
    dividends: Option<BTreeMap<String, RawDividend>>,
}

#[derive(Debug, Deserialize)]
struct RawDividend {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    quote_summary: SummaryResult,
}

#[derive(Debug, Deserialize)]
struct SummaryResult {
    result: Option<Vec<BTreeMap<String, Value>>>,
    error: Option<ApiError>,
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    /// quoteSummary crumb, fetched lazily and bound to the client's cookies.
    crumb: Mutex<Option<String>>,
}

/// What a non-success response does to the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerAction {
    Ignore,
    RecordFailure,
    Trip,
}

/// Map a non-success HTTP status to a provider error. `None` for success.
fn status_error(
    status: StatusCode,
    symbol: &str,
    retry_after: Option<u64>,
) -> Option<(ProviderError, BreakerAction)> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED => (
            ProviderError::Unauthorized(format!("HTTP {status} for {symbol}")),
            BreakerAction::Ignore,
        ),
        StatusCode::FORBIDDEN => (ProviderError::CircuitBreakerTripped, BreakerAction::Trip),
        StatusCode::TOO_MANY_REQUESTS => (
            ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(60),
            },
            BreakerAction::RecordFailure,
        ),
        StatusCode::NOT_FOUND => (
            ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            BreakerAction::Ignore,
        ),
        _ => (
            ProviderError::Other(format!("HTTP {status} for {symbol}")),
            BreakerAction::RecordFailure,
        ),
    })
}

/// A crumb is a short opaque token; an HTML page or blank body is not.
fn valid_crumb(body: &str) -> Option<String> {
    let crumb = body.trim();
    let malformed = crumb.is_empty()
        || crumb.len() > 64
        || crumb.contains(char::is_whitespace)
        || crumb.contains('<');
    if malformed {
        return None;
    }
    Some(crumb.to_string())
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .cookie_store(true)
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            crumb: Mutex::new(None),
        })
    }

    fn chart_url(symbol: &str, period1: i64, period2: i64) -> String {
        format!(
            "{CHART_BASE}/{symbol}?period1={period1}&period2={period2}&interval=1d&events=div"
        )
    }

    fn summary_url(symbol: &str, modules: &[&str], crumb: &str) -> String {
        format!(
            "{SUMMARY_BASE}/{symbol}?modules={}&crumb={crumb}",
            modules.join(",")
        )
    }

    /// One GET with circuit breaker bookkeeping.
    fn get_json<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> Result<T, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                self.circuit_breaker.record_failure();
            }
            ProviderError::NetworkUnreachable(e.to_string())
        })?;

        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some((err, action)) = status_error(resp.status(), symbol, retry_after) {
            match action {
                BreakerAction::Ignore => {}
                BreakerAction::RecordFailure => self.circuit_breaker.record_failure(),
                BreakerAction::Trip => self.circuit_breaker.trip(),
            }
            return Err(err);
        }

        let parsed = resp.json::<T>().map_err(|e| {
            ProviderError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;
        self.circuit_breaker.record_success();
        Ok(parsed)
    }

    /// Cached crumb, or a fresh one: hitting `fc.yahoo.com` sets the session
    /// cookie, then `getcrumb` returns the token bound to it.
    fn crumb(&self) -> Result<String, ProviderError> {
        let mut slot = self.crumb.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(c) = slot.as_ref() {
            return Ok(c.clone());
        }
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        // fc.yahoo.com answers 404 but still sets the cookie.
        self.client
            .get(COOKIE_URL)
            .send()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;

        let resp = self
            .client
            .get(CRUMB_URL)
            .send()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;
        if let Some((err, action)) = status_error(resp.status(), "crumb", None) {
            if action == BreakerAction::Trip {
                self.circuit_breaker.trip();
            }
            return Err(err);
        }
        let body = resp
            .text()
            .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;
        let crumb = valid_crumb(&body)
            .ok_or_else(|| ProviderError::Unauthorized("no crumb in getcrumb response".into()))?;
        tracing::debug!("obtained Yahoo crumb");
        *slot = Some(crumb.clone());
        Ok(crumb)
    }

    fn forget_crumb(&self) {
        *self.crumb.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn chart(&self, symbol: &str, period1: i64, period2: i64) -> Result<ChartData, ProviderError> {
        let resp: ChartResponse = self.get_json(&Self::chart_url(symbol, period1, period2), symbol)?;
        first_chart(symbol, resp)
    }

    /// quoteSummary with a crumb. A rejected crumb is refreshed once.
    fn summary(&self, symbol: &str, modules: &[&str]) -> Result<BTreeMap<String, Value>, ProviderError> {
        let crumb = self.crumb()?;
        let first = self.get_json::<SummaryResponse>(&Self::summary_url(symbol, modules, &crumb), symbol);
        let resp = match first {
            Err(ProviderError::Unauthorized(reason)) => {
                tracing::debug!(symbol, "crumb rejected ({reason}), refreshing");
                self.forget_crumb();
                let crumb = self.crumb()?;
                self.get_json::<SummaryResponse>(&Self::summary_url(symbol, modules, &crumb), symbol)?
            }
            other => other?,
        };
        first_summary(symbol, resp)
    }
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn get_dividends(&self, ticker: &str) -> Result<Vec<DividendRecord>, ProviderError> {
        let data = self.chart(ticker, 0, Utc::now().timestamp())?;
        Ok(parse_dividends(&data))
    }

    fn get_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, ProviderError> {
        let (p1, p2) = day_bounds(start, end)?;
        let data = self.chart(ticker, p1, p2)?;
        parse_history(ticker, data)
    }

    fn get_snapshot(&self, ticker: &str) -> Result<BTreeMap<String, Value>, ProviderError> {
        let modules = self.summary(ticker, SNAPSHOT_MODULES)?;
        Ok(flatten_modules(&modules))
    }

    fn get_price_target(&self, ticker: &str) -> Result<Option<f64>, ProviderError> {
        let modules = self.summary(ticker, &["financialData"])?;
        Ok(flatten_modules(&modules)
            .get("targetMeanPrice")
            .and_then(Value::as_f64))
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

// ── Response parsing ────────────────────────────────────────────────

fn day_bounds(start: NaiveDate, end: NaiveDate) -> Result<(i64, i64), ProviderError> {
    let p1 = start.and_hms_opt(0, 0, 0);
    let p2 = end.and_hms_opt(23, 59, 59);
    match (p1, p2) {
        (Some(a), Some(b)) => Ok((a.and_utc().timestamp(), b.and_utc().timestamp())),
        _ => Err(ProviderError::Other(format!("invalid range {start}..{end}"))),
    }
}

fn api_error(symbol: &str, err: Option<ApiError>) -> ProviderError {
    match err {
        Some(e) if e.code == "Not Found" => ProviderError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        Some(e) => ProviderError::ResponseFormatChanged(format!("{}: {}", e.code, e.description)),
        None => ProviderError::ResponseFormatChanged("empty result with no error".into()),
    }
}

fn first_chart(symbol: &str, resp: ChartResponse) -> Result<ChartData, ProviderError> {
    let ChartResult { result, error } = resp.chart;
    result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| api_error(symbol, error))
}

fn first_summary(
    symbol: &str,
    resp: SummaryResponse,
) -> Result<BTreeMap<String, Value>, ProviderError> {
    let SummaryResult { result, error } = resp.quote_summary;
    result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| api_error(symbol, error))
}

fn ts_to_date(ts: i64) -> Result<NaiveDate, ProviderError> {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| ProviderError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))
}

fn parse_dividends(data: &ChartData) -> Vec<DividendRecord> {
    let mut records: Vec<DividendRecord> = data
        .events
        .as_ref()
        .and_then(|e| e.dividends.as_ref())
        .map(|divs| {
            divs.values()
                .filter_map(|d| {
                    let ex_date = ts_to_date(d.date).ok()?;
                    Some(DividendRecord {
                        ex_date,
                        amount: d.amount,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    records.sort_by_key(|r| r.ex_date);
    records
}

/// Trading days with a close; dividends attached to their ex-date. A range
/// with no bars yields an empty series.
fn parse_history(symbol: &str, data: ChartData) -> Result<PriceSeries, ProviderError> {
    let dividends = parse_dividends(&data);
    let mut series = PriceSeries::new(symbol);

    let Some(timestamps) = data.timestamp else {
        return Ok(series);
    };
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ResponseFormatChanged("no quote data".into()))?;

    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(close) = quote.close.get(i).copied().flatten() else {
            continue;
        };
        let open = quote.open.get(i).copied().flatten().unwrap_or(f64::NAN);
        series.insert(ts_to_date(ts)?, PricePoint::new(open, close));
    }

    for d in dividends {
        if !series.add_dividend(d.ex_date, d.amount) {
            tracing::debug!(symbol, ex_date = %d.ex_date, "dividend outside trading days");
        }
    }
    Ok(series)
}

/// Merge quoteSummary modules into one field map. Yahoo wraps numbers as
/// `{"raw": 1.5, "fmt": "1.50"}`; keep `raw`. Empty wrappers become null.
fn flatten_modules(modules: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for module in modules.values() {
        let Some(fields) = module.as_object() else {
            continue;
        };
        for (name, value) in fields {
            let flat = match value {
                Value::Object(obj) if obj.contains_key("raw") => {
                    obj.get("raw").cloned().unwrap_or(Value::Null)
                }
                Value::Object(obj) if obj.is_empty() => Value::Null,
                other => other.clone(),
            };
            out.entry(name.clone()).or_insert(flat);
        }
    }
    out
}
