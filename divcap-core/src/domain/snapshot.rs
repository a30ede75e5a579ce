//! TickerSnapshot: fundamental/quote fields for one ticker at one point in time.
//!
//! Every snapshot carries exactly the allow-listed field names. A field the
//! provider did not report is stored as an explicit null, never omitted, so
//! snapshots from different tickers always line up into one wide table.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::CaptureError;
use crate::storage::{json_f64, Row, Table};

/// Allow-listed provider fields kept per snapshot.
pub const SNAPSHOT_FIELDS: &[&str] = &[
    "city", "state", "zip", "country", "industry", "sector", "fullTimeEmployees",
    "auditRisk", "boardRisk", "compensationRisk", "shareHolderRightsRisk", "overallRisk",
    "compensationAsOfEpochDate", "priceHint", "previousClose", "open", "dayLow", "dayHigh",
    "regularMarketPreviousClose", "regularMarketOpen", "regularMarketDayLow",
    "regularMarketDayHigh", "dividendRate", "dividendYield", "exDividendDate", "payoutRatio",
    "fiveYearAvgDividendYield", "beta", "trailingPE", "forwardPE", "volume",
    "regularMarketVolume", "averageVolume", "averageVolume10days", "averageDailyVolume10Day",
    "bid", "ask", "bidSize", "askSize", "marketCap", "fiftyTwoWeekLow", "fiftyTwoWeekHigh",
    "priceToSalesTrailing12Months", "fiftyDayAverage", "twoHundredDayAverage",
    "trailingAnnualDividendRate", "trailingAnnualDividendYield", "currency", "enterpriseValue",
    "profitMargins", "floatShares", "sharesOutstanding", "sharesShort", "sharesShortPriorMonth",
    "sharesShortPreviousMonthDate", "dateShortInterest", "sharesPercentSharesOut",
    "heldPercentInsiders", "heldPercentInstitutions", "shortRatio", "impliedSharesOutstanding",
    "bookValue", "priceToBook", "lastFiscalYearEnd", "nextFiscalYearEnd", "mostRecentQuarter",
    "earningsQuarterlyGrowth", "netIncomeToCommon", "trailingEps", "forwardEps",
    "lastSplitFactor", "lastSplitDate", "enterpriseToRevenue", "enterpriseToEbitda",
    "52WeekChange", "SandP52WeekChange", "lastDividendValue", "lastDividendDate", "quoteType",
    "currentPrice", "totalCash", "totalCashPerShare", "ebitda", "totalDebt", "quickRatio",
    "currentRatio", "totalRevenue", "debtToEquity", "revenuePerShare", "returnOnAssets",
    "returnOnEquity", "grossProfits", "freeCashflow", "operatingCashflow", "earningsGrowth",
    "revenueGrowth", "grossMargins", "ebitdaMargins", "operatingMargins", "financialCurrency",
    "symbol", "region", "typeDisp", "exchange", "exchangeTimezoneName",
    "exchangeTimezoneShortName", "market", "regularMarketTime", "longName", "marketState",
    "regularMarketChangePercent", "regularMarketPrice", "regularMarketChange",
    "regularMarketDayRange", "fullExchangeName", "averageDailyVolume3Month",
    "fiftyTwoWeekLowChange", "fiftyTwoWeekLowChangePercent", "fiftyTwoWeekHighChange",
    "fiftyTwoWeekHighChangePercent", "fiftyTwoWeekChangePercent", "dividendDate",
    "earningsTimestamp", "earningsTimestampStart", "earningsTimestampEnd",
    "earningsCallTimestampStart", "earningsCallTimestampEnd", "epsTrailingTwelveMonths",
    "epsForward", "epsCurrentYear", "priceEpsCurrentYear", "fiftyDayAverageChange",
    "fiftyDayAverageChangePercent", "twoHundredDayAverageChange",
    "twoHundredDayAverageChangePercent", "sourceInterval", "cryptoTradeable",
];

/// Columns placed first in the wide snapshot table, in this order.
pub const PREFERRED_COLUMNS: &[&str] = &[
    "ticker",
    "longName",
    "open",
    "dayLow",
    "dayHigh",
    "previousClose",
    "priceTarget",
    "fiftyTwoWeekLow",
    "fiftyTwoWeekHigh",
    "fiftyDayAverageChange",
    "lastDividendValue",
    "lastDividendDate",
    "dividendYield",
    "exDividendDate",
    "dividendDate",
    "fiveYearAvgDividendYield",
    "trailingAnnualDividendRate",
    "trailingAnnualDividendYield",
    "earningsQuarterlyGrowth",
    "revenueGrowth",
];

const TICKER_COLUMN: &str = "ticker";
const PRICE_TARGET_COLUMN: &str = "priceTarget";
const LAST_UPDATED_COLUMN: &str = "lastUpdated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub ticker: String,
    pub last_updated: DateTime<Utc>,
    pub price_target: Option<f64>,
    fields: BTreeMap<String, Value>,
}

impl TickerSnapshot {
    /// Keep the allow-listed subset of `raw`; anything missing becomes null.
    pub fn from_provider_fields(
        ticker: impl Into<String>,
        raw: &BTreeMap<String, Value>,
        price_target: Option<f64>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let fields = SNAPSHOT_FIELDS
            .iter()
            .map(|k| (k.to_string(), raw.get(*k).cloned().unwrap_or(Value::Null)))
            .collect();
        Self {
            ticker: ticker.into(),
            last_updated,
            price_target: price_target.filter(|p| p.is_finite()),
            fields,
        }
    }

    /// Value of an allow-listed field (`Value::Null` when the provider had none).
    /// `None` means the name is not in the allow-list.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Number of allow-listed fields the provider actually reported.
    pub fn populated_count(&self) -> usize {
        self.fields.values().filter(|v| !v.is_null()).count()
    }

    pub fn to_row(&self) -> Row {
        let mut row: Row = self.fields.clone();
        row.insert(TICKER_COLUMN.into(), Value::String(self.ticker.clone()));
        row.insert(
            PRICE_TARGET_COLUMN.into(),
            self.price_target.map(json_f64).unwrap_or(Value::Null),
        );
        row.insert(
            LAST_UPDATED_COLUMN.into(),
            Value::String(self.last_updated.to_rfc3339()),
        );
        row
    }

    /// Rebuild a snapshot from a stored row (checkpoint chunk or table).
    pub fn from_row(row: &Row) -> Result<Self, CaptureError> {
        let ticker = row
            .get(TICKER_COLUMN)
            .and_then(Value::as_str)
            .ok_or_else(|| CaptureError::InvalidInput("snapshot row has no ticker".into()))?;
        let last_updated = row
            .get(LAST_UPDATED_COLUMN)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CaptureError::InvalidInput(format!("snapshot row for {ticker} has no lastUpdated"))
            })
            .and_then(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        CaptureError::InvalidInput(format!("bad lastUpdated for {ticker}: {e}"))
                    })
            })?;
        let price_target = row.get(PRICE_TARGET_COLUMN).and_then(Value::as_f64);
        Ok(Self::from_provider_fields(ticker, row, price_target, last_updated))
    }
}

/// Concatenate snapshots into one wide table: preferred columns first, then
/// the remaining allow-listed fields, then `lastUpdated`. Epoch timestamps in
/// date-like columns are converted to ISO-8601.
pub fn snapshot_table(snapshots: &[TickerSnapshot]) -> Table {
    let mut columns: Vec<String> = PREFERRED_COLUMNS.iter().map(|c| c.to_string()).collect();
    for f in SNAPSHOT_FIELDS {
        if !PREFERRED_COLUMNS.contains(f) {
            columns.push(f.to_string());
        }
    }
    columns.push(LAST_UPDATED_COLUMN.to_string());

    let mut table = Table::with_columns(columns);
    for snap in snapshots {
        let mut row = snap.to_row();
        normalize_timestamps(&mut row);
        table.push(row);
    }
    table
}

/// Convert numeric epoch values in columns whose name mentions "date" or
/// "timestamp" into RFC 3339 strings.
///
/// The unit is detected per value by trying seconds, then milliseconds,
/// microseconds and nanoseconds, keeping the first that lands in 1900..=2262.
pub fn normalize_timestamps(row: &mut Row) {
    for (name, value) in row.iter_mut() {
        let lower = name.to_lowercase();
        if !(lower.contains("date") || lower.contains("timestamp")) {
            continue;
        }
        let Some(raw) = value.as_f64() else {
            continue;
        };
        if let Some(dt) = epoch_to_datetime(raw) {
            *value = Value::String(dt.to_rfc3339());
        }
    }
}

fn epoch_to_datetime(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    const SCALES: [f64; 4] = [1.0, 1e3, 1e6, 1e9];
    SCALES.iter().find_map(|scale| {
        let secs = raw / scale;
        if secs.abs() > i64::MAX as f64 {
            return None;
        }
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
        DateTime::from_timestamp(whole as i64, nanos).filter(|dt| (1900..=2262).contains(&dt.year()))
    })
}
