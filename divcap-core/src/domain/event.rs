//! DividendEvent: one ex-date, progressively enriched into a priced trade.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{json_f64, Row};

/// Raw ex-date/amount pair as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DividendRecord {
    pub ex_date: NaiveDate,
    pub amount: f64,
}

/// A dividend event and, once built, the trade around it.
///
/// Only `ex_date` and `dividend_amount` are known at creation. The trade
/// builder fills in dates, then fill prices, then the return. Any field that
/// could not be resolved stays `None`; it never defaults to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendEvent {
    pub ex_date: NaiveDate,
    pub dividend_amount: f64,
    pub buy_date: Option<NaiveDate>,
    pub sell_date: Option<NaiveDate>,
    pub price_buy: Option<f64>,
    pub price_sell: Option<f64>,
    pub total_return: Option<f64>,
}

impl DividendEvent {
    pub fn new(ex_date: NaiveDate, dividend_amount: f64) -> Self {
        Self {
            ex_date,
            dividend_amount,
            buy_date: None,
            sell_date: None,
            price_buy: None,
            price_sell: None,
            total_return: None,
        }
    }

    /// True once both fills were found and the return computed.
    pub fn is_resolved(&self) -> bool {
        self.total_return.is_some()
    }

    /// Strictly positive return. A flat trade is a loss.
    pub fn is_win(&self) -> Option<bool> {
        self.total_return.map(|r| r > 0.0)
    }

    /// Flat row for the trade table. `ticker` adds a leading ticker column
    /// when several tickers share one table.
    pub fn to_row(&self, ticker: Option<&str>) -> Row {
        let mut row = Row::new();
        if let Some(t) = ticker {
            row.insert("ticker".into(), Value::String(t.to_string()));
        }
        row.insert("ex_date".into(), Value::String(self.ex_date.to_string()));
        row.insert("dividend".into(), json_f64(self.dividend_amount));
        row.insert("buy_date".into(), opt_date(self.buy_date));
        row.insert("sell_date".into(), opt_date(self.sell_date));
        row.insert("price_buy".into(), opt_f64(self.price_buy));
        row.insert("price_sell".into(), opt_f64(self.price_sell));
        row.insert("total_return".into(), opt_f64(self.total_return));
        row
    }
}

impl From<DividendRecord> for DividendEvent {
    fn from(r: DividendRecord) -> Self {
        Self::new(r.ex_date, r.amount)
    }
}

fn opt_date(d: Option<NaiveDate>) -> Value {
    d.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null)
}

fn opt_f64(x: Option<f64>) -> Value {
    x.map(json_f64).unwrap_or(Value::Null)
}

/// Column order of the trade table.
pub const TRADE_COLUMNS: &[&str] = &[
    "ticker",
    "ex_date",
    "dividend",
    "buy_date",
    "sell_date",
    "price_buy",
    "price_sell",
    "total_return",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_is_unresolved() {
        let e = DividendEvent::new(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(), 0.25);
        assert!(!e.is_resolved());
        assert_eq!(e.is_win(), None);
        assert!(e.price_buy.is_none());
    }

    #[test]
    fn zero_return_is_not_a_win() {
        let mut e = DividendEvent::new(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(), 0.25);
        e.total_return = Some(0.0);
        assert_eq!(e.is_win(), Some(false));
    }

    #[test]
    fn row_keeps_absent_fields_as_null() {
        let e = DividendEvent::new(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(), 0.25);
        let row = e.to_row(Some("KO"));
        assert_eq!(row["ticker"], Value::String("KO".into()));
        assert_eq!(row["total_return"], Value::Null);
        assert_eq!(row["ex_date"], Value::String("2023-06-01".into()));

        let row = e.to_row(None);
        assert!(!row.contains_key("ticker"));
    }
}
