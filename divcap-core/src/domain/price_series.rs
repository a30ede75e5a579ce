//! PriceSeries: one ticker's daily open/close/dividend keyed by date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::event::DividendRecord;
use crate::storage::{json_f64, Row, Table};

/// Daily values kept for the capture strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub open: f64,
    pub close: f64,
    /// Cash dividend going ex on this date (0.0 on ordinary days).
    pub dividend: f64,
}

impl PricePoint {
    pub fn new(open: f64, close: f64) -> Self {
        Self {
            open,
            close,
            dividend: 0.0,
        }
    }
}

/// Date-ordered price history for one ticker. Only trading days are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    points: BTreeMap<NaiveDate, PricePoint>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            points: BTreeMap::new(),
        }
    }

    pub fn from_points(
        ticker: impl Into<String>,
        points: impl IntoIterator<Item = (NaiveDate, PricePoint)>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            points: points.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, date: NaiveDate, point: PricePoint) {
        self.points.insert(date, point);
    }

    /// Record a dividend on `date`. Ignored when the date is not a trading day
    /// in this series.
    pub fn add_dividend(&mut self, date: NaiveDate, amount: f64) -> bool {
        match self.points.get_mut(&date) {
            Some(p) => {
                p.dividend += amount;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, date: NaiveDate) -> Option<&PricePoint> {
        self.points.get(&date)
    }

    /// Close price on `date` if it was a trading day.
    pub fn close_on(&self, date: NaiveDate) -> Option<f64> {
        self.points.get(&date).map(|p| p.close)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &PricePoint)> {
        self.points.iter()
    }

    /// Sub-series restricted to `[start, end]`.
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> Self {
        if start > end {
            return Self::new(self.ticker.clone());
        }
        Self {
            ticker: self.ticker.clone(),
            points: self
                .points
                .range(start..=end)
                .map(|(d, p)| (*d, *p))
                .collect(),
        }
    }

    /// Ex-dates carried in the series, ascending.
    pub fn dividends(&self) -> Vec<DividendRecord> {
        self.points
            .iter()
            .filter(|(_, p)| p.dividend > 0.0)
            .map(|(d, p)| DividendRecord {
                ex_date: *d,
                amount: p.dividend,
            })
            .collect()
    }

    /// Long-format table: date, open, close, dividends, ticker.
    pub fn to_table(&self) -> Table {
        let mut table = Table::with_columns(["date", "open", "close", "dividends", "ticker"]);
        for (date, p) in &self.points {
            let mut row = Row::new();
            row.insert("date".into(), Value::String(date.to_string()));
            row.insert("open".into(), json_f64(p.open));
            row.insert("close".into(), json_f64(p.close));
            row.insert("dividends".into(), json_f64(p.dividend));
            row.insert("ticker".into(), Value::String(self.ticker.clone()));
            table.push(row);
        }
        table
    }
}
