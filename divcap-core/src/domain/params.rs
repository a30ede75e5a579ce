//! StrategyParameters: the one strategy shape: buy N days before the ex-date,
//! sell M days after.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Immutable parameters for one strategy run on one ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyParameters {
    ticker: String,
    days_before: u32,
    days_after: u32,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl StrategyParameters {
    pub fn new(
        ticker: impl Into<String>,
        days_before: u32,
        days_after: u32,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Self, CaptureError> {
        let ticker = ticker.into().trim().to_uppercase();
        if ticker.is_empty() {
            return Err(CaptureError::InvalidInput("ticker must not be empty".into()));
        }
        if start_date > end_date {
            return Err(CaptureError::InvalidInput(format!(
                "start date {start_date} is after end date {end_date}"
            )));
        }
        Ok(Self {
            ticker,
            days_before,
            days_after,
            start_date,
            end_date,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn days_before(&self) -> u32 {
        self.days_before
    }

    pub fn days_after(&self) -> u32 {
        self.days_after
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Same offsets and date range, different ticker.
    pub fn for_ticker(&self, ticker: impl Into<String>) -> Result<Self, CaptureError> {
        Self::new(
            ticker,
            self.days_before,
            self.days_after,
            self.start_date,
            self.end_date,
        )
    }
}
