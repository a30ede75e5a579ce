//! Dividend events for a ticker within a date range.

use chrono::NaiveDate;

use crate::data::MarketDataProvider;
use crate::domain::DividendEvent;
use crate::error::CaptureError;

pub struct EventSource<'a> {
    provider: &'a dyn MarketDataProvider,
}

impl<'a> EventSource<'a> {
    pub fn new(provider: &'a dyn MarketDataProvider) -> Self {
        Self { provider }
    }

    /// Ex-dates in `[start, end]`, ascending. An empty result is not a failure.
    pub fn events(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DividendEvent>, CaptureError> {
        let records = self.provider.get_dividends(ticker)?;
        let mut events: Vec<DividendEvent> = records
            .into_iter()
            .filter(|r| r.ex_date >= start && r.ex_date <= end)
            .filter(|r| {
                let ok = r.amount.is_finite() && r.amount >= 0.0;
                if !ok {
                    tracing::debug!(ticker, ex_date = %r.ex_date, amount = r.amount, "dropping malformed dividend");
                }
                ok
            })
            .map(DividendEvent::from)
            .collect();
        events.sort_by_key(|e| e.ex_date);
        tracing::debug!(ticker, events = events.len(), "dividend events loaded");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{InMemoryProvider, ProviderError};
    use crate::domain::DividendRecord;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn rec(date: NaiveDate, amount: f64) -> DividendRecord {
        DividendRecord { ex_date: date, amount }
    }

    #[test]
    fn filters_inclusive_range_and_sorts() {
        let p = InMemoryProvider::new().with_dividends(
            "KO",
            vec![
                rec(d(2023, 9, 14), 0.46),
                rec(d(2022, 11, 30), 0.44),
                rec(d(2023, 6, 1), 0.46),
                rec(d(2023, 3, 1), 0.46),
                rec(d(2023, 7, 1), f64::NAN),
            ],
        );
        let events = EventSource::new(&p)
            .events("KO", d(2023, 3, 1), d(2023, 9, 14))
            .unwrap();
        let dates: Vec<_> = events.iter().map(|e| e.ex_date).collect();
        assert_eq!(dates, vec![d(2023, 3, 1), d(2023, 6, 1), d(2023, 9, 14)]);
        assert!(events.iter().all(|e| e.buy_date.is_none()));
    }

    #[test]
    fn no_dividends_is_empty_not_error() {
        let p = InMemoryProvider::new().with_dividends("BRK-B", vec![]);
        let events = EventSource::new(&p)
            .events("BRK-B", d(2010, 1, 1), d(2024, 12, 30))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn provider_failure_propagates() {
        let p = InMemoryProvider::new()
            .always_failing("KO", ProviderError::NetworkUnreachable("down".into()));
        let err = EventSource::new(&p)
            .events("KO", d(2023, 1, 1), d(2023, 12, 31))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Provider(_)));
    }
}
