//! Expands dividend events into priced trades.
//!
//! For each event: buy `days_before` days before the ex-date, sell
//! `days_after` days after, fill both legs from one price history fetched
//! per ticker, and compute the return floored to the cent.

use chrono::{Days, NaiveDate};

use super::price_lookup::{fill_price, FORWARD_WINDOW_DAYS};
use crate::data::MarketDataProvider;
use crate::domain::{DividendEvent, PriceSeries, StrategyParameters};
use crate::error::CaptureError;

/// Padding on both sides of the history window, for non-trading days.
pub const HISTORY_PADDING_DAYS: u64 = 5;

pub struct TradeBuilder<'a> {
    provider: &'a dyn MarketDataProvider,
}

impl<'a> TradeBuilder<'a> {
    pub fn new(provider: &'a dyn MarketDataProvider) -> Self {
        Self { provider }
    }

    /// Schedule, fetch one history window, and price every event.
    ///
    /// Zero events return immediately without touching the provider. A
    /// history fetch failure fails the ticker; a missing fill only leaves
    /// that trade unresolved.
    pub fn build_trades(
        &self,
        events: Vec<DividendEvent>,
        params: &StrategyParameters,
    ) -> Result<Vec<DividendEvent>, CaptureError> {
        if events.is_empty() {
            return Ok(events);
        }

        let mut events: Vec<DividendEvent> =
            events.into_iter().map(|e| schedule(e, params)).collect();

        let Some((start, end)) = history_window(&events) else {
            return Ok(events);
        };
        let series = self.provider.get_history(params.ticker(), start, end)?;
        tracing::debug!(
            ticker = params.ticker(),
            %start,
            %end,
            days = series.len(),
            "price history loaded"
        );

        price_trades(&mut events, &series);
        Ok(events)
    }
}

/// Set `buy_date` and `sell_date`. Dates that overflow the calendar stay unset.
pub fn schedule(mut event: DividendEvent, params: &StrategyParameters) -> DividendEvent {
    event.buy_date = event
        .ex_date
        .checked_sub_days(Days::new(u64::from(params.days_before())));
    event.sell_date = event
        .ex_date
        .checked_add_days(Days::new(u64::from(params.days_after())));
    event
}

/// `[min(buy) - 5d, max(sell) + 5d]` over scheduled events.
pub fn history_window(events: &[DividendEvent]) -> Option<(NaiveDate, NaiveDate)> {
    let min_buy = events.iter().filter_map(|e| e.buy_date).min()?;
    let max_sell = events.iter().filter_map(|e| e.sell_date).max()?;
    let pad = Days::new(HISTORY_PADDING_DAYS);
    Some((
        min_buy.checked_sub_days(pad).unwrap_or(min_buy),
        max_sell.checked_add_days(pad).unwrap_or(max_sell),
    ))
}

/// Fill prices and returns for scheduled events from `series`.
pub fn price_trades(events: &mut [DividendEvent], series: &PriceSeries) {
    for event in events.iter_mut() {
        event.price_buy = event.buy_date.and_then(|d| resolve(series, d));
        event.price_sell = event.sell_date.and_then(|d| resolve(series, d));
        event.total_return = match (event.price_buy, event.price_sell) {
            (Some(buy), Some(sell)) => Some(capture_return(buy, sell, event.dividend_amount)),
            _ => None,
        };
    }
}

fn resolve(series: &PriceSeries, date: NaiveDate) -> Option<f64> {
    match fill_price(series, date) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::debug!(
                ticker = %series.ticker,
                window_days = FORWARD_WINDOW_DAYS,
                "{e}"
            );
            None
        }
    }
}

/// `(sell - buy) + dividend`, rounded down to the cent.
///
/// The 1e-9 nudge keeps values that are whole cents in decimal but fall just
/// below in binary (0.75 computed as 0.7499999999) from losing a cent.
pub fn capture_return(price_buy: f64, price_sell: f64, dividend: f64) -> f64 {
    let raw = (price_sell - price_buy) + dividend;
    ((raw * 100.0) + 1e-9).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryProvider;
    use crate::domain::PricePoint;
    use proptest::prelude::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, m, day).unwrap()
    }

    fn params(before: u32, after: u32) -> StrategyParameters {
        StrategyParameters::new("X", before, after, d(1, 1), d(12, 31)).unwrap()
    }

    fn series(points: &[(NaiveDate, f64)]) -> PriceSeries {
        PriceSeries::from_points("X", points.iter().map(|(d, c)| (*d, PricePoint::new(*c, *c))))
    }

    #[test]
    fn end_to_end_single_event() {
        let provider = InMemoryProvider::new()
            .with_series(series(&[(d(5, 29), 10.00), (d(6, 5), 10.50)]));
        let trades = TradeBuilder::new(&provider)
            .build_trades(vec![DividendEvent::new(d(6, 1), 0.25)], &params(3, 3))
            .unwrap();

        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert_eq!(t.buy_date, Some(d(5, 29)));
        assert_eq!(t.sell_date, Some(d(6, 4)));
        assert_eq!(t.price_buy, Some(10.00));
        assert_eq!(t.price_sell, Some(10.50));
        assert_eq!(t.total_return, Some(0.75));
    }

    #[test]
    fn zero_events_skip_history_fetch() {
        let provider = InMemoryProvider::new().with_series(series(&[(d(6, 1), 1.0)]));
        let trades = TradeBuilder::new(&provider)
            .build_trades(vec![], &params(3, 3))
            .unwrap();
        assert!(trades.is_empty());
        assert_eq!(provider.history_calls("X"), 0);
    }

    #[test]
    fn one_history_fetch_per_ticker() {
        let provider = InMemoryProvider::new().with_series(series(&[
            (d(2, 27), 10.0),
            (d(3, 6), 10.2),
            (d(5, 30), 10.0),
            (d(6, 5), 10.1),
        ]));
        let events = vec![DividendEvent::new(d(3, 2), 0.2), DividendEvent::new(d(6, 1), 0.2)];
        let trades = TradeBuilder::new(&provider)
            .build_trades(events, &params(3, 3))
            .unwrap();
        assert_eq!(provider.history_calls("X"), 1);
        assert!(trades.iter().all(|t| t.is_resolved()));
    }

    #[test]
    fn missing_leg_leaves_return_absent() {
        // Buy leg has data, sell leg is past the end of the series.
        let provider = InMemoryProvider::new().with_series(series(&[(d(5, 29), 10.0)]));
        let trades = TradeBuilder::new(&provider)
            .build_trades(vec![DividendEvent::new(d(6, 1), 0.25)], &params(3, 3))
            .unwrap();
        assert_eq!(trades[0].price_buy, Some(10.0));
        assert_eq!(trades[0].price_sell, None);
        assert_eq!(trades[0].total_return, None);
    }

    #[test]
    fn zero_offsets_trade_on_ex_date() {
        let e = schedule(DividendEvent::new(d(6, 1), 0.1), &params(0, 0));
        assert_eq!(e.buy_date, Some(d(6, 1)));
        assert_eq!(e.sell_date, Some(d(6, 1)));
    }

    #[test]
    fn window_is_padded() {
        let events: Vec<_> = [d(3, 2), d(6, 1)]
            .into_iter()
            .map(|x| schedule(DividendEvent::new(x, 0.1), &params(3, 3)))
            .collect();
        assert_eq!(history_window(&events), Some((d(2, 22), d(6, 9))));
    }

    #[test]
    fn return_floors_to_cent() {
        assert_eq!(capture_return(100.004, 102.007, 0.50), 2.50);
        assert_eq!(capture_return(10.00, 10.50, 0.25), 0.75);
        assert_eq!(capture_return(10.00, 9.00, 0.259), -0.75);
    }

    proptest! {
        #[test]
        fn floored_return_within_one_cent(
            buy in 1.0f64..500.0,
            sell in 1.0f64..500.0,
            div in 0.0f64..5.0,
        ) {
            let raw = sell - buy + div;
            let r = capture_return(buy, sell, div);
            prop_assert!(r <= raw + 1e-6);
            prop_assert!(raw - r < 0.01 + 1e-6);
        }
    }
}
