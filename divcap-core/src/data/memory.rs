//! In-memory provider for tests, benches, and offline runs.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::provider::{MarketDataProvider, ProviderError};
use crate::domain::{DividendRecord, PriceSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Call {
    Dividends,
    History,
    Snapshot,
    PriceTarget,
}

/// Failure script for one ticker.
#[derive(Debug, Clone)]
enum Failure {
    /// Fail the first `n` calls of every kind, then succeed.
    Times(usize),
    Always(ProviderError),
}

/// Canned data keyed by ticker. Unknown tickers are `SymbolNotFound`.
#[derive(Default)]
pub struct InMemoryProvider {
    series: HashMap<String, PriceSeries>,
    dividends: HashMap<String, Vec<DividendRecord>>,
    snapshots: HashMap<String, BTreeMap<String, Value>>,
    price_targets: HashMap<String, f64>,
    failures: HashMap<String, Failure>,
    calls: Mutex<HashMap<(String, Call), usize>>,
    total_calls: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price history. Dividends carried in the series double as the
    /// dividend history unless `with_dividends` overrides them.
    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.series.insert(series.ticker.to_uppercase(), series);
        self
    }

    pub fn with_dividends(mut self, ticker: &str, dividends: Vec<DividendRecord>) -> Self {
        self.dividends.insert(ticker.to_uppercase(), dividends);
        self
    }

    pub fn with_snapshot(mut self, ticker: &str, fields: BTreeMap<String, Value>) -> Self {
        self.snapshots.insert(ticker.to_uppercase(), fields);
        self
    }

    pub fn with_price_target(mut self, ticker: &str, target: f64) -> Self {
        self.price_targets.insert(ticker.to_uppercase(), target);
        self
    }

    /// Fail the first `times` calls of each kind for `ticker` with a
    /// retryable network error.
    pub fn failing(mut self, ticker: &str, times: usize) -> Self {
        self.failures
            .insert(ticker.to_uppercase(), Failure::Times(times));
        self
    }

    /// Fail every call for `ticker` with `error`.
    pub fn always_failing(mut self, ticker: &str, error: ProviderError) -> Self {
        self.failures
            .insert(ticker.to_uppercase(), Failure::Always(error));
        self
    }

    pub fn history_calls(&self, ticker: &str) -> usize {
        self.calls_for(ticker, Call::History)
    }

    pub fn dividend_calls(&self, ticker: &str) -> usize {
        self.calls_for(ticker, Call::Dividends)
    }

    pub fn snapshot_calls(&self, ticker: &str) -> usize {
        self.calls_for(ticker, Call::Snapshot)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    fn calls_for(&self, ticker: &str, call: Call) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(&(ticker.to_uppercase(), call)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Count the call and apply the failure script.
    fn enter(&self, ticker: &str, call: Call) -> Result<String, ProviderError> {
        let key = ticker.to_uppercase();
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let n = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| ProviderError::Other("call counter poisoned".into()))?;
            let n = calls.entry((key.clone(), call)).or_insert(0);
            *n += 1;
            *n
        };
        match self.failures.get(&key) {
            Some(Failure::Always(e)) => Err(e.clone()),
            Some(Failure::Times(times)) if n <= *times => Err(ProviderError::NetworkUnreachable(
                format!("scripted failure {n}/{times} for {key}"),
            )),
            _ => Ok(key),
        }
    }

    fn not_found(key: String) -> ProviderError {
        ProviderError::SymbolNotFound { symbol: key }
    }

    fn known(&self, key: &str) -> bool {
        self.series.contains_key(key)
            || self.dividends.contains_key(key)
            || self.snapshots.contains_key(key)
    }
}

impl MarketDataProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn get_dividends(&self, ticker: &str) -> Result<Vec<DividendRecord>, ProviderError> {
        let key = self.enter(ticker, Call::Dividends)?;
        if let Some(divs) = self.dividends.get(&key) {
            return Ok(divs.clone());
        }
        self.series
            .get(&key)
            .map(|s| s.dividends())
            .ok_or_else(|| Self::not_found(key))
    }

    fn get_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, ProviderError> {
        let key = self.enter(ticker, Call::History)?;
        match self.series.get(&key) {
            Some(s) => Ok(s.window(start, end)),
            None if self.known(&key) => Ok(PriceSeries::new(key)),
            None => Err(Self::not_found(key)),
        }
    }

    fn get_snapshot(&self, ticker: &str) -> Result<BTreeMap<String, Value>, ProviderError> {
        let key = self.enter(ticker, Call::Snapshot)?;
        self.snapshots
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    fn get_price_target(&self, ticker: &str) -> Result<Option<f64>, ProviderError> {
        let key = self.enter(ticker, Call::PriceTarget)?;
        if !self.known(&key) {
            return Err(Self::not_found(key));
        }
        Ok(self.price_targets.get(&key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PricePoint;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, m, day).unwrap()
    }

    #[test]
    fn dividends_fall_back_to_series() {
        let mut s = PriceSeries::from_points("KO", [(d(6, 1), PricePoint::new(10.0, 10.0))]);
        s.add_dividend(d(6, 1), 0.46);
        let p = InMemoryProvider::new().with_series(s);
        let divs = p.get_dividends("ko").unwrap();
        assert_eq!(divs.len(), 1);
        assert_eq!(p.dividend_calls("KO"), 1);
    }

    #[test]
    fn scripted_failures_then_success() {
        let p = InMemoryProvider::new()
            .with_snapshot("KO", BTreeMap::new())
            .failing("KO", 2);
        assert!(p.get_snapshot("KO").is_err());
        assert!(p.get_snapshot("KO").is_err());
        assert!(p.get_snapshot("KO").is_ok());
        assert_eq!(p.snapshot_calls("KO"), 3);
    }

    #[test]
    fn unknown_ticker_not_found() {
        let p = InMemoryProvider::new();
        assert!(matches!(
            p.get_snapshot("ZZZZ"),
            Err(ProviderError::SymbolNotFound { .. })
        ));
        assert_eq!(p.total_calls(), 1);
    }
}
