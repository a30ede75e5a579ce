//! Bulk fetch orchestrator.
//!
//! Splits a ticker universe into fixed-size batches run strictly in order.
//! Within a batch every ticker is fetched on the worker pool with the retry
//! policy applied per ticker. A ticker that still fails is recorded and
//! skipped; it never aborts its siblings or the run.
//!
//! If the provider stops accepting requests (circuit breaker open, or the
//! session itself rejected), those tickers are returned as `skipped`, so a
//! resumed run picks them up later instead of marking them failed.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use divcap_core::data::{
    CacheKey, FetchCache, FetchProgress, MarketDataProvider, ProviderError, TracingProgress,
};
use divcap_core::domain::{PriceSeries, TickerSnapshot, SNAPSHOT_FIELDS};
use divcap_core::{CaptureError, ErrorClass};

use crate::config::BulkSettings;
use crate::pool::WorkerPool;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("invalid bulk settings: {0}")]
    Settings(String),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Construction parameters for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkConfig {
    pub max_workers: usize,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            batch_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&BulkSettings> for BulkConfig {
    fn from(s: &BulkSettings) -> Self {
        Self {
            max_workers: s.max_workers,
            batch_size: s.batch_size,
            retry: s.retry_policy(),
        }
    }
}

/// A ticker that exhausted its retries or failed permanently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTicker {
    pub ticker: String,
    pub class: ErrorClass,
    pub reason: String,
}

impl FailedTicker {
    fn new(ticker: &str, err: &CaptureError) -> Self {
        Self {
            ticker: ticker.to_string(),
            class: err.class(),
            reason: err.to_string(),
        }
    }
}

/// Successful items plus the tickers that did not produce one.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    pub failed: Vec<FailedTicker>,
    /// Not attempted (or refused) because the provider stopped accepting
    /// requests. Safe to retry later.
    pub skipped: Vec<String>,
}

impl<T> Default for FetchOutcome<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> FetchOutcome<T> {
    pub fn report(&self) -> FetchReport {
        let mut failures_by_class = BTreeMap::new();
        for f in &self.failed {
            *failures_by_class.entry(f.class).or_insert(0) += 1;
        }
        FetchReport {
            total: self.items.len() + self.failed.len() + self.skipped.len(),
            succeeded: self.items.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            failures_by_class,
        }
    }
}

/// Counts for the user-visible run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures_by_class: BTreeMap<ErrorClass, usize>,
}

impl fmt::Display for FetchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} succeeded, {} failed",
            self.succeeded, self.total, self.failed
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped (provider unavailable)", self.skipped)?;
        }
        for (class, n) in &self.failures_by_class {
            write!(f, "\n  {class}: {n}")?;
        }
        Ok(())
    }
}

pub struct BulkFetchOrchestrator<'a> {
    provider: &'a dyn MarketDataProvider,
    cache: Option<&'a FetchCache>,
    progress: &'a dyn FetchProgress,
    pool: WorkerPool,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<'a> BulkFetchOrchestrator<'a> {
    pub fn new(provider: &'a dyn MarketDataProvider, config: BulkConfig) -> Result<Self, BulkError> {
        if config.max_workers == 0 {
            return Err(BulkError::Settings("max_workers must be at least 1".into()));
        }
        if config.batch_size == 0 {
            return Err(BulkError::Settings("batch_size must be at least 1".into()));
        }
        Ok(Self {
            provider,
            cache: None,
            progress: &TracingProgress,
            pool: WorkerPool::new(config.max_workers)?,
            batch_size: config.batch_size,
            retry: config.retry,
        })
    }

    pub fn with_cache(mut self, cache: &'a FetchCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn FetchProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn provider(&self) -> &'a dyn MarketDataProvider {
        self.provider
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    /// Snapshot for one ticker: cache first, then the provider under the
    /// retry policy. A failing price-target call leaves the target absent.
    pub fn fetch_snapshot(&self, ticker: &str) -> Result<TickerSnapshot, CaptureError> {
        let key = CacheKey::new(ticker, SNAPSHOT_FIELDS.iter().copied());
        self.cached(&key, || {
            let fields = self
                .retry
                .run(ticker, |_| Ok(self.provider.get_snapshot(ticker)?))?;
            let target = match self.provider.get_price_target(ticker) {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(ticker, "price target unavailable: {e}");
                    None
                }
            };
            Ok(TickerSnapshot::from_provider_fields(
                ticker,
                &fields,
                target,
                Utc::now(),
            ))
        })
    }

    /// Price history for one ticker over `[start, end]`.
    pub fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, CaptureError> {
        let start_s = start.to_string();
        let end_s = end.to_string();
        let key = CacheKey::new(ticker, ["history", start_s.as_str(), end_s.as_str()]);
        self.cached(&key, || {
            self.retry
                .run(ticker, |_| Ok(self.provider.get_history(ticker, start, end)?))
        })
    }

    fn cached<T, F>(&self, key: &CacheKey, fetch: F) -> Result<T, CaptureError>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Result<T, CaptureError>,
    {
        let Some(cache) = self.cache else {
            return fetch();
        };
        match cache.get::<T>(key) {
            Ok(Some(hit)) => return Ok(hit),
            Ok(None) => {}
            Err(e) => tracing::warn!(ticker = key.ticker(), "cache read failed: {e}"),
        }
        let value = fetch()?;
        if let Err(e) = cache.put(key, &value) {
            tracing::warn!(ticker = key.ticker(), "cache write failed: {e}");
        }
        Ok(value)
    }

    /// Snapshots for every ticker.
    pub fn fetch_universe(&self, tickers: &[String]) -> FetchOutcome<TickerSnapshot> {
        self.run_batches(tickers, |t| self.fetch_snapshot(t), |_, _| Ok(()))
            .unwrap_or_else(|(_, partial)| partial)
    }

    /// Price histories for every ticker over one date range.
    pub fn fetch_histories(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchOutcome<PriceSeries> {
        self.run_batches(tickers, |t| self.fetch_history(t, start, end), |_, _| Ok(()))
            .unwrap_or_else(|(_, partial)| partial)
    }

    /// Drive `fetch` over `tickers` in batches.
    ///
    /// `on_batch` runs on the calling thread after each batch joins, with
    /// that batch's results. If it fails, the run stops and the error is
    /// returned together with everything gathered so far.
    #[allow(clippy::type_complexity)]
    pub fn run_batches<T, F, B>(
        &self,
        tickers: &[String],
        fetch: F,
        mut on_batch: B,
    ) -> Result<FetchOutcome<T>, (CaptureError, FetchOutcome<T>)>
    where
        T: Send,
        F: Fn(&str) -> Result<T, CaptureError> + Sync,
        B: FnMut(usize, &FetchOutcome<T>) -> Result<(), CaptureError>,
    {
        let total = tickers.len();
        let mut outcome = FetchOutcome::default();

        for (batch_idx, batch) in tickers.chunks(self.batch_size).enumerate() {
            let offset = batch_idx * self.batch_size;

            if !self.provider.is_available() {
                tracing::warn!(
                    remaining = total - offset,
                    "provider unavailable, leaving remaining tickers for a later run"
                );
                outcome
                    .skipped
                    .extend(tickers[offset..].iter().cloned());
                break;
            }

            let results = self.pool.map_batch(batch, |i, ticker| {
                self.progress.on_start(ticker, offset + i, total);
                let result = fetch(ticker);
                self.progress.on_complete(ticker, result.as_ref().err());
                result
            });

            let mut batch_outcome = FetchOutcome::default();
            for (ticker, result) in batch.iter().zip(results) {
                match result {
                    Ok(item) => batch_outcome.items.push(item),
                    Err(CaptureError::Provider(
                        ProviderError::CircuitBreakerTripped | ProviderError::Unauthorized(_),
                    )) => {
                        batch_outcome.skipped.push(ticker.clone());
                    }
                    Err(e) => {
                        tracing::warn!(ticker = %ticker, class = %e.class(), "ticker failed: {e}");
                        batch_outcome.failed.push(FailedTicker::new(ticker, &e));
                    }
                }
            }

            self.progress.on_batch_complete(
                batch_idx,
                batch_outcome.items.len(),
                batch_outcome.failed.len(),
                batch.len(),
            );

            let hook = on_batch(batch_idx, &batch_outcome);
            outcome.items.append(&mut batch_outcome.items);
            outcome.failed.append(&mut batch_outcome.failed);
            outcome.skipped.append(&mut batch_outcome.skipped);
            if let Err(e) = hook {
                return Err((e, outcome));
            }
        }

        let report = outcome.report();
        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "bulk fetch complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use divcap_core::data::{InMemoryProvider, NoProgress};
    use serde_json::{json, Value};
    use std::collections::BTreeMap as Map;

    fn fields(beta: f64) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("beta".into(), json!(beta));
        m.insert("notAllowListed".into(), json!("dropped"));
        m
    }

    fn tickers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_zero_batch_size() {
        let p = InMemoryProvider::new();
        let cfg = BulkConfig {
            batch_size: 0,
            ..BulkConfig::default()
        };
        assert!(matches!(
            BulkFetchOrchestrator::new(&p, cfg),
            Err(BulkError::Settings(_))
        ));
    }

    #[test]
    fn snapshot_keeps_allow_list_only() {
        let p = InMemoryProvider::new()
            .with_snapshot("KO", fields(0.59))
            .with_price_target("KO", 67.5);
        let orch = BulkFetchOrchestrator::new(&p, BulkConfig::default()).unwrap();
        let snap = orch.fetch_snapshot("KO").unwrap();
        assert_eq!(snap.field("beta"), Some(&json!(0.59)));
        assert_eq!(snap.field("notAllowListed"), None);
        assert_eq!(snap.price_target, Some(67.5));
    }

    #[test]
    fn cache_hit_skips_provider() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FetchCache::new(dir.path());
        let p = InMemoryProvider::new().with_snapshot("KO", fields(0.59));
        let orch = BulkFetchOrchestrator::new(&p, BulkConfig::default())
            .unwrap()
            .with_cache(&cache);

        orch.fetch_snapshot("KO").unwrap();
        orch.fetch_snapshot("KO").unwrap();
        assert_eq!(p.snapshot_calls("KO"), 1);
        assert_eq!(cache.status().unwrap().entries, 1);
    }

    #[test]
    fn on_batch_sees_each_batch_in_order() {
        let p = InMemoryProvider::new()
            .with_snapshot("A", fields(1.0))
            .with_snapshot("B", fields(1.0))
            .with_snapshot("C", fields(1.0));
        let cfg = BulkConfig {
            max_workers: 2,
            batch_size: 2,
            retry: RetryPolicy::no_retry(),
        };
        let orch = BulkFetchOrchestrator::new(&p, cfg)
            .unwrap()
            .with_progress(&NoProgress);

        let mut seen = Vec::new();
        let outcome = orch
            .run_batches(
                &tickers(&["A", "B", "C", "ZZZZ"]),
                |t| orch.fetch_snapshot(t),
                |idx, batch| {
                    seen.push((idx, batch.items.len(), batch.failed.len()));
                    Ok(())
                },
            )
            .unwrap_or_else(|(e, _)| panic!("{e}"));

        assert_eq!(seen, vec![(0, 2, 0), (1, 1, 1)]);
        assert_eq!(outcome.failed[0].ticker, "ZZZZ");
        assert_eq!(outcome.failed[0].class, ErrorClass::Provider);
    }

    #[test]
    fn hook_failure_stops_run_with_partial_outcome() {
        let p = InMemoryProvider::new()
            .with_snapshot("A", fields(1.0))
            .with_snapshot("B", fields(1.0));
        let cfg = BulkConfig {
            batch_size: 1,
            ..BulkConfig::default()
        };
        let orch = BulkFetchOrchestrator::new(&p, cfg).unwrap();
        let (err, partial) = orch
            .run_batches(
                &tickers(&["A", "B"]),
                |t| orch.fetch_snapshot(t),
                |_, _| Err(CaptureError::InvalidInput("disk full".into())),
            )
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::InvalidInput(_)));
        assert_eq!(partial.items.len(), 1);
        assert_eq!(p.snapshot_calls("B"), 0);
    }

    #[test]
    fn rejected_session_skips_instead_of_failing() {
        let p = InMemoryProvider::new()
            .with_snapshot("A", fields(1.0))
            .always_failing("B", ProviderError::Unauthorized("Invalid Crumb".into()));
        let orch = BulkFetchOrchestrator::new(&p, BulkConfig::default())
            .unwrap()
            .with_progress(&NoProgress);

        let outcome = orch.fetch_universe(&tickers(&["A", "B"]));
        assert_eq!(outcome.items.len(), 1);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.skipped, vec!["B".to_string()]);
        // Not retryable, so one call only.
        assert_eq!(p.snapshot_calls("B"), 1);
    }

    #[test]
    fn report_counts_by_class() {
        let outcome: FetchOutcome<()> = FetchOutcome {
            items: vec![(), ()],
            failed: vec![
                FailedTicker {
                    ticker: "X".into(),
                    class: ErrorClass::Provider,
                    reason: "down".into(),
                },
                FailedTicker {
                    ticker: "Y".into(),
                    class: ErrorClass::Provider,
                    reason: "down".into(),
                },
            ],
            skipped: vec!["Z".into()],
        };
        let report = outcome.report();
        assert_eq!(report.total, 5);
        assert_eq!(report.failures_by_class[&ErrorClass::Provider], 2);
        let text = report.to_string();
        assert!(text.starts_with("2/5 succeeded, 2 failed, 1 skipped"));
        assert!(text.contains("provider: 2"));
    }
}
