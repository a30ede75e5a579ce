//! Bulk fetch orchestration against the in-memory provider: batching,
//! retries, per-ticker isolation, caching, and history archiving.

use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use divcap_core::data::{FetchCache, InMemoryProvider, ProviderError};
use divcap_core::domain::{PricePoint, PriceSeries, SNAPSHOT_FIELDS};
use divcap_core::storage::{ColumnarStore, Compression, ParquetStore};
use divcap_core::ErrorClass;
use divcap_runner::export::{archive_histories, history_key};
use divcap_runner::{BulkConfig, BulkFetchOrchestrator, RetryPolicy};

fn snapshot_fields(price: f64) -> BTreeMap<String, Value> {
    let mut m = BTreeMap::new();
    m.insert("longName".into(), json!("Test Co"));
    m.insert("open".into(), json!(price));
    m.insert("dividendYield".into(), json!(0.03));
    m.insert("exDividendDate".into(), json!(1_685_577_600));
    m
}

fn universe(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("T{i:03}")).collect()
}

fn provider_for(tickers: &[String]) -> InMemoryProvider {
    tickers.iter().fold(InMemoryProvider::new(), |p, t| {
        p.with_snapshot(t, snapshot_fields(10.0))
    })
}

fn config(workers: usize, batch: usize, retries: u32) -> BulkConfig {
    BulkConfig {
        max_workers: workers,
        batch_size: batch,
        retry: RetryPolicy::from_retries(retries, Duration::ZERO),
    }
}

#[test]
fn every_ticker_accounted_for() {
    let tickers = universe(23);
    let provider = provider_for(&tickers)
        .always_failing("T005", ProviderError::Other("boom".into()))
        .always_failing("T017", ProviderError::SymbolNotFound { symbol: "T017".into() });
    let orch = BulkFetchOrchestrator::new(&provider, config(5, 10, 2)).unwrap();

    let outcome = orch.fetch_universe(&tickers);
    assert_eq!(outcome.items.len(), 21);
    assert_eq!(outcome.failed.len(), 2);
    assert!(outcome.skipped.is_empty());

    let report = outcome.report();
    assert_eq!(report.total, 23);
    assert_eq!(report.failures_by_class[&ErrorClass::Provider], 2);

    // Retryable failure used all attempts; not-found stopped after one.
    assert_eq!(provider.snapshot_calls("T005"), 3);
    assert_eq!(provider.snapshot_calls("T017"), 1);
}

#[test]
fn transient_failures_recover_within_retries() {
    let tickers = universe(4);
    let provider = provider_for(&tickers).failing("T002", 2);
    let orch = BulkFetchOrchestrator::new(&provider, config(2, 2, 2)).unwrap();

    let outcome = orch.fetch_universe(&tickers);
    assert_eq!(outcome.items.len(), 4);
    assert!(outcome.failed.is_empty());
    assert_eq!(provider.snapshot_calls("T002"), 3);
}

#[test]
fn snapshots_carry_full_allow_list() {
    let tickers = universe(3);
    let provider = provider_for(&tickers);
    let orch = BulkFetchOrchestrator::new(&provider, BulkConfig::default()).unwrap();

    let outcome = orch.fetch_universe(&tickers);
    for snap in &outcome.items {
        for field in SNAPSHOT_FIELDS {
            assert!(snap.field(field).is_some(), "missing {field}");
        }
        assert_eq!(snap.field("beta"), Some(&Value::Null));
    }
}

#[test]
fn cache_serves_second_run_and_purges() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FetchCache::new(dir.path());
    let tickers = universe(6);
    let provider = provider_for(&tickers);
    let orch = BulkFetchOrchestrator::new(&provider, config(3, 4, 0))
        .unwrap()
        .with_cache(&cache);

    orch.fetch_universe(&tickers);
    orch.fetch_universe(&tickers);
    assert!(tickers.iter().all(|t| provider.snapshot_calls(t) == 1));
    assert_eq!(cache.status().unwrap().entries, 6);

    assert_eq!(cache.purge_older_than(Duration::from_secs(3600)).unwrap(), 0);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(cache.purge_older_than(Duration::from_millis(1)).unwrap(), 6);
}

#[test]
fn histories_fetch_and_archive() {
    let d = |m, day| NaiveDate::from_ymd_opt(2023, m, day).unwrap();
    let series = PriceSeries::from_points(
        "KO",
        [
            (d(5, 30), PricePoint::new(59.8, 60.0)),
            (d(5, 31), PricePoint::new(60.0, 60.4)),
            (d(6, 1), PricePoint::new(60.3, 60.1)),
        ],
    );
    let provider = InMemoryProvider::new().with_series(series);
    let orch = BulkFetchOrchestrator::new(&provider, BulkConfig::default()).unwrap();

    let tickers = vec!["KO".to_string(), "NOPE".to_string()];
    let outcome = orch.fetch_histories(&tickers, d(5, 31), d(6, 30));
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].len(), 2);
    assert_eq!(outcome.failed[0].ticker, "NOPE");

    let dir = tempfile::tempdir().unwrap();
    let store = ParquetStore::new(dir.path());
    let paths = archive_histories(&store, &outcome.items, Compression::Snappy).unwrap();
    assert_eq!(paths.len(), 1);

    let loaded = store.load(&history_key("KO")).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.string_column("date"), vec!["2023-05-31", "2023-06-01"]);
}
