//! Multi-ticker strategy runs: per-ticker isolation, the flat trade table,
//! overall stats, and the exported artifacts.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use std::time::Duration;

use divcap_core::backtest::Stats;
use divcap_core::data::{InMemoryProvider, ProviderError};
use divcap_core::domain::{PricePoint, PriceSeries, StrategyParameters};
use divcap_core::storage::{RelationalStore, SqliteStore, WriteMode};
use divcap_runner::export::{export_table_csv, persist_trades};
use divcap_runner::{run_universe, save_artifacts, BulkConfig, BulkFetchOrchestrator, RetryPolicy, TRADES_TABLE};

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, m, day).unwrap()
}

/// Weekday closes; `step` per trading day, dividend on each ex-date.
fn series(ticker: &str, step: f64, ex_dates: &[NaiveDate]) -> PriceSeries {
    let mut s = PriceSeries::new(ticker);
    let mut date = d(1, 2);
    let mut close = 40.0;
    while date <= d(12, 29) {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            s.insert(date, PricePoint::new(close, close));
            close += step;
        }
        date = date + Days::new(1);
    }
    for ex in ex_dates {
        s.add_dividend(*ex, 0.50);
    }
    s
}

fn template() -> StrategyParameters {
    StrategyParameters::new("TEMPLATE", 3, 3, d(1, 1), d(12, 31)).unwrap()
}

fn orchestrator(p: &InMemoryProvider) -> BulkFetchOrchestrator<'_> {
    BulkFetchOrchestrator::new(
        p,
        BulkConfig {
            max_workers: 3,
            batch_size: 2,
            retry: RetryPolicy::new(2, Duration::ZERO),
        },
    )
    .unwrap()
}

fn tickers(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn failing_ticker_does_not_abort_run() {
    let provider = InMemoryProvider::new()
        .with_series(series("KO", 0.0, &[d(3, 14), d(6, 14)]))
        .with_series(series("PEP", 0.0, &[d(3, 2)]))
        .always_failing("BAD", ProviderError::NetworkUnreachable("reset".into()));
    let orch = orchestrator(&provider);

    let run = run_universe(&orch, &template(), &tickers(&["KO", "BAD", "PEP"]));
    assert_eq!(run.runs.len(), 2);
    assert_eq!(run.failed.len(), 1);
    assert_eq!(run.failed[0].ticker, "BAD");
    assert_eq!(run.trade_count(), 3);

    // Flat prices: every trade earns exactly the dividend.
    let s = run.overall.summary().unwrap();
    assert_eq!(s.total_trades, 3);
    assert_eq!(s.total_return, 1.5);
    assert_eq!(s.positive_trades, 3);
}

#[test]
fn trade_table_has_ticker_column() {
    let provider = InMemoryProvider::new()
        .with_series(series("KO", 0.0, &[d(6, 14)]))
        .with_series(series("T", 0.0, &[d(7, 7)]));
    let run = run_universe(&orchestrator(&provider), &template(), &tickers(&["KO", "T"]));

    let table = run.trade_table();
    assert_eq!(table.columns[0], "ticker");
    let mut names = table.string_column("ticker");
    names.sort();
    assert_eq!(names, vec!["KO", "T"]);

    let csv = export_table_csv(&table).unwrap();
    assert!(csv.starts_with("ticker,ex_date,dividend,buy_date,sell_date,price_buy,price_sell,total_return\n"));
}

#[test]
fn losing_and_flat_trades_count_as_losses() {
    // Five trading days at -0.10 cancel the dividend; a flat trade is a loss.
    let provider = InMemoryProvider::new()
        .with_series(series("DOWN", -0.10, &[d(6, 14)]))
        .with_series(series("FLAT", 0.0, &[]));
    let run = run_universe(&orchestrator(&provider), &template(), &tickers(&["DOWN", "FLAT"]));

    let per = run.per_ticker_stats();
    assert_eq!(per["FLAT"], Stats::NoValidTrades);
    let down = per["DOWN"].summary().unwrap();
    assert_eq!(down.negative_trades, 1);
    assert_eq!(down.profit_percentage, 0.0);
}

#[test]
fn artifacts_and_sqlite() {
    let provider = InMemoryProvider::new().with_series(series("KO", 0.01, &[d(6, 14)]));
    let run = run_universe(&orchestrator(&provider), &template(), &tickers(&["KO"]));

    let out = tempfile::tempdir().unwrap();
    let dir = save_artifacts(&run, out.path()).unwrap();
    assert!(dir.join("trades.csv").exists());
    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("stats.json")).unwrap()).unwrap();
    assert_eq!(stats["overall"]["status"], "summary");
    assert_eq!(stats["per_ticker"]["KO"]["total_trades"], 1);

    let db = SqliteStore::in_memory().unwrap();
    assert_eq!(persist_trades(&db, &run, WriteMode::Append).unwrap(), 1);
    assert_eq!(persist_trades(&db, &run, WriteMode::Append).unwrap(), 1);
    assert_eq!(db.load_table(TRADES_TABLE).unwrap().len(), 2);
}
