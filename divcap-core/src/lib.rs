//! DivCap Core: domain types, market data, storage, and the dividend capture engine.
//!
//! This crate contains:
//! - Domain types (strategy parameters, dividend events, price series, ticker snapshots)
//! - The market-data provider capability, a Yahoo Finance implementation, and an
//!   in-memory provider for tests and offline runs
//! - An on-disk fetch cache with age-based eviction
//! - Storage capabilities: SQLite tables, Parquet files, and the checkpoint store
//! - The backtest engine: price lookup, event source, trade builder, aggregator

pub mod backtest;
pub mod data;
pub mod domain;
pub mod error;
pub mod storage;

pub use error::{CaptureError, ErrorClass};

#[cfg(test)]
mod tests {
    use super::*;

    /// Everything handed to the worker pool must cross thread boundaries.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::DividendEvent>();
        require_sync::<domain::DividendEvent>();
        require_send::<domain::PriceSeries>();
        require_sync::<domain::PriceSeries>();
        require_send::<domain::TickerSnapshot>();
        require_sync::<domain::TickerSnapshot>();
        require_send::<domain::StrategyParameters>();
        require_sync::<domain::StrategyParameters>();

        require_send::<data::FetchCache>();
        require_sync::<data::FetchCache>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::InMemoryProvider>();
        require_sync::<data::InMemoryProvider>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();

        require_send::<storage::CheckpointStore>();
        require_sync::<storage::CheckpointStore>();
        require_send::<storage::SqliteStore>();
        require_sync::<storage::SqliteStore>();
        require_send::<storage::ParquetStore>();
        require_sync::<storage::ParquetStore>();

        require_send::<CaptureError>();
        require_sync::<CaptureError>();
    }

    #[test]
    fn provider_trait_is_object_safe() {
        fn _takes_dyn(p: &dyn data::MarketDataProvider) -> &str {
            p.name()
        }
    }
}
