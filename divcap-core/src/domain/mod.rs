//! Domain types for DivCap

pub mod event;
pub mod params;
pub mod price_series;
pub mod snapshot;

pub use event::{DividendEvent, DividendRecord, TRADE_COLUMNS};
pub use params::StrategyParameters;
pub use price_series::{PricePoint, PriceSeries};
pub use snapshot::{
    normalize_timestamps, snapshot_table, TickerSnapshot, PREFERRED_COLUMNS, SNAPSHOT_FIELDS,
};

/// Ticker symbol type alias
pub type Ticker = String;
