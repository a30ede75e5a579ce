//! Dividend capture backtest engine.
//!
//! EventSource -> TradeBuilder (with PriceLookup) -> ResultAggregator.

pub mod aggregate;
pub mod events;
pub mod price_lookup;
pub mod trade_builder;

pub use aggregate::{summarize, Stats, TradeSummary};
pub use events::EventSource;
pub use price_lookup::{closest_price, fill_price, FORWARD_WINDOW_DAYS};
pub use trade_builder::{capture_return, TradeBuilder};

use serde::Serialize;

use crate::data::MarketDataProvider;
use crate::domain::{DividendEvent, StrategyParameters, TRADE_COLUMNS};
use crate::error::CaptureError;
use crate::storage::Table;

/// Trades and statistics for one ticker.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyRun {
    pub ticker: String,
    pub trades: Vec<DividendEvent>,
    pub stats: Stats,
}

impl StrategyRun {
    /// One row per trade. `with_ticker` adds the leading ticker column.
    pub fn trade_table(&self, with_ticker: bool) -> Table {
        let columns = TRADE_COLUMNS
            .iter()
            .copied()
            .filter(|c| with_ticker || *c != "ticker");
        let mut table = Table::with_columns(columns);
        let ticker = with_ticker.then_some(self.ticker.as_str());
        for t in &self.trades {
            table.push(t.to_row(ticker));
        }
        table
    }
}

/// Run the strategy for one ticker.
pub fn run_strategy(
    provider: &dyn MarketDataProvider,
    params: &StrategyParameters,
) -> Result<StrategyRun, CaptureError> {
    let events = EventSource::new(provider).events(
        params.ticker(),
        params.start_date(),
        params.end_date(),
    )?;
    let trades = TradeBuilder::new(provider).build_trades(events, params)?;
    let stats = summarize(&trades);

    let resolved = trades.iter().filter(|t| t.is_resolved()).count();
    tracing::info!(
        ticker = params.ticker(),
        trades = trades.len(),
        resolved,
        "strategy run complete"
    );

    Ok(StrategyRun {
        ticker: params.ticker().to_string(),
        trades,
        stats,
    })
}
