//! Multi-ticker strategy runs.
//!
//! Each ticker runs independently on the orchestrator's worker pool; a
//! ticker whose provider calls fail is reported and excluded, never fatal.

use serde::Serialize;
use std::collections::BTreeMap;

use divcap_core::backtest::{run_strategy, summarize, Stats, StrategyRun};
use divcap_core::domain::{StrategyParameters, TRADE_COLUMNS};
use divcap_core::storage::Table;
use divcap_core::ErrorClass;

use crate::bulk::{BulkFetchOrchestrator, FailedTicker, FetchReport};

/// Per-ticker runs plus overall statistics across every trade.
#[derive(Debug, Clone, Serialize)]
pub struct UniverseRun {
    pub runs: Vec<StrategyRun>,
    pub failed: Vec<FailedTicker>,
    pub overall: Stats,
    pub report: FetchReport,
}

impl UniverseRun {
    /// One flat trade table with a leading `ticker` column.
    pub fn trade_table(&self) -> Table {
        let mut table = Table::with_columns(TRADE_COLUMNS.iter().copied());
        for run in &self.runs {
            for t in &run.trades {
                table.push(t.to_row(Some(&run.ticker)));
            }
        }
        table
    }

    pub fn per_ticker_stats(&self) -> BTreeMap<String, Stats> {
        self.runs
            .iter()
            .map(|r| (r.ticker.clone(), r.stats.clone()))
            .collect()
    }

    pub fn trade_count(&self) -> usize {
        self.runs.iter().map(|r| r.trades.len()).sum()
    }
}

/// Run `template`'s strategy for every ticker.
///
/// `template` supplies the offsets and date range; its ticker is replaced.
pub fn run_universe(
    orchestrator: &BulkFetchOrchestrator<'_>,
    template: &StrategyParameters,
    tickers: &[String],
) -> UniverseRun {
    let provider = orchestrator.provider();
    let retry = orchestrator.retry_policy();

    let outcome = orchestrator
        .run_batches(
            tickers,
            |ticker| {
                let params = template.for_ticker(ticker)?;
                retry.run(ticker, |_| run_strategy(provider, &params))
            },
            |_, _| Ok(()),
        )
        .unwrap_or_else(|(_, partial)| partial);

    let report = outcome.report();
    let mut failed = outcome.failed;
    for t in outcome.skipped {
        failed.push(FailedTicker {
            ticker: t,
            class: ErrorClass::Provider,
            reason: "provider unavailable".into(),
        });
    }

    let overall = summarize(outcome.items.iter().flat_map(|r| r.trades.iter()));
    tracing::info!(
        tickers = outcome.items.len(),
        failed = failed.len(),
        "universe strategy run complete"
    );

    UniverseRun {
        runs: outcome.items,
        failed,
        overall,
        report,
    }
}
