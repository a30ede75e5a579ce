//! Export and persistence of run outputs.
//!
//! - **CSV**: any table (trade table, snapshot table) via the `csv` crate
//! - **JSON**: overall and per-ticker stats plus failures
//! - **SQLite / Parquet**: trade and snapshot tables, per-ticker history archives

use serde_json::Value;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use divcap_core::domain::PriceSeries;
use divcap_core::storage::{ColumnarStore, Compression, RelationalStore, Table, WriteMode};

use crate::strategy::UniverseRun;

/// Relational table names used by the pipeline.
pub const TRADES_TABLE: &str = "dividend_trades";
pub const SNAPSHOTS_TABLE: &str = "ticker_snapshots";

// ─── CSV export ─────────────────────────────────────────────────────

/// Render a table as CSV with its column order. Nulls are empty cells.
pub fn export_table_csv(table: &Table) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(&table.columns)?;
    for row in &table.rows {
        wtr.write_record(table.columns.iter().map(|c| cell_text(row.get(c))))?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn cell_text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_stats_json(run: &UniverseRun) -> Result<String> {
    let doc = serde_json::json!({
        "overall": run.overall,
        "per_ticker": run.per_ticker_stats(),
        "report": run.report,
        "failed": run.failed,
    });
    serde_json::to_string_pretty(&doc).context("failed to serialize stats")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the dashboard surface for a strategy run.
///
/// Creates `dividend_capture_{timestamp}/` under `output_dir` containing:
/// - `trades.csv`: one row per trade with a ticker column
/// - `stats.json`: overall and per-ticker stats, failures
///
/// Returns the path to the created directory.
pub fn save_artifacts(run: &UniverseRun, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!(
        "dividend_capture_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let trades_csv = export_table_csv(&run.trade_table())?;
    std::fs::write(run_dir.join("trades.csv"), trades_csv)?;

    let stats_json = export_stats_json(run)?;
    std::fs::write(run_dir.join("stats.json"), stats_json)?;

    Ok(run_dir)
}

// ─── Persistence ────────────────────────────────────────────────────

/// Write the trade table. Runs with no trades write nothing.
pub fn persist_trades(store: &dyn RelationalStore, run: &UniverseRun, mode: WriteMode) -> Result<usize> {
    let table = run.trade_table();
    if table.is_empty() {
        tracing::info!("no trades to persist");
        return Ok(0);
    }
    store
        .save_rows(&table, TRADES_TABLE, mode)
        .with_context(|| format!("failed to save table {TRADES_TABLE}"))?;
    Ok(table.len())
}

pub fn persist_snapshots(store: &dyn RelationalStore, snapshots: &Table, mode: WriteMode) -> Result<usize> {
    if snapshots.is_empty() {
        tracing::info!("no snapshots to persist");
        return Ok(0);
    }
    store
        .save_rows(snapshots, SNAPSHOTS_TABLE, mode)
        .with_context(|| format!("failed to save table {SNAPSHOTS_TABLE}"))?;
    Ok(snapshots.len())
}

/// Archive key for a ticker's history: `{TICKER}_history`, with characters
/// outside `[A-Za-z0-9_.-]` replaced.
pub fn history_key(ticker: &str) -> String {
    let safe: String = ticker
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("{}_history", safe.trim_start_matches('.'))
}

/// One columnar file per non-empty series.
pub fn archive_histories(
    store: &dyn ColumnarStore,
    series: &[PriceSeries],
    compression: Compression,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(series.len());
    for s in series.iter().filter(|s| !s.is_empty()) {
        let key = history_key(&s.ticker);
        let path = store
            .save(&s.to_table(), &key, compression)
            .with_context(|| format!("failed to archive history for {}", s.ticker))?;
        paths.push(path);
    }
    tracing::info!(archived = paths.len(), "histories archived");
    Ok(paths)
}
