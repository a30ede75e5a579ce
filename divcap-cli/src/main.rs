//! DivCap CLI: backtest, bulk fetch, and cache/checkpoint management.
//!
//! Commands:
//! - `backtest`: run the dividend capture strategy for one or more tickers
//! - `fetch`: resumable bulk snapshot fetch into SQLite
//! - `history`: bulk price-history fetch archived as Parquet
//! - `cache purge` / `cache status`: fetch cache maintenance
//! - `checkpoint status` / `checkpoint clear`: bulk fetch checkpoint

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use divcap_core::data::{CircuitBreaker, FetchCache, TracingProgress, Universe, YahooProvider};
use divcap_core::storage::{CheckpointStore, ParquetStore, SqliteStore, WriteMode};
use divcap_runner::config::days;
use divcap_runner::export::{archive_histories, persist_snapshots, persist_trades};
use divcap_runner::{
    resume_state, run_universe, save_artifacts, BulkConfig, BulkFetchOrchestrator,
    PipelineConfig, ResumableFetch, ResumeState, UniverseRun,
};

#[derive(Parser)]
#[command(
    name = "divcap",
    about = "DivCap CLI: dividend capture backtests and resilient bulk fetch"
)]
struct Cli {
    /// Path to a TOML pipeline config. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dividend capture strategy for the given tickers.
    Backtest {
        /// Tickers to backtest (e.g., KO PEP T).
        #[arg(long, required = true, num_args = 1..)]
        tickers: Vec<String>,

        /// Calendar days before the ex-date to buy.
        #[arg(long)]
        days_before: Option<u32>,

        /// Calendar days after the ex-date to sell.
        #[arg(long)]
        days_after: Option<u32>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,

        /// Also append the trade table to this SQLite database.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output directory for trades.csv and stats.json.
        #[arg(long, default_value = "results")]
        output: PathBuf,
    },
    /// Resumable bulk snapshot fetch; writes the snapshot table to SQLite.
    Fetch {
        /// Universe file: TOML (`tickers = [...]`) or one ticker per line.
        #[arg(long, conflicts_with = "tickers")]
        universe: Option<PathBuf>,

        /// Tickers to fetch instead of a universe file.
        #[arg(long, num_args = 1..)]
        tickers: Vec<String>,

        #[arg(long)]
        max_workers: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Retries per ticker after the first attempt.
        #[arg(long)]
        retries: Option<u32>,

        /// Discard any existing checkpoint and start over.
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
    /// Bulk price-history fetch, archived to Parquet per ticker.
    History {
        #[arg(long, required = true, num_args = 1..)]
        tickers: Vec<String>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,
    },
    /// Fetch cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Bulk fetch checkpoint management.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove cache entries older than the given age.
    Purge {
        /// Defaults to the config's `cache.max_age_days`.
        #[arg(long)]
        max_age_days: Option<u64>,
    },
    /// Report cache entry count and size.
    Status,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Report progress of the checkpoint against a universe.
    Status {
        #[arg(long)]
        universe: PathBuf,
    },
    /// Delete all chunks and the failed-ticker record.
    Clear,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Backtest {
            tickers,
            days_before,
            days_after,
            start,
            end,
            db,
            output,
        } => {
            let mut config = config;
            if let Some(n) = days_before {
                config.strategy.days_before = n;
            }
            if let Some(n) = days_after {
                config.strategy.days_after = n;
            }
            if let Some(d) = parse_date(start.as_deref())? {
                config.strategy.start_date = d;
            }
            if let Some(d) = parse_date(end.as_deref())? {
                config.strategy.end_date = d;
            }
            config.validate()?;
            run_backtest_cmd(&config, &tickers, db.as_deref(), &output)
        }
        Commands::Fetch {
            universe,
            tickers,
            max_workers,
            batch_size,
            retries,
            fresh,
        } => {
            let mut config = config;
            if let Some(n) = max_workers {
                config.bulk.max_workers = n;
            }
            if let Some(n) = batch_size {
                config.bulk.batch_size = n;
            }
            if let Some(n) = retries {
                config.bulk.retries = n;
            }
            config.validate()?;
            let universe = load_universe(universe.as_deref(), &tickers)?;
            run_fetch_cmd(&config, &universe, fresh)
        }
        Commands::History { tickers, start, end } => {
            let start = parse_date(start.as_deref())?.unwrap_or(config.strategy.start_date);
            let end = parse_date(end.as_deref())?.unwrap_or(config.strategy.end_date);
            if start > end {
                bail!("start date {start} is after end date {end}");
            }
            let universe = Universe::from_tickers(&tickers);
            run_history_cmd(&config, universe.tickers(), start, end)
        }
        Commands::Cache { action } => {
            let cache = FetchCache::new(&config.cache.dir);
            match action {
                CacheAction::Purge { max_age_days } => {
                    let max_age = max_age_days
                        .map(days)
                        .unwrap_or_else(|| config.cache.max_age());
                    let removed = cache.purge_older_than(max_age)?;
                    println!("Removed {removed} cache entr{}.", if removed == 1 { "y" } else { "ies" });
                    Ok(())
                }
                CacheAction::Status => {
                    let stats = cache.status()?;
                    println!("Cache: {}", cache.dir().display());
                    println!("Entries:    {}", stats.entries);
                    println!("Total size: {}", format_size(stats.total_bytes));
                    Ok(())
                }
            }
        }
        Commands::Checkpoint { action } => {
            let store = CheckpointStore::new(&config.checkpoint.dir)?
                .with_compression(config.storage.compression);
            match action {
                CheckpointAction::Status { universe } => {
                    let universe = Universe::from_file(&universe)?;
                    print_resume_state(&resume_state(&store, &universe)?);
                    Ok(())
                }
                CheckpointAction::Clear => {
                    let removed = store.clear()?;
                    println!("Removed {removed} checkpoint file(s) from {}", store.dir().display());
                    Ok(())
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_date(s: Option<&str>) -> Result<Option<NaiveDate>> {
    s.map(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
    })
    .transpose()
}

fn load_universe(path: Option<&Path>, tickers: &[String]) -> Result<Universe> {
    let universe = match path {
        Some(p) => Universe::from_file(p)
            .with_context(|| format!("failed to read universe {}", p.display()))?,
        None => Universe::from_tickers(tickers),
    };
    if universe.is_empty() {
        bail!("no tickers given; pass --universe FILE or --tickers");
    }
    Ok(universe)
}

fn yahoo() -> Result<YahooProvider> {
    let circuit_breaker = Arc::new(CircuitBreaker::default_provider());
    Ok(YahooProvider::new(circuit_breaker)?)
}

fn run_backtest_cmd(
    config: &PipelineConfig,
    tickers: &[String],
    db: Option<&Path>,
    output: &Path,
) -> Result<()> {
    let universe = Universe::from_tickers(tickers);
    let Some(first) = universe.tickers().first() else {
        bail!("no tickers given");
    };
    let template = config.strategy.params_for(first)?;

    let provider = yahoo()?;
    let progress = TracingProgress;
    let orchestrator = BulkFetchOrchestrator::new(&provider, BulkConfig::from(&config.bulk))?
        .with_progress(&progress);

    let run = run_universe(&orchestrator, &template, universe.tickers());
    print_run(&run);

    let run_dir = save_artifacts(&run, output)?;
    println!("Artifacts saved to: {}", run_dir.display());

    if let Some(path) = db {
        let store = SqliteStore::open(path)?;
        let saved = persist_trades(&store, &run, WriteMode::Append)?;
        println!("Saved {saved} trade(s) to {}", path.display());
    }

    Ok(())
}

fn run_fetch_cmd(config: &PipelineConfig, universe: &Universe, fresh: bool) -> Result<()> {
    let store =
        CheckpointStore::new(&config.checkpoint.dir)?.with_compression(config.storage.compression);
    if fresh {
        let removed = store.clear()?;
        tracing::info!(removed, "checkpoint cleared");
    }

    let provider = yahoo()?;
    let cache = FetchCache::new(&config.cache.dir);
    let progress = TracingProgress;
    let orchestrator = BulkFetchOrchestrator::new(&provider, BulkConfig::from(&config.bulk))?
        .with_cache(&cache)
        .with_progress(&progress);

    let summary = ResumableFetch::new(&orchestrator, &store)
        .run(universe)
        .context("bulk fetch stopped; rerun to resume from the last checkpoint")?;

    println!();
    println!("=== Fetch Report ===");
    if summary.previously_covered > 0 {
        println!("Resumed: {} ticker(s) already covered", summary.previously_covered);
    }
    println!("{}", summary.report);
    if !summary.failed_total.is_empty() {
        println!("Failed tickers: {}", join(summary.failed_total.iter()));
    }
    if !summary.skipped.is_empty() {
        println!("Skipped (rerun to retry): {}", join(summary.skipped.iter()));
    }
    print_resume_state(&summary.state);

    if matches!(summary.state, ResumeState::Complete { .. }) {
        let db = SqliteStore::open(&config.storage.database)?;
        let saved = persist_snapshots(&db, &summary.snapshots, WriteMode::Replace)?;
        println!(
            "Saved {saved} snapshot row(s) to {}",
            config.storage.database.display()
        );
    }

    Ok(())
}

fn run_history_cmd(
    config: &PipelineConfig,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<()> {
    let provider = yahoo()?;
    let progress = TracingProgress;
    let orchestrator = BulkFetchOrchestrator::new(&provider, BulkConfig::from(&config.bulk))?
        .with_progress(&progress);

    let outcome = orchestrator.fetch_histories(tickers, start, end);
    let report = outcome.report();

    let archive = ParquetStore::new(&config.storage.archive_dir);
    let paths = archive_histories(&archive, &outcome.items, config.storage.compression)?;

    println!("{report}");
    for f in &outcome.failed {
        eprintln!("Error for {}: {}", f.ticker, f.reason);
    }
    println!(
        "Archived {} history file(s) to {}",
        paths.len(),
        config.storage.archive_dir.display()
    );
    Ok(())
}

fn print_run(run: &UniverseRun) {
    println!();
    println!("=== Dividend Capture ===");
    for r in &run.runs {
        println!();
        println!("--- {} ({} trades) ---", r.ticker, r.trades.len());
        println!("{}", r.stats);
    }
    println!();
    println!("--- Overall ---");
    println!("{}", run.overall);
    for f in &run.failed {
        println!("FAILED: {} [{}] {}", f.ticker, f.class, f.reason);
    }
    println!();
}

fn print_resume_state(state: &ResumeState) {
    match state {
        ResumeState::NotStarted => println!("Checkpoint: not started"),
        ResumeState::InProgress {
            chunks,
            fetched,
            failed,
            remaining,
        } => println!(
            "Checkpoint: in progress, {chunks} chunk(s), {fetched} fetched, {failed} failed, {remaining} remaining"
        ),
        ResumeState::Complete {
            chunks,
            fetched,
            failed,
        } => println!("Checkpoint: complete, {chunks} chunk(s), {fetched} fetched, {failed} failed"),
    }
}

fn join<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
