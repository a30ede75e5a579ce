//! Resumable bulk snapshot fetch over a checkpoint directory.
//!
//! State machine per universe:
//!
//! ```text
//! NotStarted -> InProgress (chunk n saved, n+1 pending) -> ... -> Complete
//! ```
//!
//! On restart the covered set is rebuilt from the saved chunks plus the
//! failed-ticker record; only `universe - (chunked ∪ failed)` is fetched.
//! Each completed batch becomes one chunk with a fresh id, written by the
//! orchestrating thread between batches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use divcap_core::data::Universe;
use divcap_core::domain::snapshot_table;
use divcap_core::storage::{CheckpointStore, StorageError, Table};
use divcap_core::CaptureError;

use crate::bulk::{BulkFetchOrchestrator, FetchReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResumeState {
    NotStarted,
    InProgress {
        chunks: usize,
        fetched: usize,
        failed: usize,
        remaining: usize,
    },
    Complete {
        chunks: usize,
        fetched: usize,
        failed: usize,
    },
}

/// Where a checkpoint stands relative to `universe`.
pub fn resume_state(store: &CheckpointStore, universe: &Universe) -> Result<ResumeState, StorageError> {
    let chunks = store.chunk_ids()?.len();
    let failed = store.load_failed_tickers()?;
    if chunks == 0 && failed.is_empty() {
        return Ok(ResumeState::NotStarted);
    }
    let covered = covered_tickers(&store.load_all_chunks()?, &failed);
    let fetched = universe
        .tickers()
        .iter()
        .filter(|t| covered.contains(*t) && !failed.contains(*t))
        .count();
    let failed_in_universe = universe.tickers().iter().filter(|t| failed.contains(*t)).count();
    let remaining = universe.remaining(&covered).len();

    Ok(if remaining == 0 {
        ResumeState::Complete {
            chunks,
            fetched,
            failed: failed_in_universe,
        }
    } else {
        ResumeState::InProgress {
            chunks,
            fetched,
            failed: failed_in_universe,
            remaining,
        }
    })
}

fn covered_tickers(chunks: &Table, failed: &BTreeSet<String>) -> BTreeSet<String> {
    chunks
        .string_column("ticker")
        .into_iter()
        .chain(failed.iter().cloned())
        .collect()
}

/// Result of one resumable run.
#[derive(Debug, Clone)]
pub struct ResumeSummary {
    /// All snapshot rows in the checkpoint, this run's and earlier ones.
    pub snapshots: Table,
    /// This run only.
    pub report: FetchReport,
    /// Tickers covered before this run started.
    pub previously_covered: usize,
    pub failed_total: BTreeSet<String>,
    pub skipped: Vec<String>,
    pub state: ResumeState,
}

pub struct ResumableFetch<'o, 's> {
    orchestrator: &'o BulkFetchOrchestrator<'o>,
    store: &'s CheckpointStore,
}

impl<'o, 's> ResumableFetch<'o, 's> {
    pub fn new(orchestrator: &'o BulkFetchOrchestrator<'o>, store: &'s CheckpointStore) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    /// Fetch whatever part of `universe` the checkpoint does not cover yet.
    ///
    /// Checkpoint write failures are logged and returned; chunks already
    /// written stay valid for the next attempt.
    pub fn run(&self, universe: &Universe) -> Result<ResumeSummary, CaptureError> {
        let existing = self.store.load_all_chunks()?;
        let failed = self.store.load_failed_tickers()?;
        let covered = covered_tickers(&existing, &failed);
        let remaining = universe.remaining(&covered);
        let previously_covered = universe.len() - remaining.len();

        if remaining.is_empty() {
            tracing::info!(tickers = universe.len(), "checkpoint already complete");
        } else {
            tracing::info!(
                remaining = remaining.len(),
                previously_covered,
                "resuming bulk fetch"
            );
        }

        let mut next_id = self.store.next_chunk_id()?;
        let store = self.store;
        let outcome = self
            .orchestrator
            .run_batches(
                &remaining,
                |t| self.orchestrator.fetch_snapshot(t),
                |batch_idx, batch| {
                    if !batch.items.is_empty() {
                        let rows = snapshot_table(&batch.items);
                        store.save_chunk(&rows, next_id).map_err(|e| {
                            tracing::error!(chunk_id = next_id, batch_idx, "checkpoint write failed: {e}");
                            CaptureError::from(e)
                        })?;
                        next_id += 1;
                    }
                    if !batch.failed.is_empty() {
                        store
                            .save_failed_tickers(batch.failed.iter().map(|f| f.ticker.clone()))
                            .map_err(|e| {
                                tracing::error!(batch_idx, "failed-ticker write failed: {e}");
                                CaptureError::from(e)
                            })?;
                    }
                    Ok(())
                },
            )
            .map_err(|(e, _partial)| e)?;

        let snapshots = self.store.load_all_chunks()?;
        let failed_total = self.store.load_failed_tickers()?;
        let state = resume_state(self.store, universe)?;

        Ok(ResumeSummary {
            snapshots,
            report: outcome.report(),
            previously_covered,
            failed_total,
            skipped: outcome.skipped,
            state,
        })
    }
}
