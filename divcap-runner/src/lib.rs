//! DivCap Runner: orchestration on top of `divcap-core`.
//!
//! This crate provides:
//! - TOML pipeline configuration
//! - Retry policy and a bounded worker pool
//! - The bulk fetch orchestrator (snapshots and price histories)
//! - Checkpointed, resumable bulk fetches
//! - Multi-ticker strategy runs
//! - CSV/JSON export and SQLite/Parquet persistence

pub mod bulk;
pub mod config;
pub mod export;
pub mod pool;
pub mod resume;
pub mod retry;
pub mod strategy;

pub use bulk::{BulkConfig, BulkError, BulkFetchOrchestrator, FailedTicker, FetchOutcome, FetchReport};
pub use config::{ConfigError, PipelineConfig};
pub use export::{save_artifacts, SNAPSHOTS_TABLE, TRADES_TABLE};
pub use pool::WorkerPool;
pub use resume::{resume_state, ResumableFetch, ResumeState, ResumeSummary};
pub use retry::RetryPolicy;
pub use strategy::{run_universe, UniverseRun};
