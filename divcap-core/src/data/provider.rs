//! Market-data provider capability and structured provider errors.
//!
//! The `MarketDataProvider` trait abstracts over data sources (Yahoo Finance,
//! the in-memory provider) so the engine and orchestrator can be driven
//! without the network.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{DividendRecord, PriceSeries};
use crate::error::CaptureError;

/// Upstream call failed or returned unusable data.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    /// The provider refused the session (e.g. a rejected crumb). Not specific
    /// to any ticker.
    #[error("provider rejected the session: {0}")]
    Unauthorized(String),

    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Transient failures worth another attempt. Unknown symbols and an open
    /// circuit breaker will not change on an immediate retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::NetworkUnreachable(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::ResponseFormatChanged(_)
            | ProviderError::Other(_) => true,
            ProviderError::SymbolNotFound { .. }
            | ProviderError::CircuitBreakerTripped
            | ProviderError::Unauthorized(_) => false,
        }
    }
}

/// Source of dividends, price history, and fundamental snapshots.
///
/// Implementations may return partial data; callers tolerate absent fields.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Full dividend history, ex-date ascending. No dividends is `Ok(vec![])`.
    fn get_dividends(&self, ticker: &str) -> Result<Vec<DividendRecord>, ProviderError>;

    /// Daily open/close/dividends over `[start, end]`.
    fn get_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, ProviderError>;

    /// Raw fundamental/quote fields by name.
    fn get_snapshot(&self, ticker: &str) -> Result<BTreeMap<String, Value>, ProviderError>;

    fn get_price_target(&self, ticker: &str) -> Result<Option<f64>, ProviderError>;

    /// False while the provider refuses requests (e.g. breaker open).
    fn is_available(&self) -> bool {
        true
    }
}

/// Progress callback for multi-ticker operations. Called from worker threads.
pub trait FetchProgress: Send + Sync {
    fn on_start(&self, ticker: &str, index: usize, total: usize);

    /// `error` is `None` on success.
    fn on_complete(&self, ticker: &str, error: Option<&CaptureError>);

    /// Called by the orchestrating thread after each batch joins.
    fn on_batch_complete(&self, batch: usize, succeeded: usize, failed: usize, total: usize);
}

/// Reports progress through `tracing`.
pub struct TracingProgress;

impl FetchProgress for TracingProgress {
    fn on_start(&self, ticker: &str, index: usize, total: usize) {
        tracing::debug!("[{}/{}] fetching {ticker}", index + 1, total);
    }

    fn on_complete(&self, ticker: &str, error: Option<&CaptureError>) {
        match error {
            None => tracing::debug!(ticker, "ok"),
            Some(e) => tracing::debug!(ticker, class = %e.class(), "failed: {e}"),
        }
    }

    fn on_batch_complete(&self, batch: usize, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(batch, succeeded, failed, total, "batch complete");
    }
}

/// Discards all progress events.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _ticker: &str, _index: usize, _total: usize) {}
    fn on_complete(&self, _ticker: &str, _error: Option<&CaptureError>) {}
    fn on_batch_complete(&self, _batch: usize, _succeeded: usize, _failed: usize, _total: usize) {}
}
