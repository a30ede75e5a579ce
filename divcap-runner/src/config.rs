//! Pipeline configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. CLI flags override individual values after loading.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use divcap_core::domain::StrategyParameters;
use divcap_core::storage::Compression;
use divcap_core::CaptureError;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub bulk: BulkSettings,
    pub cache: CacheSettings,
    pub checkpoint: CheckpointSettings,
    pub storage: StorageSettings,
    pub strategy: StrategySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSettings {
    /// Concurrent fetches within a batch.
    pub max_workers: usize,
    /// Tickers per batch; batches run one after another.
    pub batch_size: usize,
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            max_workers: 5,
            batch_size: 100,
            retries: 2,
            retry_backoff_ms: 0,
        }
    }
}

impl BulkSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_retries(self.retries, Duration::from_millis(self.retry_backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub dir: PathBuf,
    pub max_age_days: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/cache"),
            max_age_days: 7,
        }
    }
}

impl CacheSettings {
    pub fn max_age(&self) -> Duration {
        days(self.max_age_days)
    }
}

/// `n` whole days, saturating instead of overflowing.
pub fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(86_400))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    pub dir: PathBuf,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/checkpoint"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database for trade and snapshot tables.
    pub database: PathBuf,
    /// Parquet archive directory.
    pub archive_dir: PathBuf,
    pub compression: Compression,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/stock_data.db"),
            archive_dir: PathBuf::from("data/archive"),
            compression: Compression::Snappy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub days_before: u32,
    pub days_after: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            days_before: 3,
            days_after: 3,
            start_date: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 30).unwrap_or_default(),
        }
    }
}

impl StrategySettings {
    pub fn params_for(&self, ticker: &str) -> Result<StrategyParameters, CaptureError> {
        StrategyParameters::new(
            ticker,
            self.days_before,
            self.days_after,
            self.start_date,
            self.end_date,
        )
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk.max_workers == 0 {
            return Err(ConfigError::Invalid("bulk.max_workers must be at least 1".into()));
        }
        if self.bulk.batch_size == 0 {
            return Err(ConfigError::Invalid("bulk.batch_size must be at least 1".into()));
        }
        if self.strategy.start_date > self.strategy.end_date {
            return Err(ConfigError::Invalid(format!(
                "strategy.start_date {} is after strategy.end_date {}",
                self.strategy.start_date, self.strategy.end_date
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
