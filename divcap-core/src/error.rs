//! Error taxonomy for the capture pipeline.
//!
//! Per-ticker failures are recovered locally (retry, then skip and record);
//! persistence failures surface to the caller. `ErrorClass` is the coarse
//! category used when reporting what went wrong across a run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::data::ProviderError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("no trading day found within {window_days} days from {date}")]
    MissingPrice { date: NaiveDate, window_days: u32 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CaptureError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CaptureError::Provider(_) => ErrorClass::Provider,
            CaptureError::MissingPrice { .. } => ErrorClass::MissingPrice,
            CaptureError::InvalidInput(_) => ErrorClass::InvalidInput,
            CaptureError::Storage(StorageError::InvalidInput(_)) => ErrorClass::InvalidInput,
            CaptureError::Storage(_) => ErrorClass::Storage,
        }
    }
}

/// Failure category reported per ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Provider,
    MissingPrice,
    InvalidInput,
    Storage,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Provider => "provider",
            ErrorClass::MissingPrice => "missing_price",
            ErrorClass::InvalidInput => "invalid_input",
            ErrorClass::Storage => "storage",
        };
        f.write_str(s)
    }
}
