//! On-disk fetch cache.
//!
//! Layout: `{dir}/{TICKER}-{hash}.json`, where `hash` is the first 16 hex
//! digits of a blake3 digest over the ticker and the requested field set.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - No TTL at lookup time; `purge_older_than` evicts by modification time
//! - Corrupt entries are quarantined (`{file}.quarantined`) and read as misses
//!
//! Workers write concurrently without a lock. Distinct tickers map to
//! distinct files, so two writers never race on one key.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::storage::StorageError;

/// Cache key: ticker plus an order-insensitive field set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    ticker: String,
    digest: String,
}

impl CacheKey {
    pub fn new<I, S>(ticker: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fields: Vec<String> = fields.into_iter().map(|f| f.as_ref().to_string()).collect();
        fields.sort();
        fields.dedup();

        let mut hasher = blake3::Hasher::new();
        hasher.update(ticker.as_bytes());
        for f in &fields {
            hasher.update(b"\0");
            hasher.update(f.as_bytes());
        }
        let digest = hasher.finalize().to_hex()[..16].to_string();

        Self {
            ticker: ticker.to_string(),
            digest,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    fn file_name(&self) -> String {
        let safe: String = self
            .ticker
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        format!("{safe}-{}.json", self.digest)
    }
}

/// Entry count and on-disk size of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Keyed JSON cache for provider results. Passed by reference to whoever
/// needs it; there is no process-global instance.
#[derive(Debug, Clone)]
pub struct FetchCache {
    dir: PathBuf,
}

impl FetchCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// `Ok(None)` on a miss or a quarantined corrupt entry.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, StorageError> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                tracing::trace!(ticker = key.ticker(), "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                let quarantine = path.with_extension("json.quarantined");
                tracing::warn!(path = %path.display(), "quarantining corrupt cache entry: {e}");
                let _ = fs::rename(&path, &quarantine);
                Ok(None)
            }
        }
    }

    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_vec(value)?;
        fs::write(&tmp_path, json).map_err(|e| StorageError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::io(&path, e)
        })?;
        Ok(path)
    }

    /// Delete entries whose modification time is more than `max_age` ago.
    /// Returns the number removed.
    pub fn purge_older_than(&self, max_age: Duration) -> Result<usize, StorageError> {
        let now = SystemTime::now();
        let mut removed = 0;
        for (path, meta) in self.entries()? {
            let modified = meta.modified().map_err(|e| StorageError::io(&path, e))?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
                removed += 1;
            }
        }
        tracing::info!(removed, max_age_secs = max_age.as_secs(), "cache purged");
        Ok(removed)
    }

    pub fn status(&self) -> Result<CacheStats, StorageError> {
        let entries = self.entries()?;
        Ok(CacheStats {
            entries: entries.len(),
            total_bytes: entries.iter().map(|(_, m)| m.len()).sum(),
        })
    }

    pub fn clear(&self) -> Result<usize, StorageError> {
        let entries = self.entries()?;
        for (path, _) in &entries {
            fs::remove_file(path).map_err(|e| StorageError::io(path, e))?;
        }
        Ok(entries.len())
    }

    /// Live `.json` entries (not temp or quarantined files).
    fn entries(&self) -> Result<Vec<(PathBuf, fs::Metadata)>, StorageError> {
        let read = match fs::read_dir(&self.dir) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };
        let mut out = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| StorageError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let meta = entry.metadata().map_err(|e| StorageError::io(&path, e))?;
            if meta.is_file() {
                out.push((path, meta));
            }
        }
        Ok(out)
    }
}
