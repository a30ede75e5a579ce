//! Durable checkpoint for interrupted bulk fetches.
//!
//! Layout in the checkpoint directory:
//! - `chunk_{id:05}_{rows}.parquet`: one write-once file per completed batch
//! - `failed.json`: flat JSON array of failed tickers (set semantics)

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::parquet::{read_table, write_table};
use super::{Compression, StorageError, Table};

const FAILED_FILE: &str = "failed.json";

pub struct CheckpointStore {
    dir: PathBuf,
    compression: Compression,
}

impl CheckpointStore {
    /// Open (creating if needed) a checkpoint directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(Self {
            dir,
            compression: Compression::default(),
        })
    }

    /// Codec for new chunk files. Existing chunks are read whatever their codec.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one completed batch. Chunk ids are write-once.
    pub fn save_chunk(&self, rows: &Table, chunk_id: u32) -> Result<PathBuf, StorageError> {
        if rows.is_empty() {
            return Err(StorageError::InvalidInput(format!(
                "chunk {chunk_id} has no rows"
            )));
        }
        if self.chunk_files()?.iter().any(|(id, _)| *id == chunk_id) {
            return Err(StorageError::InvalidInput(format!(
                "chunk {chunk_id} already exists"
            )));
        }

        let path = self
            .dir
            .join(format!("chunk_{chunk_id:05}_{}.parquet", rows.len()));
        write_table(rows, &path, self.compression)?;
        tracing::info!(chunk_id, rows = rows.len(), "checkpoint chunk saved");
        Ok(path)
    }

    /// Ids of all saved chunks, ascending.
    pub fn chunk_ids(&self) -> Result<Vec<u32>, StorageError> {
        Ok(self.chunk_files()?.into_iter().map(|(id, _)| id).collect())
    }

    /// One past the highest saved id, or 0.
    pub fn next_chunk_id(&self) -> Result<u32, StorageError> {
        Ok(self
            .chunk_ids()?
            .last()
            .map(|id| id.saturating_add(1))
            .unwrap_or(0))
    }

    /// Concatenate every chunk in id order. No chunks yields an empty table.
    pub fn load_all_chunks(&self) -> Result<Table, StorageError> {
        let mut all = Table::default();
        for (id, path) in self.chunk_files()? {
            let chunk = read_table(&path)?;
            tracing::debug!(chunk_id = id, rows = chunk.len(), "loaded checkpoint chunk");
            all.extend(chunk);
        }
        Ok(all)
    }

    /// Merge `tickers` into the persisted failed set and return the union.
    pub fn save_failed_tickers<I, S>(&self, tickers: I) -> Result<BTreeSet<String>, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut failed = self.load_failed_tickers()?;
        failed.extend(tickers.into_iter().map(Into::into));

        let path = self.dir.join(FAILED_FILE);
        let tmp = self.dir.join(format!("{FAILED_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(&failed)?;
        fs::write(&tmp, json).map_err(|e| StorageError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StorageError::io(&path, e))?;
        Ok(failed)
    }

    pub fn load_failed_tickers(&self) -> Result<BTreeSet<String>, StorageError> {
        let path = self.dir.join(FAILED_FILE);
        if !path.exists() {
            return Ok(BTreeSet::new());
        }
        let bytes = fs::read(&path).map_err(|e| StorageError::io(&path, e))?;
        let list: Vec<String> = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(list.into_iter().collect())
    }

    /// Remove all chunks and the failed set.
    pub fn clear(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for (_, path) in self.chunk_files()? {
            fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
            removed += 1;
        }
        let failed = self.dir.join(FAILED_FILE);
        if failed.exists() {
            fs::remove_file(&failed).map_err(|e| StorageError::io(&failed, e))?;
            removed += 1;
        }
        tracing::info!(removed, dir = %self.dir.display(), "checkpoint cleared");
        Ok(removed)
    }

    /// `(id, path)` for every chunk file, sorted by id.
    fn chunk_files(&self) -> Result<Vec<(u32, PathBuf)>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut chunks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.dir, e))?;
            let path = entry.path();
            if let Some(id) = path.file_name().and_then(|n| n.to_str()).and_then(parse_chunk_id) {
                chunks.push((id, path));
            }
        }
        chunks.sort_by_key(|(id, _)| *id);
        Ok(chunks)
    }
}

/// `chunk_00012_100.parquet` -> 12
fn parse_chunk_id(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_prefix("chunk_")?.strip_suffix(".parquet")?;
    let (id, rows) = stem.split_once('_')?;
    rows.parse::<usize>().ok()?;
    id.parse().ok()
}
