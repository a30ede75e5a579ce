//! Parquet columnar store.
//!
//! Layout: `{dir}/{key}.parquet`
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Column types inferred from values: Int64, Float64, Boolean, else String
//! - Integrity validation on load (row count > 0)

use polars::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::{
    infer_kind, json_f64, validate_key, value_to_text, ColumnKind, ColumnarStore, Compression,
    Row, StorageError, Table,
};

/// Per-key Parquet archive.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    dir: PathBuf,
}

impl ParquetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.parquet"))
    }

    pub fn contains(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.key_path(key).exists()
    }
}

impl ColumnarStore for ParquetStore {
    fn save(
        &self,
        rows: &Table,
        key: &str,
        compression: Compression,
    ) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        if rows.is_empty() {
            return Err(StorageError::InvalidInput(format!(
                "refusing to archive empty table under '{key}'"
            )));
        }
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;
        let path = self.key_path(key);
        write_table(rows, &path, compression)?;
        tracing::debug!(key, rows = rows.len(), "archived table");
        Ok(path)
    }

    fn load(&self, key: &str) -> Result<Table, StorageError> {
        validate_key(key)?;
        read_table(&self.key_path(key))
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Write a table atomically: `{path}.tmp` then rename.
pub(crate) fn write_table(
    table: &Table,
    path: &Path,
    compression: Compression,
) -> Result<(), StorageError> {
    let mut df = table_to_dataframe(table)?;
    let tmp_path = path.with_extension("parquet.tmp");

    let file = fs::File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
    ParquetWriter::new(file)
        .with_compression(parquet_compression(compression))
        .finish(&mut df)
        .map_err(|e| StorageError::Parquet(format!("write {}: {e}", path.display())))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StorageError::io(path, e)
    })
}

/// Read and validate a Parquet file written by `write_table`.
pub(crate) fn read_table(path: &Path) -> Result<Table, StorageError> {
    let file = fs::File::open(path).map_err(|e| StorageError::io(path, e))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StorageError::Parquet(format!("read {}: {e}", path.display())))?;

    if df.height() == 0 {
        return Err(StorageError::Corrupt(format!(
            "empty parquet file {}",
            path.display()
        )));
    }

    dataframe_to_table(&df)
}

fn parquet_compression(c: Compression) -> ParquetCompression {
    match c {
        Compression::Uncompressed => ParquetCompression::Uncompressed,
        Compression::Snappy => ParquetCompression::Snappy,
        Compression::Gzip => ParquetCompression::Gzip(None),
        Compression::Zstd => ParquetCompression::Zstd(None),
        Compression::Lz4 => ParquetCompression::Lz4Raw,
    }
}

/// Convert a table to a DataFrame, one typed column per table column.
fn table_to_dataframe(table: &Table) -> Result<DataFrame, StorageError> {
    let mut columns = Vec::with_capacity(table.columns.len());
    for name in &table.columns {
        let values: Vec<&Value> = table
            .rows
            .iter()
            .map(|r| r.get(name).unwrap_or(&Value::Null))
            .collect();
        let col_name: PlSmallStr = name.as_str().into();
        let column = match infer_kind(values.iter().copied()) {
            ColumnKind::Int => Column::new(
                col_name,
                values.iter().map(|v| v.as_i64()).collect::<Vec<Option<i64>>>(),
            ),
            ColumnKind::Float => Column::new(
                col_name,
                values.iter().map(|v| v.as_f64()).collect::<Vec<Option<f64>>>(),
            ),
            ColumnKind::Bool => Column::new(
                col_name,
                values.iter().map(|v| v.as_bool()).collect::<Vec<Option<bool>>>(),
            ),
            ColumnKind::Text => Column::new(
                col_name,
                values
                    .iter()
                    .map(|v| value_to_text(v))
                    .collect::<Vec<Option<String>>>(),
            ),
        };
        columns.push(column);
    }

    DataFrame::new(columns).map_err(|e| StorageError::Parquet(format!("dataframe creation: {e}")))
}

/// Convert a DataFrame back to a table. Unknown dtypes are read as strings.
fn dataframe_to_table(df: &DataFrame) -> Result<Table, StorageError> {
    let map_err = |e: PolarsError| StorageError::Parquet(format!("column read: {e}"));

    let n = df.height();
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|c| c.to_string())
        .collect();
    let mut rows: Vec<Row> = vec![Row::new(); n];

    for (name, col) in names.iter().zip(df.get_columns()) {
        match col.dtype() {
            DataType::Int64 => {
                let ca = col.i64().map_err(map_err)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    row.insert(name.clone(), ca.get(i).map(Value::from).unwrap_or(Value::Null));
                }
            }
            DataType::Float64 => {
                let ca = col.f64().map_err(map_err)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    row.insert(name.clone(), ca.get(i).map(json_f64).unwrap_or(Value::Null));
                }
            }
            DataType::Boolean => {
                let ca = col.bool().map_err(map_err)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    row.insert(name.clone(), ca.get(i).map(Value::Bool).unwrap_or(Value::Null));
                }
            }
            _ => {
                let as_text = col.cast(&DataType::String).map_err(map_err)?;
                let ca = as_text.str().map_err(map_err)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    row.insert(
                        name.clone(),
                        ca.get(i)
                            .map(|s| Value::String(s.to_string()))
                            .unwrap_or(Value::Null),
                    );
                }
            }
        }
    }

    Ok(Table {
        columns: names,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut t = Table::default();
        for (ticker, beta, employees, tradeable) in [
            ("KO", Some(0.59), Some(79_100_i64), Some(false)),
            ("PEP", None, Some(318_000), None),
        ] {
            let mut row = Row::new();
            row.insert("ticker".into(), Value::String(ticker.into()));
            row.insert("beta".into(), beta.map(json_f64).unwrap_or(Value::Null));
            row.insert(
                "fullTimeEmployees".into(),
                employees.map(Value::from).unwrap_or(Value::Null),
            );
            row.insert(
                "cryptoTradeable".into(),
                tradeable.map(Value::Bool).unwrap_or(Value::Null),
            );
            t.push(row);
        }
        t
    }

    #[test]
    fn save_and_load_keeps_types_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let table = sample_table();

        store.save(&table, "staples", Compression::Zstd).unwrap();
        let loaded = store.load("staples").unwrap();

        assert_eq!(loaded.columns, table.columns);
        assert_eq!(loaded.rows, table.rows);
        assert!(store.contains("staples"));
        assert!(!dir.path().join("staples.parquet.tmp").exists());
    }

    #[test]
    fn empty_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let err = store
            .save(&Table::default(), "empty", Compression::Snappy)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[test]
    fn missing_key_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(StorageError::Io { .. })));
    }
}
