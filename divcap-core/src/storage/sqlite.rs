//! SQLite relational store for trade and snapshot tables.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{infer_kind, json_f64, ColumnKind, RelationalStore, Row, StorageError, Table, WriteMode};

/// Tables in one SQLite database file.
///
/// The connection is guarded by a mutex; writes come from the orchestrating
/// thread, so contention is not a concern.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Corrupt("sqlite connection lock poisoned".into()))
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        validate_table_name(name)?;
        let conn = self.conn()?;
        table_exists(&conn, name)
    }

    pub fn row_count(&self, name: &str) -> Result<usize, StorageError> {
        validate_table_name(name)?;
        let conn = self.conn()?;
        if !table_exists(&conn, name)? {
            return Err(StorageError::MissingTable(name.to_string()));
        }
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(name)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

impl RelationalStore for SqliteStore {
    fn load_table(&self, name: &str) -> Result<Table, StorageError> {
        validate_table_name(name)?;
        let conn = self.conn()?;
        if !table_exists(&conn, name)? {
            return Err(StorageError::MissingTable(name.to_string()));
        }

        let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(name)))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut table = Table::with_columns(columns.clone());

        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            let mut row = Row::new();
            for (i, col) in columns.iter().enumerate() {
                let value = match r.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => Value::from(n),
                    ValueRef::Real(f) => json_f64(f),
                    ValueRef::Text(t) | ValueRef::Blob(t) => {
                        Value::String(String::from_utf8_lossy(t).into_owned())
                    }
                };
                row.insert(col.clone(), value);
            }
            table.rows.push(row);
        }

        tracing::debug!(table = name, rows = table.len(), "loaded table");
        Ok(table)
    }

    fn save_rows(
        &self,
        rows: &Table,
        table_name: &str,
        mode: WriteMode,
    ) -> Result<(), StorageError> {
        validate_table_name(table_name)?;
        if rows.is_empty() {
            return Err(StorageError::InvalidInput(format!(
                "no rows to save into '{table_name}'"
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let table_ident = quote_ident(table_name);

        if mode == WriteMode::Replace {
            tx.execute(&format!("DROP TABLE IF EXISTS {table_ident}"), [])?;
        }

        if table_exists(&tx, table_name)? {
            // Append: widen the table with any new columns.
            let existing = existing_columns(&tx, table_name)?;
            for col in rows.columns.iter().filter(|c| !existing.contains(c)) {
                tx.execute(
                    &format!(
                        "ALTER TABLE {table_ident} ADD COLUMN {} {}",
                        quote_ident(col),
                        sql_type(column_kind(rows, col))
                    ),
                    [],
                )?;
            }
        } else {
            let defs: Vec<String> = rows
                .columns
                .iter()
                .map(|c| format!("{} {}", quote_ident(c), sql_type(column_kind(rows, c))))
                .collect();
            tx.execute(
                &format!("CREATE TABLE {table_ident} ({})", defs.join(", ")),
                [],
            )?;
        }

        {
            let col_list: Vec<String> = rows.columns.iter().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<String> =
                (1..=rows.columns.len()).map(|i| format!("?{i}")).collect();
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table_ident} ({}) VALUES ({})",
                col_list.join(", "),
                placeholders.join(", ")
            ))?;

            for row in &rows.rows {
                let values: Vec<SqlValue> = rows
                    .columns
                    .iter()
                    .map(|c| to_sql_value(row.get(c).unwrap_or(&Value::Null)))
                    .collect();
                stmt.execute(rusqlite::params_from_iter(values.iter()))?;
            }
        }

        tx.commit()?;
        tracing::info!(table = table_name, rows = rows.len(), ?mode, "saved rows");
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<(), StorageError> {
        validate_table_name(name)?;
        let conn = self.conn()?;
        conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)), [])?;
        Ok(())
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StorageError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

fn existing_columns(conn: &Connection, name: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

fn column_kind(table: &Table, column: &str) -> ColumnKind {
    infer_kind(table.rows.iter().filter_map(|r| r.get(column)))
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Int | ColumnKind::Bool => "INTEGER",
        ColumnKind::Float => "REAL",
        ColumnKind::Text => "TEXT",
    }
}

fn to_sql_value(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Column names come from provider field names (e.g. `52WeekChange`), so
/// they are always quoted.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table names are restricted to `[A-Za-z_][A-Za-z0-9_]*`.
fn validate_table_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidInput(format!(
            "invalid table name '{name}'"
        )))
    }
}
