use super::{Connection, Dialect, Execution};
use crate::error::{NatKeyError, Result};
use crate::schema::Row;
use rusqlite::types::Value as SqlValue;
use rusqlite::{ffi, params_from_iter};
use serde_json::Value;
use std::path::Path;

/// rusqlite-backed connection
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Open or create a database file. `:memory:` opens an in-memory database.
    pub fn open(path: &Path, foreign_keys: bool) -> Result<Self> {
        let conn = if path == Path::new(":memory:") {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(path)?
        };
        let db = SqliteConnection { conn };
        db.configure(foreign_keys)?;
        Ok(db)
    }

    /// Open an in-memory database with foreign keys enforced (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let db = SqliteConnection { conn };
        db.configure(true)?;
        Ok(db)
    }

    fn configure(&self, foreign_keys: bool) -> Result<()> {
        let pragma = if foreign_keys {
            "PRAGMA foreign_keys = ON;"
        } else {
            "PRAGMA foreign_keys = OFF;"
        };
        self.conn.execute_batch(pragma)?;
        Ok(())
    }

    /// Borrow the underlying rusqlite connection
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql).map_err(map_error)?;

        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let rows = stmt
            .query_map(params_from_iter(params.iter().map(to_sql_value)), |row| {
                let mut obj = Row::new();
                for (i, name) in column_names.iter().enumerate() {
                    let val: SqlValue = row.get(i)?;
                    obj.insert(name.clone(), from_sql_value(val));
                }
                Ok(obj)
            })
            .map_err(map_error)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(map_error)?);
        }
        Ok(results)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Execution> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_sql_value)))
            .map_err(map_error)?;

        let last_insert_id = Some(self.conn.last_insert_rowid()).filter(|id| *id != 0);
        Ok(Execution {
            affected_rows: affected as u64,
            last_insert_id,
        })
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(map_error)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// Unique and primary-key violations become `DuplicateKey`
fn map_error(err: rusqlite::Error) -> NatKeyError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return NatKeyError::DuplicateKey(
                message.clone().unwrap_or_else(|| failure.to_string()),
            );
        }
    }
    NatKeyError::Sqlite(err)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::Number(n.into()),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into()),
    }
}
