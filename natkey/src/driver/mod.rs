//! The database seam. The engine only ever talks to a [`Connection`]; the
//! bundled implementation is [`SqliteConnection`].

mod sqlite;

pub use sqlite::SqliteConnection;

use crate::error::{NatKeyError, Result};
use crate::schema::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// SQL flavour used when rendering clauses and DDL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    #[default]
    Sqlite,
}

impl Dialect {
    /// Quote an identifier. Names are validated at normalization time, so
    /// this only has to pick the quote character.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{ident}`"),
            Dialect::Sqlite => format!("\"{ident}\""),
        }
    }

    /// Whether an upsert reports the affected key through `RETURNING`
    /// rather than through the driver's last-insert-id.
    pub fn upsert_returns_key(&self) -> bool {
        matches!(self, Dialect::Sqlite)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for Dialect {
    type Err = NatKeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(NatKeyError::Other(format!("Unknown dialect '{other}'"))),
        }
    }
}

/// Outcome of a statement that returns no rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Execution {
    pub affected_rows: u64,
    pub last_insert_id: Option<i64>,
}

/// What the engine needs from a database driver. Statements use `?`
/// placeholders; parameters are JSON values.
pub trait Connection {
    fn dialect(&self) -> Dialect;

    /// Run a statement that produces rows
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement that produces no rows
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Execution>;

    /// Run parameterless statements such as DDL
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}
