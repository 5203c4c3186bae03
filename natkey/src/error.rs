use thiserror::Error;

#[derive(Error, Debug)]
pub enum NatKeyError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Clause error: {0}")]
    Clause(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Row not found in '{table}': {criteria}")]
    NotFound { table: String, criteria: String },

    /// A natural-key lookup matched zero or several parent rows.
    #[error("Foreign key lookup for '{field}' in '{table}' matched {count} rows, expected exactly 1")]
    ForeignKeyLookup {
        table: String,
        field: String,
        count: usize,
    },

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, NatKeyError>;
