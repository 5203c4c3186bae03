use crate::error::{NatKeyError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A row or a set of criteria. Field order is preserved.
pub type Row = serde_json::Map<String, serde_json::Value>;

// ── Source form (schema.yaml) ───────────────────────────────────────

/// Top-level schema definition as written in schema.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Custom type aliases, e.g. `email: varchar(320)`
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub types: IndexMap<String, String>,
    #[serde(default)]
    pub tables: IndexMap<String, TableDefinition>,
}

/// Definition of a single table. Keys starting with `$` are metadata,
/// everything else is a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    #[serde(rename = "$primary", default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<KeyList>,
    #[serde(rename = "$sort", default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(flatten)]
    pub fields: IndexMap<String, FieldNotation>,
}

/// One or more field names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyList {
    One(String),
    Many(Vec<String>),
}

impl KeyList {
    pub fn names(&self) -> Vec<String> {
        match self {
            KeyList::One(name) => vec![name.clone()],
            KeyList::Many(names) => names.clone(),
        }
    }
}

/// A field is either a one-line string notation or a detailed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldNotation {
    Shorthand(String),
    Detailed(FieldDefinition),
}

/// Object notation for a field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<KeyFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<KeyFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// `table` or `table.field`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferenceAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferenceAction>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// `index: true` or `index: key_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyFlag {
    Enabled(bool),
    Named(String),
}

impl KeyFlag {
    /// Key name, falling back to the field name. `false` disables the key.
    pub fn key_name(&self, field_name: &str) -> Option<String> {
        match self {
            KeyFlag::Enabled(true) => Some(field_name.to_string()),
            KeyFlag::Enabled(false) => None,
            KeyFlag::Named(name) => Some(name.clone()),
        }
    }
}

/// Sort specification: `"name, -created"` or `[name, -created]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortSpec {
    Text(String),
    List(Vec<String>),
}

impl SortSpec {
    /// Parse from a criteria value (`$sort`)
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(SortSpec::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        NatKeyError::Clause(format!("$sort entries must be strings, got {item}"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(SortSpec::List),
            other => Err(NatKeyError::Clause(format!(
                "$sort must be a string or a list, got {other}"
            ))),
        }
    }

    /// Split into sort keys. Field names are not checked here.
    pub fn keys(&self) -> Vec<SortKey> {
        let parts: Vec<&str> = match self {
            SortSpec::Text(text) => text.split(',').collect(),
            SortSpec::List(items) => items.iter().map(String::as_str).collect(),
        };

        parts
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                if let Some(name) = p.strip_prefix('-') {
                    SortKey {
                        field: name.trim().to_string(),
                        direction: SortDirection::Desc,
                    }
                } else {
                    SortKey {
                        field: p.trim_start_matches('+').trim().to_string(),
                        direction: SortDirection::Asc,
                    }
                }
            })
            .collect()
    }
}

/// Referential action for ON DELETE / ON UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceAction {
    Cascade,
    Restrict,
    #[serde(alias = "setnull", alias = "set null")]
    SetNull,
    #[serde(alias = "noaction", alias = "no action")]
    NoAction,
}

impl ReferenceAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferenceAction::Cascade => "CASCADE",
            ReferenceAction::Restrict => "RESTRICT",
            ReferenceAction::SetNull => "SET NULL",
            ReferenceAction::NoAction => "NO ACTION",
        }
    }
}

impl FromStr for ReferenceAction {
    type Err = NatKeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "cascade" => Ok(ReferenceAction::Cascade),
            "restrict" => Ok(ReferenceAction::Restrict),
            "setnull" | "set_null" => Ok(ReferenceAction::SetNull),
            "noaction" | "no_action" => Ok(ReferenceAction::NoAction),
            other => Err(NatKeyError::Schema(format!(
                "Unknown referential action '{other}'"
            ))),
        }
    }
}

// ── Normalized form ─────────────────────────────────────────────────

/// A normalized schema: every field resolved, every reference checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub database: Option<String>,
    pub tables: IndexMap<String, Table>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub fields: IndexMap<String, Field>,
    pub primary_key: Vec<String>,
    /// Default ORDER BY when criteria carry no `$sort`
    pub sort: Vec<SortKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    /// Name of the owning table
    pub table: String,
    pub sql_type: String,
    pub kind: ValueKind,
    pub nullable: bool,
    pub primary: bool,
    pub auto_increment: bool,
    pub index: Option<String>,
    pub unique: Option<String>,
    pub default: Option<serde_json::Value>,
    pub references: Option<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub table: String,
    pub field: String,
    pub on_delete: Option<ReferenceAction>,
    pub on_update: Option<ReferenceAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "{}", self.field),
            SortDirection::Desc => write!(f, "-{}", self.field),
        }
    }
}

/// Broad class of values a column holds, derived from its SQL type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Decimal,
    Text,
    Boolean,
    Date,
    DateTime,
    Time,
    Json,
    Blob,
}

impl ValueKind {
    /// Infer the value kind from a resolved (upper case) SQL type
    pub fn from_sql_type(sql_type: &str) -> ValueKind {
        let upper = sql_type.to_ascii_uppercase();
        let base = upper
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or("");

        match base {
            "TINYINT" if upper.starts_with("TINYINT(1)") => ValueKind::Boolean,
            "BOOL" | "BOOLEAN" => ValueKind::Boolean,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "SERIAL" => {
                ValueKind::Integer
            }
            "FLOAT" | "DOUBLE" | "REAL" => ValueKind::Float,
            "DECIMAL" | "NUMERIC" => ValueKind::Decimal,
            "DATE" => ValueKind::Date,
            "DATETIME" | "TIMESTAMP" => ValueKind::DateTime,
            "TIME" => ValueKind::Time,
            "JSON" => ValueKind::Json,
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                ValueKind::Blob
            }
            _ => ValueKind::Text,
        }
    }
}

impl Schema {
    /// Look up a table by name
    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| NatKeyError::Schema(format!("Table '{name}' not found in schema")))
    }

    /// The parent field a foreign key points at
    pub fn referenced_field(&self, reference: &ForeignKey) -> Result<&Field> {
        self.table(&reference.table)?
            .fields
            .get(&reference.field)
            .ok_or_else(|| {
                NatKeyError::Schema(format!(
                    "Field '{}.{}' not found in schema",
                    reference.table, reference.field
                ))
            })
    }
}

impl Table {
    /// Look up a field, reporting unknown names as a clause error
    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields.get(name).ok_or_else(|| {
            NatKeyError::Clause(format!("Unknown field '{name}' in table '{}'", self.name))
        })
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| f.references.is_some())
    }

    /// The auto-increment key, if the table has one
    pub fn auto_increment_key(&self) -> Option<&Field> {
        self.fields.values().find(|f| f.primary && f.auto_increment)
    }

    /// The primary key field when the key is a single column
    pub fn single_primary_key(&self) -> Option<&Field> {
        match self.primary_key.as_slice() {
            [name] => self.fields.get(name),
            _ => None,
        }
    }

    /// Unique keys by name, in declaration order of their first field
    pub fn unique_keys(&self) -> IndexMap<String, Vec<&str>> {
        let mut keys: IndexMap<String, Vec<&str>> = IndexMap::new();
        for field in self.fields.values() {
            if let Some(name) = &field.unique {
                keys.entry(name.clone()).or_default().push(&field.name);
            }
        }
        keys
    }

    /// Non-unique indexes by name
    pub fn indexes(&self) -> IndexMap<String, Vec<&str>> {
        let mut keys: IndexMap<String, Vec<&str>> = IndexMap::new();
        for field in self.fields.values() {
            if let Some(name) = &field.index {
                keys.entry(name.clone()).or_default().push(&field.name);
            }
        }
        keys
    }

    /// Convert driver values back into their schema kinds:
    /// booleans stored as integers and JSON stored as text.
    pub fn decode_row(&self, mut row: Row) -> Row {
        for (name, value) in row.iter_mut() {
            let Some(field) = self.fields.get(name) else {
                continue;
            };
            match (field.kind, &*value) {
                (ValueKind::Boolean, serde_json::Value::Number(n)) => {
                    *value = serde_json::Value::Bool(n.as_i64().unwrap_or(0) != 0);
                }
                (ValueKind::Json, serde_json::Value::String(s)) => {
                    if let Ok(parsed) = serde_json::from_str(s) {
                        *value = parsed;
                    }
                }
                _ => {}
            }
        }
        row
    }
}

impl Field {
    pub fn is_foreign_key(&self) -> bool {
        self.references.is_some()
    }

    /// `table.field`, for messages
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }
}
