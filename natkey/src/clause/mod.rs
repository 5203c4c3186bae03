//! SQL clause builders. Each builder is a pure function of the dialect, a
//! table and a criteria object or row, and returns a parameterized fragment.
//! A [`Statement`] assembles the fragments in a fixed order.

use crate::driver::Dialect;
use crate::error::{NatKeyError, Result};
use crate::schema::{Field, Row, SortDirection, SortKey, SortSpec, Table, ValueKind};
use serde_json::Value;

pub const SORT: &str = "$sort";
pub const FIRST: &str = "$first";
pub const LAST: &str = "$last";
pub const COUNT: &str = "$count";
pub const FIELDS: &str = "$fields";
pub const EXPAND: &str = "$expand";

const DIRECTIVES: &[&str] = &[SORT, FIRST, LAST, COUNT, FIELDS, EXPAND];

/// A SQL fragment with `?` placeholders and its parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clause {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Clause {
    pub fn new(sql: impl Into<String>) -> Self {
        Clause {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Clause {
            sql: sql.into(),
            params,
        }
    }
}

/// One slot per clause kind. `build` joins the filled slots in SQL order.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    pub select: Option<Clause>,
    pub target: Option<Clause>,
    pub set: Option<Clause>,
    pub where_: Option<Clause>,
    pub order_by: Option<Clause>,
    pub limit: Option<Clause>,
    pub on_duplicate: Option<Clause>,
    pub returning: Option<Clause>,
}

impl Statement {
    pub fn build(self) -> Clause {
        let slots = [
            self.select,
            self.target,
            self.set,
            self.where_,
            self.order_by,
            self.limit,
            self.on_duplicate,
            self.returning,
        ];

        let mut sql = Vec::new();
        let mut params = Vec::new();
        for clause in slots.into_iter().flatten() {
            sql.push(clause.sql);
            params.extend(clause.params);
        }
        Clause::with_params(sql.join(" "), params)
    }
}

pub fn is_directive(key: &str) -> bool {
    key.starts_with('$')
}

/// Criteria entries that are not directives
pub fn field_criteria(criteria: &Row) -> impl Iterator<Item = (&String, &Value)> {
    criteria.iter().filter(|(k, _)| !is_directive(k))
}

/// Whether criteria carry any of `$first`, `$last`, `$count`
pub fn has_window(criteria: &Row) -> bool {
    [FIRST, LAST, COUNT].iter().any(|k| criteria.contains_key(*k))
}

fn check_directives(criteria: &Row) -> Result<()> {
    for key in criteria.keys().filter(|k| is_directive(k)) {
        if !DIRECTIVES.contains(&key.as_str()) {
            return Err(NatKeyError::Clause(format!("Unknown directive '{key}'")));
        }
    }
    Ok(())
}

fn quote_list<'a>(dialect: Dialect, names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(|n| dialect.quote(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a row value into a statement parameter for `field`.
/// Objects and arrays are only legal on JSON columns, stored as text.
fn write_param(field: &Field, value: &Value) -> Result<Value> {
    match value {
        Value::Object(_) | Value::Array(_) if field.kind == ValueKind::Json => {
            Ok(Value::String(value.to_string()))
        }
        Value::Object(_) if field.is_foreign_key() => Err(NatKeyError::Clause(format!(
            "Unresolved natural-key lookup on '{}'",
            field.qualified_name()
        ))),
        Value::Object(_) | Value::Array(_) => Err(NatKeyError::Clause(format!(
            "Field '{}' does not accept structured values",
            field.qualified_name()
        ))),
        scalar => Ok(scalar.clone()),
    }
}

/// Row fields checked against the table, in row order
fn row_fields<'t>(table: &'t Table, row: &Row) -> Result<Vec<&'t Field>> {
    row.keys()
        .map(|key| {
            if is_directive(key) {
                return Err(NatKeyError::Clause(format!(
                    "Directive '{key}' is not allowed in a row"
                )));
            }
            table.field(key)
        })
        .collect()
}

/// `SELECT a, b`, from `$fields` or every field of the table
pub fn select_clause(dialect: Dialect, table: &Table, criteria: &Row) -> Result<Clause> {
    let names: Vec<&str> = match criteria.get(FIELDS) {
        None => table.fields.keys().map(String::as_str).collect(),
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| {
                let name = item.as_str().ok_or_else(|| {
                    NatKeyError::Clause(format!("$fields entries must be strings, got {item}"))
                })?;
                table.field(name).map(|f| f.name.as_str())
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(NatKeyError::Clause(format!(
                "$fields must be a non-empty list of field names, got {other}"
            )))
        }
    };
    Ok(Clause::new(format!("SELECT {}", quote_list(dialect, names))))
}

pub fn from_clause(dialect: Dialect, table: &Table) -> Clause {
    Clause::new(format!("FROM {}", dialect.quote(&table.name)))
}

/// `INSERT INTO t (a, b) VALUES (?, ?)`
pub fn insert_clause(dialect: Dialect, table: &Table, row: &Row) -> Result<Clause> {
    let fields = row_fields(table, row)?;
    let name = dialect.quote(&table.name);

    if fields.is_empty() {
        let sql = match dialect {
            Dialect::MySql => format!("INSERT INTO {name} () VALUES ()"),
            Dialect::Sqlite => format!("INSERT INTO {name} DEFAULT VALUES"),
        };
        return Ok(Clause::new(sql));
    }

    let params = fields
        .iter()
        .map(|f| write_param(f, &row[&f.name]))
        .collect::<Result<Vec<_>>>()?;
    let placeholders = vec!["?"; fields.len()].join(", ");

    Ok(Clause::with_params(
        format!(
            "INSERT INTO {name} ({}) VALUES ({placeholders})",
            quote_list(dialect, fields.iter().map(|f| f.name.as_str()))
        ),
        params,
    ))
}

pub fn update_clause(dialect: Dialect, table: &Table) -> Clause {
    Clause::new(format!("UPDATE {}", dialect.quote(&table.name)))
}

pub fn delete_clause(dialect: Dialect, table: &Table) -> Clause {
    Clause::new(format!("DELETE FROM {}", dialect.quote(&table.name)))
}

/// `SET a = ?, b = ?` over the row's non-key fields. `None` when the row
/// carries nothing but key fields.
pub fn set_clause(dialect: Dialect, table: &Table, row: &Row) -> Result<Option<Clause>> {
    let mut parts = Vec::new();
    let mut params = Vec::new();
    for field in row_fields(table, row)?.into_iter().filter(|f| !f.primary) {
        parts.push(format!("{} = ?", dialect.quote(&field.name)));
        params.push(write_param(field, &row[&field.name])?);
    }

    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(Clause::with_params(
        format!("SET {}", parts.join(", ")),
        params,
    )))
}

/// Equality conjunction over the criteria's own fields. Foreign-key lookup
/// objects must already be resolved.
pub fn where_clause(dialect: Dialect, table: &Table, criteria: &Row) -> Result<Option<Clause>> {
    check_directives(criteria)?;

    let mut parts = Vec::new();
    let mut params = Vec::new();
    for (name, value) in field_criteria(criteria) {
        let field = table.field(name)?;
        let column = dialect.quote(&field.name);
        match value {
            Value::Null => parts.push(format!("{column} IS NULL")),
            Value::Array(items) if items.is_empty() => parts.push("0 = 1".to_string()),
            Value::Array(items) => {
                for item in items {
                    if item.is_object() || item.is_array() {
                        return Err(NatKeyError::Clause(format!(
                            "Unresolved value in IN list for '{}': {item}",
                            field.qualified_name()
                        )));
                    }
                    params.push(item.clone());
                }
                parts.push(format!(
                    "{column} IN ({})",
                    vec!["?"; items.len()].join(", ")
                ));
            }
            other => {
                params.push(write_param(field, other)?);
                parts.push(format!("{column} = ?"));
            }
        }
    }

    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(Clause::with_params(
        format!("WHERE {}", parts.join(" AND ")),
        params,
    )))
}

/// The sort keys in effect: `$sort` when given, else the table default
pub fn sort_keys(table: &Table, criteria: &Row) -> Result<Vec<SortKey>> {
    let keys = match criteria.get(SORT) {
        Some(value) => SortSpec::from_value(value)?.keys(),
        None => table.sort.clone(),
    };
    for key in &keys {
        table.field(&key.field)?;
    }
    Ok(keys)
}

pub fn order_by_clause(dialect: Dialect, table: &Table, criteria: &Row) -> Result<Option<Clause>> {
    let keys = sort_keys(table, criteria)?;
    if keys.is_empty() {
        return Ok(None);
    }

    let terms: Vec<String> = keys
        .iter()
        .map(|key| match key.direction {
            SortDirection::Asc => dialect.quote(&key.field),
            SortDirection::Desc => format!("{} DESC", dialect.quote(&key.field)),
        })
        .collect();
    Ok(Some(Clause::new(format!("ORDER BY {}", terms.join(", ")))))
}

// Both dialects read LIMIT operands as signed 64-bit integers
const MAX_WINDOW: u64 = i64::MAX as u64;

fn window_value(criteria: &Row, key: &str) -> Result<Option<u64>> {
    match criteria.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|n| *n <= MAX_WINDOW)
            .map(Some)
            .ok_or_else(|| {
                NatKeyError::Clause(format!(
                    "'{key}' must be an integer between 0 and {MAX_WINDOW}, got {value}"
                ))
            }),
    }
}

/// `LIMIT offset, count` from exactly two of `$first`, `$last`, `$count`
pub fn limit_clause(criteria: &Row) -> Result<Option<Clause>> {
    let first = window_value(criteria, FIRST)?;
    let last = window_value(criteria, LAST)?;
    let count = window_value(criteria, COUNT)?;

    let (offset, count) = match (first, last, count) {
        (None, None, None) => return Ok(None),
        (Some(first), None, Some(count)) => (first, count),
        (Some(first), Some(last), None) => {
            if last < first {
                return Err(NatKeyError::Clause(format!(
                    "$last ({last}) is before $first ({first})"
                )));
            }
            (first, last - first + 1)
        }
        (None, Some(last), Some(count)) => {
            let Some(offset) = (last + 1).checked_sub(count) else {
                return Err(NatKeyError::Clause(format!(
                    "$count ({count}) reaches before the first row from $last ({last})"
                )));
            };
            (offset, count)
        }
        (Some(_), Some(_), Some(_)) => {
            return Err(NatKeyError::Clause(
                "$first, $last and $count are over-specified; give exactly two".into(),
            ))
        }
        _ => {
            return Err(NatKeyError::Clause(
                "A window needs exactly two of $first, $last and $count".into(),
            ))
        }
    };

    if count > MAX_WINDOW {
        return Err(NatKeyError::Clause(format!(
            "Window of {count} rows exceeds {MAX_WINDOW}"
        )));
    }
    Ok(Some(Clause::new(format!("LIMIT {offset}, {count}"))))
}

/// Upsert tail. MySQL reports the affected auto key through
/// `LAST_INSERT_ID(expr)`; SQLite pairs this with [`returning_clause`].
pub fn on_duplicate_clause(dialect: Dialect, table: &Table, row: &Row) -> Result<Option<Clause>> {
    let fields = row_fields(table, row)?;
    if fields.is_empty() {
        return Ok(None);
    }

    let mut updated: Vec<&str> = fields
        .iter()
        .filter(|f| !f.primary)
        .map(|f| f.name.as_str())
        .collect();
    if updated.is_empty() {
        updated = table.primary_key.iter().map(String::as_str).collect();
    }

    let sql = match dialect {
        Dialect::MySql => {
            let mut parts = Vec::new();
            if let Some(key) = table.auto_increment_key() {
                let key = dialect.quote(&key.name);
                parts.push(format!("{key} = LAST_INSERT_ID({key})"));
            }
            for name in updated {
                let column = dialect.quote(name);
                parts.push(format!("{column} = VALUES({column})"));
            }
            format!("ON DUPLICATE KEY UPDATE {}", parts.join(", "))
        }
        Dialect::Sqlite => {
            let parts: Vec<String> = updated
                .into_iter()
                .map(|name| {
                    let column = dialect.quote(name);
                    format!("{column} = excluded.{column}")
                })
                .collect();
            format!("ON CONFLICT DO UPDATE SET {}", parts.join(", "))
        }
    };
    Ok(Some(Clause::new(sql)))
}

/// `RETURNING k` for dialects that report upsert keys through it
pub fn returning_clause(dialect: Dialect, table: &Table) -> Option<Clause> {
    if !dialect.upsert_returns_key() {
        return None;
    }
    Some(Clause::new(format!(
        "RETURNING {}",
        quote_list(dialect, table.primary_key.iter().map(String::as_str))
    )))
}
