//! Natural-key resolution. An object on a foreign-key field names the parent
//! row by its own columns; it is swapped for the parent's key before a write
//! or a lookup. The inverse swaps a key for the full parent row.

use crate::clause::{self, is_directive, Clause, Statement};
use crate::driver::Connection;
use crate::error::{NatKeyError, Result};
use crate::schema::{Field, Row, Schema, Table};
use log::debug;
use serde_json::Value;

fn lookup_error(field: &Field, parent: &str, count: usize) -> NatKeyError {
    NatKeyError::ForeignKeyLookup {
        table: parent.to_string(),
        field: field.qualified_name(),
        count,
    }
}

fn reference_of(field: &Field) -> Result<&crate::schema::ForeignKey> {
    field.references.as_ref().ok_or_else(|| {
        NatKeyError::Clause(format!(
            "Field '{}' is not a foreign key",
            field.qualified_name()
        ))
    })
}

/// Find the key of the single parent row matching `criteria`.
/// Zero or several matches fail with a count-carrying error.
pub fn resolve_foreign_id<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &Schema,
    field: &Field,
    criteria: &Row,
) -> Result<Value> {
    let reference = reference_of(field)?;
    let parent = schema.table(&reference.table)?;

    if criteria.is_empty() {
        return Err(NatKeyError::Clause(format!(
            "Empty natural-key lookup on '{}'",
            field.qualified_name()
        )));
    }
    for (key, value) in criteria {
        if is_directive(key) {
            return Err(NatKeyError::Clause(format!(
                "Directive '{key}' is not allowed in the natural-key lookup on '{}'",
                field.qualified_name()
            )));
        }
        if value.is_object() {
            return Err(NatKeyError::Clause(format!(
                "Nested lookup on '{}.{key}' is not supported",
                parent.name
            )));
        }
        if value.is_array() {
            return Err(NatKeyError::Clause(format!(
                "Natural-key lookup on '{}.{key}' needs a single value, got a list",
                parent.name
            )));
        }
    }

    let dialect = conn.dialect();
    let query = Statement {
        select: Some(Clause::new(format!(
            "SELECT {}",
            dialect.quote(&reference.field)
        ))),
        target: Some(clause::from_clause(dialect, parent)),
        where_: clause::where_clause(dialect, parent, criteria)?,
        limit: Some(Clause::new("LIMIT 2")),
        ..Default::default()
    }
    .build();

    debug!("Resolving {} via {}", field.qualified_name(), query.sql);
    let rows = conn.query(&query.sql, &query.params)?;
    if rows.len() != 1 {
        return Err(lookup_error(field, &parent.name, rows.len()));
    }

    rows.into_iter()
        .next()
        .and_then(|mut row| row.remove(&reference.field))
        .ok_or_else(|| lookup_error(field, &parent.name, 0))
}

/// Replace every natural-key lookup on a foreign-key field of `row` with the
/// resolved key. Arrays of lookups resolve element by element; scalar ids
/// are left alone.
pub fn resolve_foreign_ids<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &Schema,
    table: &Table,
    row: &mut Row,
) -> Result<()> {
    let names: Vec<String> = row
        .keys()
        .filter(|k| !is_directive(k))
        .cloned()
        .collect();

    for name in names {
        let Some(field) = table.fields.get(&name).filter(|f| f.is_foreign_key()) else {
            continue;
        };
        let Some(value) = row.get_mut(&name) else {
            continue;
        };

        match value {
            Value::Object(criteria) => {
                let id = resolve_foreign_id(conn, schema, field, criteria)?;
                *value = id;
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if let Value::Object(criteria) = item {
                        let id = resolve_foreign_id(conn, schema, field, criteria)?;
                        *item = id;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Fetch the parent row a foreign-key value points at
pub fn resolve_foreign_row<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &Schema,
    field: &Field,
    id: &Value,
) -> Result<Row> {
    let reference = reference_of(field)?;
    let parent = schema.table(&reference.table)?;
    let dialect = conn.dialect();

    let mut key = Row::new();
    key.insert(reference.field.clone(), id.clone());

    let query = Statement {
        select: Some(clause::select_clause(dialect, parent, &Row::new())?),
        target: Some(clause::from_clause(dialect, parent)),
        where_: clause::where_clause(dialect, parent, &key)?,
        limit: Some(Clause::new("LIMIT 2")),
        ..Default::default()
    }
    .build();

    debug!("Expanding {} = {id} via {}", field.qualified_name(), query.sql);
    let rows = conn.query(&query.sql, &query.params)?;
    if rows.len() != 1 {
        return Err(lookup_error(field, &parent.name, rows.len()));
    }
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| lookup_error(field, &parent.name, 0))?;
    Ok(parent.decode_row(row))
}

/// Expand the scalar foreign-key values of `row` into full parent rows.
/// `only` restricts the expansion to the named fields.
pub fn resolve_foreign_rows<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &Schema,
    table: &Table,
    row: &mut Row,
    only: Option<&[String]>,
) -> Result<()> {
    if let Some(names) = only {
        for name in names {
            reference_of(table.field(name)?)?;
        }
    }

    for field in table.foreign_keys() {
        if only.is_some_and(|names| !names.contains(&field.name)) {
            continue;
        }
        let Some(value) = row.get(&field.name) else {
            continue;
        };
        if value.is_null() || value.is_object() || value.is_array() {
            continue;
        }

        let parent = resolve_foreign_row(conn, schema, field, value)?;
        row.insert(field.name.clone(), Value::Object(parent));
    }
    Ok(())
}
