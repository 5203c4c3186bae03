//! DDL generation from a normalized schema

use crate::driver::Dialect;
use crate::error::{NatKeyError, Result};
use crate::schema::{Field, Schema, Table};
use serde_json::Value;
use std::collections::HashMap;

pub fn create_database(dialect: Dialect, name: &str) -> Result<String> {
    match dialect {
        Dialect::MySql => Ok(format!(
            "CREATE DATABASE IF NOT EXISTS {} DEFAULT CHARACTER SET utf8mb4",
            dialect.quote(name)
        )),
        Dialect::Sqlite => Err(NatKeyError::Unsupported(
            "SQLite has no CREATE DATABASE; the database is the file".into(),
        )),
    }
}

fn default_literal(value: &Value) -> String {
    match value {
        Value::Bool(b) => i64::from(*b).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Null => "NULL".to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Whether the key is rendered inline as SQLite's rowid alias
fn inline_sqlite_key(dialect: Dialect, table: &Table, field: &Field) -> bool {
    dialect == Dialect::Sqlite && field.auto_increment && table.primary_key.len() == 1
}

fn column_definition(dialect: Dialect, table: &Table, field: &Field) -> String {
    let name = dialect.quote(&field.name);
    if inline_sqlite_key(dialect, table, field) {
        return format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT");
    }

    let mut parts = vec![name, field.sql_type.clone()];
    parts.push(if field.nullable { "NULL" } else { "NOT NULL" }.to_string());
    if let Some(default) = &field.default {
        parts.push(format!("DEFAULT {}", default_literal(default)));
    }
    if field.auto_increment {
        parts.push("AUTO_INCREMENT".to_string());
    }
    parts.join(" ")
}

fn column_list(dialect: Dialect, names: &[&str]) -> String {
    names
        .iter()
        .map(|n| dialect.quote(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE` for one table. SQLite indexes come back as extra
/// statements after the table.
pub fn create_table(dialect: Dialect, table: &Table) -> Result<Vec<String>> {
    let mut lines: Vec<String> = table
        .fields
        .values()
        .map(|f| column_definition(dialect, table, f))
        .collect();

    let inline_key = table
        .fields
        .values()
        .any(|f| f.primary && inline_sqlite_key(dialect, table, f));
    if !inline_key {
        let key: Vec<&str> = table.primary_key.iter().map(String::as_str).collect();
        lines.push(format!("PRIMARY KEY ({})", column_list(dialect, &key)));
    }

    for (name, columns) in table.unique_keys() {
        lines.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            dialect.quote(&name),
            column_list(dialect, &columns)
        ));
    }

    let indexes = table.indexes();
    if dialect == Dialect::MySql {
        for (name, columns) in &indexes {
            lines.push(format!(
                "KEY {} ({})",
                dialect.quote(name),
                column_list(dialect, columns)
            ));
        }
    }

    for field in table.foreign_keys() {
        let Some(reference) = &field.references else {
            continue;
        };
        let mut constraint = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            dialect.quote(&format!("fk_{}_{}", table.name, field.name)),
            dialect.quote(&field.name),
            dialect.quote(&reference.table),
            dialect.quote(&reference.field),
        );
        if let Some(action) = reference.on_delete {
            constraint.push_str(&format!(" ON DELETE {}", action.as_sql()));
        }
        if let Some(action) = reference.on_update {
            constraint.push_str(&format!(" ON UPDATE {}", action.as_sql()));
        }
        lines.push(constraint);
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        dialect.quote(&table.name),
        lines.join(",\n  ")
    )];

    if dialect == Dialect::Sqlite {
        for (name, columns) in &indexes {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                dialect.quote(&format!("idx_{}_{}", table.name, name)),
                dialect.quote(&table.name),
                column_list(dialect, columns)
            ));
        }
    }

    Ok(statements)
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

fn visit<'a>(
    schema: &'a Schema,
    table: &'a Table,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<&'a Table>,
) -> Result<()> {
    match marks.get(table.name.as_str()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            return Err(NatKeyError::Schema(format!(
                "Foreign keys form a cycle through table '{}'",
                table.name
            )))
        }
        None => {}
    }

    marks.insert(&table.name, Mark::Visiting);
    for field in table.foreign_keys() {
        let Some(reference) = &field.references else {
            continue;
        };
        if reference.table != table.name {
            visit(schema, schema.table(&reference.table)?, marks, order)?;
        }
    }
    marks.insert(&table.name, Mark::Done);
    order.push(table);
    Ok(())
}

/// Tables ordered so that every parent precedes its children
pub fn table_order(schema: &Schema) -> Result<Vec<&Table>> {
    let mut marks = HashMap::new();
    let mut order = Vec::with_capacity(schema.tables.len());
    for table in schema.tables.values() {
        visit(schema, table, &mut marks, &mut order)?;
    }
    Ok(order)
}

/// Every `CREATE TABLE` (and SQLite `CREATE INDEX`) for the schema, parents first
pub fn create_schema(dialect: Dialect, schema: &Schema) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for table in table_order(schema)? {
        statements.extend(create_table(dialect, table)?);
    }
    Ok(statements)
}
