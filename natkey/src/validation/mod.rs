use crate::error::{NatKeyError, Result};
use crate::schema::{Field, Row, Table, ValueKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

/// Result of validating a row
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validate a row against its table.
/// With `insert`, every non-null column without a default must be present.
pub fn validate_row(table: &Table, row: &Row, insert: bool) -> ValidationResult {
    let mut result = ValidationResult::default();

    for (name, value) in row {
        match table.fields.get(name) {
            Some(field) => validate_field_value(field, value, &mut result),
            None => result
                .errors
                .push(format!("Unknown field '{name}' in table '{}'", table.name)),
        }
    }

    if insert {
        for field in table.fields.values() {
            let required = !field.nullable && !field.auto_increment && field.default.is_none();
            if required && !row.contains_key(&field.name) {
                result
                    .errors
                    .push(format!("Required field '{}' is missing", field.name));
            }
        }
    }

    result
}

/// Fill absent fields with their declared defaults
pub fn apply_defaults(table: &Table, row: &mut Row) {
    for field in table.fields.values() {
        if row.contains_key(&field.name) {
            continue;
        }
        if let Some(default) = &field.default {
            row.insert(field.name.clone(), default.clone());
        }
    }
}

fn validate_field_value(field: &Field, value: &Value, result: &mut ValidationResult) {
    let name = &field.name;

    if value.is_null() {
        // a null auto key asks for a generated one
        if !field.nullable && !field.auto_increment {
            result.errors.push(format!("Field '{name}' cannot be null"));
        }
        return;
    }

    if field.is_foreign_key() {
        match value {
            Value::Object(_) => return,
            Value::Array(_) => {
                result.errors.push(format!(
                    "Field '{name}' (foreign key) expected a key or a lookup object, got list"
                ));
                return;
            }
            _ => {}
        }
    }

    let expected = match field.kind {
        ValueKind::Integer if !(value.is_i64() || value.is_u64()) => Some("integer"),
        ValueKind::Float if !value.is_number() => Some("number"),
        ValueKind::Decimal if !(value.is_number() || is_numeric_string(value)) => Some("number"),
        ValueKind::Boolean if !(value.is_boolean() || is_flag(value)) => Some("boolean"),
        ValueKind::Text | ValueKind::Blob if !value.is_string() => Some("string"),
        ValueKind::Date | ValueKind::DateTime | ValueKind::Time if !value.is_string() => {
            Some("date string")
        }
        _ => None,
    };

    if let Some(expected) = expected {
        result.errors.push(format!(
            "Field '{name}' expected {expected}, got {}",
            type_name(value)
        ));
        return;
    }

    if let Some(s) = value.as_str() {
        let parses = match field.kind {
            ValueKind::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
            ValueKind::DateTime => is_datetime(s),
            ValueKind::Time => NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok(),
            _ => true,
        };
        if !parses {
            result.warnings.push(format!(
                "Field '{name}' value '{s}' is not a valid {}",
                kind_label(field.kind)
            ));
        }
    }
}

fn is_numeric_string(value: &Value) -> bool {
    value.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok())
}

fn is_flag(value: &Value) -> bool {
    matches!(value.as_i64(), Some(0 | 1))
}

fn is_datetime(s: &str) -> bool {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        || DateTime::parse_from_rfc3339(s).is_ok()
}

fn kind_label(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Date => "date (YYYY-MM-DD)",
        ValueKind::DateTime => "datetime (YYYY-MM-DD HH:MM:SS)",
        ValueKind::Time => "time (HH:MM:SS)",
        _ => "value",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Apply defaults (for inserts) and validate. Errors reject the row;
/// warnings are returned to the caller.
pub fn validate_and_prepare(table: &Table, row: &mut Row, insert: bool) -> Result<Vec<String>> {
    if insert {
        apply_defaults(table, row);
    }
    let result = validate_row(table, row, insert);

    if !result.is_ok() {
        return Err(NatKeyError::Validation(format!(
            "Row for '{}' failed validation:\n  - {}",
            table.name,
            result.errors.join("\n  - ")
        )));
    }

    Ok(result.warnings)
}
