use crate::error::Result;
use super::normalize::normalize;
use super::types::{Schema, SchemaDefinition};
use std::path::Path;

/// Parse a schema.yaml file into a SchemaDefinition
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML (or JSON) string into a SchemaDefinition
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let schema: SchemaDefinition = serde_yaml::from_str(content)?;
    Ok(schema)
}

/// Parse and normalize a schema file in one step
pub fn load_schema(path: &Path) -> Result<Schema> {
    normalize(&parse_schema(path)?)
}

/// Parse and normalize a schema string in one step
pub fn load_schema_str(content: &str) -> Result<Schema> {
    normalize(&parse_schema_str(content)?)
}
