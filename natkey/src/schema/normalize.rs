use super::types::{
    FieldDefinition, FieldNotation, ForeignKey, KeyFlag, KeyList, Schema, SchemaDefinition,
    SortSpec, Table, TableDefinition, ValueKind, Field,
};
use crate::error::{NatKeyError, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Name of the surrogate key injected into tables that declare none
pub const DEFAULT_KEY: &str = "id";
const DEFAULT_KEY_TYPE: &str = "INT UNSIGNED";

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("string", "VARCHAR(255)"),
    ("text", "TEXT"),
    ("int", "INT"),
    ("integer", "INT"),
    ("bigint", "BIGINT"),
    ("id", DEFAULT_KEY_TYPE),
    ("bool", "TINYINT(1)"),
    ("boolean", "TINYINT(1)"),
    ("float", "FLOAT"),
    ("double", "DOUBLE"),
    ("decimal", "DECIMAL(10,2)"),
    ("date", "DATE"),
    ("datetime", "DATETIME"),
    ("timestamp", "TIMESTAMP"),
    ("time", "TIME"),
    ("json", "JSON"),
    ("blob", "BLOB"),
];

const SQL_BASE_TYPES: &[&str] = &[
    "TINYINT", "SMALLINT", "MEDIUMINT", "INT", "INTEGER", "BIGINT", "FLOAT", "DOUBLE", "REAL",
    "DECIMAL", "NUMERIC", "CHAR", "VARCHAR", "BINARY", "VARBINARY", "TEXT", "TINYTEXT",
    "MEDIUMTEXT", "LONGTEXT", "BLOB", "TINYBLOB", "MEDIUMBLOB", "LONGBLOB", "DATE", "DATETIME",
    "TIMESTAMP", "TIME", "YEAR", "JSON", "BOOL", "BOOLEAN",
];

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"))
}

fn sql_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^([a-z]+)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?((?:\s+(?:unsigned|zerofill))*)\s*$",
        )
        .expect("sql type regex")
    })
}

/// Normalize a schema definition: parse field notations, resolve type
/// aliases, inject default primary keys and link foreign keys to their
/// parent fields.
pub fn normalize(def: &SchemaDefinition) -> Result<Schema> {
    for alias in def.types.keys() {
        check_identifier(alias, "type alias")?;
    }

    let mut tables = IndexMap::new();
    for (table_name, table_def) in &def.tables {
        check_identifier(table_name, "table")?;
        let table = build_table(table_name, table_def, def)?;
        tables.insert(table_name.clone(), table);
    }

    link_references(&mut tables)?;

    Ok(Schema {
        database: def.database.clone(),
        tables,
    })
}

impl Schema {
    pub fn from_definition(def: &SchemaDefinition) -> Result<Self> {
        normalize(def)
    }

    /// Emit the canonical source form. Normalizing it again yields an
    /// equal schema.
    pub fn to_definition(&self) -> SchemaDefinition {
        let tables = self
            .tables
            .iter()
            .map(|(name, table)| (name.clone(), table.to_definition()))
            .collect();

        SchemaDefinition {
            database: self.database.clone(),
            types: IndexMap::new(),
            tables,
        }
    }
}

impl Table {
    fn to_definition(&self) -> TableDefinition {
        let primary = match self.primary_key.as_slice() {
            [single] => KeyList::One(single.clone()),
            keys => KeyList::Many(keys.to_vec()),
        };
        let sort = if self.sort.is_empty() {
            None
        } else {
            Some(SortSpec::List(self.sort.iter().map(|k| k.to_string()).collect()))
        };
        let fields = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), FieldNotation::Detailed(field.to_definition())))
            .collect();

        TableDefinition {
            primary: Some(primary),
            sort,
            fields,
        }
    }
}

impl Field {
    fn to_definition(&self) -> FieldDefinition {
        FieldDefinition {
            field_type: match self.references {
                Some(_) => None,
                None => Some(self.sql_type.clone()),
            },
            nullable: self.nullable,
            primary: false,
            auto_increment: self.auto_increment,
            index: self.index.clone().map(KeyFlag::Named),
            unique: self.unique.clone().map(KeyFlag::Named),
            default: self.default.clone(),
            references: self
                .references
                .as_ref()
                .map(|fk| format!("{}.{}", fk.table, fk.field)),
            on_delete: self.references.as_ref().and_then(|fk| fk.on_delete),
            on_update: self.references.as_ref().and_then(|fk| fk.on_update),
        }
    }
}

fn check_identifier(name: &str, what: &str) -> Result<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(NatKeyError::Schema(format!("Invalid {what} name '{name}'")))
    }
}

/// Split a shorthand notation on whitespace, keeping parenthesised
/// groups such as `decimal(10, 2)` together.
fn tokenize(notation: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in notation.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parse the one-line notation `<type> <modifier>*` into object notation
pub fn parse_shorthand(notation: &str) -> Result<FieldDefinition> {
    let tokens = tokenize(notation);
    let (type_token, modifiers) = tokens
        .split_first()
        .ok_or_else(|| NatKeyError::Schema("Empty field notation".into()))?;

    let mut def = FieldDefinition {
        field_type: Some(type_token.clone()),
        ..FieldDefinition::default()
    };

    for token in modifiers {
        let (key, arg) = match token.split_once(':') {
            Some((key, arg)) => (key.to_ascii_lowercase(), Some(arg)),
            None => (token.to_ascii_lowercase(), None),
        };

        match (key.as_str(), arg) {
            ("null" | "nullable", None) => def.nullable = true,
            ("pk" | "primary", None) => def.primary = true,
            ("auto" | "auto_increment", None) => def.auto_increment = true,
            ("unsigned", None) => {
                def.field_type = Some(format!("{type_token} unsigned"));
            }
            ("index", None) => def.index = Some(KeyFlag::Enabled(true)),
            ("index", Some(name)) => def.index = Some(KeyFlag::Named(name.to_string())),
            ("unique", None) => def.unique = Some(KeyFlag::Enabled(true)),
            ("unique", Some(name)) => def.unique = Some(KeyFlag::Named(name.to_string())),
            ("default", Some(literal)) => {
                let value = serde_json::from_str(literal)
                    .unwrap_or_else(|_| serde_json::Value::String(literal.to_string()));
                def.default = Some(value);
            }
            ("ondelete" | "on_delete", Some(action)) => def.on_delete = Some(action.parse()?),
            ("onupdate" | "on_update", Some(action)) => def.on_update = Some(action.parse()?),
            _ => {
                return Err(NatKeyError::Schema(format!(
                    "Unknown modifier '{token}' in field notation '{notation}'"
                )))
            }
        }
    }

    Ok(def)
}

/// Resolve a type token (custom alias, built-in alias or raw SQL type)
/// to its canonical upper-case SQL type.
pub fn resolve_type(token: &str, aliases: &IndexMap<String, String>) -> Result<String> {
    let mut seen = Vec::new();
    resolve_type_inner(token, aliases, &mut seen)
}

fn resolve_type_inner(
    token: &str,
    aliases: &IndexMap<String, String>,
    seen: &mut Vec<String>,
) -> Result<String> {
    let token = token.trim();

    if let Some(target) = aliases.get(token) {
        if seen.iter().any(|s| s == token) {
            return Err(NatKeyError::Schema(format!(
                "Type alias cycle: {} -> {token}",
                seen.join(" -> ")
            )));
        }
        seen.push(token.to_string());
        return resolve_type_inner(target, aliases, seen);
    }

    let lower = token.to_ascii_lowercase();
    if let Some((_, sql)) = BUILTIN_ALIASES.iter().find(|(name, _)| *name == lower) {
        return Ok(sql.to_string());
    }

    canonical_sql_type(token)
}

fn canonical_sql_type(token: &str) -> Result<String> {
    let unknown = || NatKeyError::Schema(format!("Unknown type '{token}'"));
    let caps = sql_type_re().captures(token).ok_or_else(unknown)?;

    let base = caps[1].to_ascii_uppercase();
    if !SQL_BASE_TYPES.contains(&base.as_str()) {
        return Err(unknown());
    }

    let mut out = base;
    if let Some(precision) = caps.get(2) {
        out.push('(');
        out.push_str(precision.as_str());
        if let Some(scale) = caps.get(3) {
            out.push(',');
            out.push_str(scale.as_str());
        }
        out.push(')');
    }
    if let Some(attrs) = caps.get(4) {
        for word in attrs.as_str().split_whitespace() {
            out.push(' ');
            out.push_str(&word.to_ascii_uppercase());
        }
    }
    Ok(out)
}

fn build_table(name: &str, def: &TableDefinition, schema_def: &SchemaDefinition) -> Result<Table> {
    let mut fields = IndexMap::new();

    for (field_name, notation) in &def.fields {
        if field_name.starts_with('$') {
            return Err(NatKeyError::Schema(format!(
                "Unknown table option '{field_name}' in table '{name}'"
            )));
        }
        check_identifier(field_name, "field")?;

        let field_def = match notation {
            FieldNotation::Shorthand(text) => parse_shorthand(text).map_err(|e| {
                NatKeyError::Schema(format!("Field '{name}.{field_name}': {e}"))
            })?,
            FieldNotation::Detailed(def) => def.clone(),
        };
        let field = build_field(name, field_name, &field_def, schema_def)?;
        fields.insert(field_name.clone(), field);
    }

    let flagged: Vec<String> = fields
        .values()
        .filter(|f: &&Field| f.primary)
        .map(|f| f.name.clone())
        .collect();

    let mut primary_key = match &def.primary {
        Some(list) => {
            let names = list.names();
            if names.is_empty() {
                return Err(NatKeyError::Schema(format!(
                    "Table '{name}' has an empty $primary"
                )));
            }
            if let Some(stray) = flagged.iter().find(|f| !names.contains(f)) {
                return Err(NatKeyError::Schema(format!(
                    "Field '{name}.{stray}' is marked primary but not listed in $primary"
                )));
            }
            names
        }
        None => flagged,
    };

    if primary_key.is_empty() {
        primary_key.push(DEFAULT_KEY.to_string());
    }

    if primary_key == [DEFAULT_KEY] && !fields.contains_key(DEFAULT_KEY) {
        let mut with_key = IndexMap::with_capacity(fields.len() + 1);
        with_key.insert(DEFAULT_KEY.to_string(), default_key_field(name));
        with_key.extend(fields);
        fields = with_key;
    }

    for (i, key) in primary_key.iter().enumerate() {
        if primary_key[..i].contains(key) {
            return Err(NatKeyError::Schema(format!(
                "Duplicate primary key field '{name}.{key}'"
            )));
        }
        let field = fields.get_mut(key).ok_or_else(|| {
            NatKeyError::Schema(format!(
                "Primary key field '{key}' not found in table '{name}'"
            ))
        })?;
        if field.nullable {
            return Err(NatKeyError::Schema(format!(
                "Primary key field '{name}.{key}' cannot be nullable"
            )));
        }
        field.primary = true;
    }

    for field in fields.values() {
        if field.auto_increment && (!field.primary || primary_key.len() != 1) {
            return Err(NatKeyError::Schema(format!(
                "Field '{}' is auto_increment but not the single primary key",
                field.qualified_name()
            )));
        }
    }

    let sort = match &def.sort {
        Some(spec) => {
            let keys = spec.keys();
            if let Some(unknown) = keys.iter().find(|k| !fields.contains_key(&k.field)) {
                return Err(NatKeyError::Schema(format!(
                    "$sort of table '{name}' names unknown field '{}'",
                    unknown.field
                )));
            }
            keys
        }
        None => Vec::new(),
    };

    let mut table = Table {
        name: name.to_string(),
        fields,
        primary_key,
        sort,
    };
    merge_key_names(&mut table)?;
    Ok(table)
}

/// Indexes and unique keys share one namespace. An index named like a
/// unique key over the same columns is dropped; any other clash is an error.
fn merge_key_names(table: &mut Table) -> Result<()> {
    let mut redundant = Vec::new();
    {
        let unique = table.unique_keys();
        for (name, columns) in table.indexes() {
            match unique.get(&name) {
                None => {}
                Some(unique_columns) if *unique_columns == columns => redundant.push(name),
                Some(_) => {
                    return Err(NatKeyError::Schema(format!(
                        "Key name '{name}' in table '{}' is used by both an index and a unique key",
                        table.name
                    )))
                }
            }
        }
    }

    for field in table.fields.values_mut() {
        if field.index.as_ref().is_some_and(|n| redundant.contains(n)) {
            log::debug!(
                "Dropping index on '{}', covered by its unique key",
                field.qualified_name()
            );
            field.index = None;
        }
    }
    Ok(())
}

fn default_key_field(table: &str) -> Field {
    Field {
        name: DEFAULT_KEY.to_string(),
        table: table.to_string(),
        sql_type: DEFAULT_KEY_TYPE.to_string(),
        kind: ValueKind::Integer,
        nullable: false,
        primary: true,
        auto_increment: true,
        index: None,
        unique: None,
        default: None,
        references: None,
    }
}

/// True when the type token names a table (`user` or `user.id`)
fn names_table(token: &str, schema_def: &SchemaDefinition) -> bool {
    let table = token.split_once('.').map_or(token, |(t, _)| t);
    schema_def.tables.contains_key(table)
}

fn build_field(
    table: &str,
    name: &str,
    def: &FieldDefinition,
    schema_def: &SchemaDefinition,
) -> Result<Field> {
    let qualified = format!("{table}.{name}");

    let target = match (&def.references, &def.field_type) {
        (Some(_), Some(_)) => {
            return Err(NatKeyError::Schema(format!(
                "Field '{qualified}' sets both type and references; a foreign key takes its parent's type"
            )))
        }
        (Some(target), None) => Some(target.as_str()),
        (None, Some(ty)) if names_table(ty, schema_def) => Some(ty.as_str()),
        _ => None,
    };

    let references = match target {
        Some(target) => {
            let (parent, parent_field) = match target.split_once('.') {
                Some((t, f)) => (t, f),
                None => (target, ""),
            };
            if !schema_def.tables.contains_key(parent) {
                return Err(NatKeyError::Schema(format!(
                    "Field '{qualified}' references unknown table '{parent}'"
                )));
            }
            Some(ForeignKey {
                table: parent.to_string(),
                field: parent_field.to_string(),
                on_delete: def.on_delete,
                on_update: def.on_update,
            })
        }
        None => {
            if def.on_delete.is_some() || def.on_update.is_some() {
                return Err(NatKeyError::Schema(format!(
                    "Field '{qualified}' sets on_delete/on_update but is not a foreign key"
                )));
            }
            None
        }
    };

    // Foreign keys get their type once all tables are known
    let sql_type = match &references {
        Some(_) => String::new(),
        None => {
            let token = def.field_type.as_deref().ok_or_else(|| {
                NatKeyError::Schema(format!("Field '{qualified}' has no type"))
            })?;
            resolve_type(token, &schema_def.types)
                .map_err(|e| NatKeyError::Schema(format!("Field '{qualified}': {e}")))?
        }
    };
    let kind = ValueKind::from_sql_type(&sql_type);

    if def.auto_increment && references.is_none() && kind != ValueKind::Integer {
        return Err(NatKeyError::Schema(format!(
            "Field '{qualified}' is auto_increment but has non-integer type {sql_type}"
        )));
    }

    let index = key_name(def.index.as_ref(), name)?;
    let unique = key_name(def.unique.as_ref(), name)?;

    Ok(Field {
        name: name.to_string(),
        table: table.to_string(),
        sql_type,
        kind,
        nullable: def.nullable,
        primary: def.primary,
        auto_increment: def.auto_increment,
        index,
        unique,
        default: def.default.clone().filter(|v| !v.is_null()),
        references,
    })
}

fn key_name(flag: Option<&KeyFlag>, field_name: &str) -> Result<Option<String>> {
    match flag.and_then(|f| f.key_name(field_name)) {
        Some(name) => {
            check_identifier(&name, "key")?;
            Ok(Some(name))
        }
        None => Ok(None),
    }
}

/// Fill in default reference targets, check them and copy the parent
/// field type onto every foreign key.
fn link_references(tables: &mut IndexMap<String, Table>) -> Result<()> {
    let primary_keys: HashMap<String, Vec<String>> = tables
        .iter()
        .map(|(name, table)| (name.clone(), table.primary_key.clone()))
        .collect();

    for table in tables.values_mut() {
        for field in table.fields.values_mut() {
            let qualified = field.qualified_name();
            let Some(fk) = field.references.as_mut() else {
                continue;
            };
            if fk.field.is_empty() {
                match primary_keys.get(&fk.table).map(Vec::as_slice) {
                    Some([single]) => fk.field = single.clone(),
                    _ => {
                        return Err(NatKeyError::Schema(format!(
                            "Field '{qualified}' references '{}' which has a composite primary key; name the field explicitly",
                            fk.table
                        )))
                    }
                }
            }
        }
    }

    let mut resolved = Vec::new();
    for (table_name, table) in tables.iter() {
        for field in table.fields.values() {
            let Some(fk) = &field.references else {
                continue;
            };
            let mut seen = vec![field.qualified_name()];
            let (sql_type, kind) = reference_type(tables, &fk.table, &fk.field, &mut seen)?;

            let target = &tables[&fk.table].fields[&fk.field];
            if !target.primary && target.unique.is_none() {
                log::warn!(
                    "Foreign key '{}' references '{}', which is neither primary nor unique",
                    field.qualified_name(),
                    target.qualified_name()
                );
            }

            resolved.push((table_name.clone(), field.name.clone(), sql_type, kind));
        }
    }

    for (table_name, field_name, sql_type, kind) in resolved {
        if let Some(field) = tables
            .get_mut(&table_name)
            .and_then(|t| t.fields.get_mut(&field_name))
        {
            field.sql_type = sql_type;
            field.kind = kind;
        }
    }

    for table in tables.values() {
        for field in table.foreign_keys() {
            let Some(fk) = &field.references else {
                continue;
            };
            if field.auto_increment {
                return Err(NatKeyError::Schema(format!(
                    "Foreign key '{}' cannot be auto_increment",
                    field.qualified_name()
                )));
            }
            let sets_null = [fk.on_delete, fk.on_update]
                .contains(&Some(super::types::ReferenceAction::SetNull));
            if sets_null && !field.nullable {
                return Err(NatKeyError::Schema(format!(
                    "Foreign key '{}' uses SET NULL but is not nullable",
                    field.qualified_name()
                )));
            }
        }
    }

    Ok(())
}

/// Follow a chain of foreign keys to the first concrete type
fn reference_type(
    tables: &IndexMap<String, Table>,
    table: &str,
    field: &str,
    seen: &mut Vec<String>,
) -> Result<(String, ValueKind)> {
    let qualified = format!("{table}.{field}");
    if seen.contains(&qualified) {
        return Err(NatKeyError::Schema(format!(
            "Foreign key cycle: {} -> {qualified}",
            seen.join(" -> ")
        )));
    }

    let target = tables
        .get(table)
        .and_then(|t| t.fields.get(field))
        .ok_or_else(|| {
            NatKeyError::Schema(format!(
                "Foreign key '{}' references unknown field '{qualified}'",
                seen.first().map(String::as_str).unwrap_or("?")
            ))
        })?;
    seen.push(qualified);

    match &target.references {
        None => Ok((target.sql_type.clone(), target.kind)),
        Some(fk) => reference_type(tables, &fk.table, &fk.field, seen),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{load_schema_str, parse_schema_str, ReferenceAction, SortDirection};
    use pretty_assertions::assert_eq;

    fn blog_schema() -> SchemaDefinition {
        parse_schema_str(
            r#"
database: blog
types:
  email: varchar(320)
  contact: email
tables:
  user:
    $sort: name
    name: string unique
    email: contact null
  post:
    author: user ondelete:cascade
    title: string unique:author_title
    slug: string index
    price: decimal(8, 3) null default:0
    published: bool default:false
    meta: json null
  post_tag:
    $primary: [post, tag]
    post: post.id ondelete:cascade
    tag: varchar(32)
  profile:
    $primary: user
    user: { references: user, on_delete: cascade }
    bio: text null
  avatar:
    profile: profile
    url: string
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_default_primary_key_injected_first() {
        let schema = normalize(&blog_schema()).unwrap();
        let user = schema.table("user").unwrap();
        assert_eq!(user.primary_key, vec!["id"]);
        let (first, field) = user.fields.first().unwrap();
        assert_eq!(first, "id");
        assert_eq!(field.sql_type, "INT UNSIGNED");
        assert!(field.auto_increment);
        assert!(field.primary);
    }

    #[test]
    fn test_shorthand_modifiers() {
        let schema = normalize(&blog_schema()).unwrap();
        let post = schema.table("post").unwrap();

        let price = &post.fields["price"];
        assert_eq!(price.sql_type, "DECIMAL(8,3)");
        assert_eq!(price.kind, ValueKind::Decimal);
        assert!(price.nullable);
        assert_eq!(price.default, Some(serde_json::json!(0)));

        let published = &post.fields["published"];
        assert_eq!(published.sql_type, "TINYINT(1)");
        assert_eq!(published.kind, ValueKind::Boolean);
        assert_eq!(published.default, Some(serde_json::json!(false)));

        assert_eq!(post.fields["slug"].index.as_deref(), Some("slug"));
        assert_eq!(post.fields["title"].unique.as_deref(), Some("author_title"));
    }

    #[test]
    fn test_custom_alias_chain() {
        let schema = normalize(&blog_schema()).unwrap();
        let email = &schema.table("user").unwrap().fields["email"];
        assert_eq!(email.sql_type, "VARCHAR(320)");
        assert!(email.nullable);
    }

    #[test]
    fn test_alias_cycle_rejected() {
        let mut def = blog_schema();
        def.types.insert("a".into(), "b".into());
        def.types.insert("b".into(), "a".into());
        def.tables["user"]
            .fields
            .insert("loop".into(), FieldNotation::Shorthand("a".into()));
        let err = normalize(&def).unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn test_foreign_key_resolution() {
        let schema = normalize(&blog_schema()).unwrap();
        let author = &schema.table("post").unwrap().fields["author"];
        let fk = author.references.as_ref().unwrap();
        assert_eq!(fk.table, "user");
        assert_eq!(fk.field, "id");
        assert_eq!(fk.on_delete, Some(ReferenceAction::Cascade));
        assert_eq!(author.sql_type, "INT UNSIGNED");
        assert!(!author.auto_increment);
    }

    #[test]
    fn test_foreign_key_chain_takes_root_type() {
        let schema = normalize(&blog_schema()).unwrap();
        let profile = schema.table("profile").unwrap();
        assert_eq!(profile.primary_key, vec!["user"]);
        assert!(!profile.fields.contains_key("id"));

        let avatar_profile = &schema.table("avatar").unwrap().fields["profile"];
        assert_eq!(avatar_profile.references.as_ref().unwrap().field, "user");
        assert_eq!(avatar_profile.sql_type, "INT UNSIGNED");
        assert_eq!(avatar_profile.kind, ValueKind::Integer);
    }

    #[test]
    fn test_reference_to_composite_key_needs_field() {
        let mut def = blog_schema();
        def.tables["user"]
            .fields
            .insert("fav".into(), FieldNotation::Shorthand("post_tag".into()));
        let err = normalize(&def).unwrap_err();
        assert!(err.to_string().contains("composite"), "{err}");
    }

    #[test]
    fn test_reference_to_unknown_table_fails() {
        let mut def = blog_schema();
        def.tables["user"].fields.insert(
            "team".into(),
            FieldNotation::Detailed(FieldDefinition {
                references: Some("team".into()),
                ..FieldDefinition::default()
            }),
        );
        let err = normalize(&def).unwrap_err();
        assert!(err.to_string().contains("unknown table 'team'"), "{err}");
    }

    #[test]
    fn test_reference_to_unknown_field_fails() {
        let mut def = blog_schema();
        def.tables["user"]
            .fields
            .insert("boss".into(), FieldNotation::Shorthand("post.nope".into()));
        let err = normalize(&def).unwrap_err();
        assert!(err.to_string().contains("post.nope"), "{err}");
    }

    #[test]
    fn test_unknown_type_and_modifier() {
        let mut def = blog_schema();
        def.tables["user"]
            .fields
            .insert("age".into(), FieldNotation::Shorthand("integr".into()));
        assert!(normalize(&def).unwrap_err().to_string().contains("Unknown type"));

        assert!(parse_shorthand("int sparkly").is_err());
        // references belong to object notation; shorthand names the table as its type
        assert!(parse_shorthand("int ref:user").is_err());
        assert!(parse_shorthand("   ").is_err());
    }

    #[test]
    fn test_set_null_requires_nullable() {
        let mut def = blog_schema();
        def.tables["post"].fields.insert(
            "editor".into(),
            FieldNotation::Shorthand("user ondelete:setnull".into()),
        );
        assert!(normalize(&def).unwrap_err().to_string().contains("SET NULL"));

        def.tables["post"].fields.insert(
            "editor".into(),
            FieldNotation::Shorthand("user null ondelete:setnull".into()),
        );
        assert!(normalize(&def).is_ok());
    }

    #[test]
    fn test_sort_validation() {
        let schema = normalize(&blog_schema()).unwrap();
        let sort = &schema.table("user").unwrap().sort;
        assert_eq!(sort.len(), 1);
        assert_eq!(sort[0].direction, SortDirection::Asc);

        let mut def = blog_schema();
        def.tables["user"].sort = Some(SortSpec::Text("-ghost".into()));
        assert!(normalize(&def).is_err());
    }

    #[test]
    fn test_auto_increment_needs_single_key() {
        let def = parse_schema_str(
            "tables:\n  t:\n    $primary: [a, b]\n    a: int auto\n    b: int\n",
        )
        .unwrap();
        assert!(normalize(&def).is_err());
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize(&blog_schema()).unwrap();
        let canonical = once.to_definition();
        let twice = normalize(&canonical).unwrap();
        assert_eq!(once, twice);
        assert_eq!(canonical, twice.to_definition());

        // The canonical form survives a YAML round trip as well
        let yaml = serde_yaml::to_string(&canonical).unwrap();
        let reparsed = normalize(&parse_schema_str(&yaml).unwrap()).unwrap();
        assert_eq!(once, reparsed);
    }

    #[test]
    fn test_index_and_unique_key_names() {
        let schema = load_schema_str("tables:\n  page:\n    slug: string index unique\n").unwrap();
        let slug = &schema.table("page").unwrap().fields["slug"];
        assert_eq!(slug.unique.as_deref(), Some("slug"));
        assert_eq!(slug.index, None);

        let def = parse_schema_str(
            "tables:\n  page:\n    slug: string index:k\n    title: string unique:k\n",
        )
        .unwrap();
        let err = normalize(&def).unwrap_err();
        assert!(err.to_string().contains("Key name 'k'"), "{err}");
    }

    #[test]
    fn test_tokenize_keeps_parentheses() {
        assert_eq!(
            tokenize("decimal(10, 2)  null index:x"),
            vec!["decimal(10, 2)", "null", "index:x"]
        );
    }

    #[test]
    fn test_resolve_type_canonical() {
        let aliases = IndexMap::new();
        assert_eq!(resolve_type("varchar( 64 )", &aliases).unwrap(), "VARCHAR(64)");
        assert_eq!(resolve_type("int unsigned", &aliases).unwrap(), "INT UNSIGNED");
        assert_eq!(resolve_type("INT UNSIGNED", &aliases).unwrap(), "INT UNSIGNED");
        assert_eq!(resolve_type("boolean", &aliases).unwrap(), "TINYINT(1)");
        assert_eq!(resolve_type("TINYINT(1)", &aliases).unwrap(), "TINYINT(1)");
    }
}
