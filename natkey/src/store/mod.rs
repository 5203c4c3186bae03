use crate::clause::{self, Statement, COUNT, EXPAND, FIELDS, FIRST, LAST, SORT};
use crate::ddl;
use crate::driver::{Connection, Dialect, SqliteConnection};
use crate::error::{NatKeyError, Result};
use crate::resolve::{resolve_foreign_ids, resolve_foreign_rows};
use crate::schema::{Row, Schema, Table};
use crate::validation;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// How `save` treats a row that may or may not exist yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Insert only; an existing key is a `DuplicateKey` error
    New,
    /// Update only; the row must carry its primary key and exist
    Existing,
    /// Insert, or update the row a unique key collides with
    #[default]
    Always,
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveMode::New => write!(f, "new"),
            SaveMode::Existing => write!(f, "existing"),
            SaveMode::Always => write!(f, "always"),
        }
    }
}

impl FromStr for SaveMode {
    type Err = NatKeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "new" | "insert" => Ok(SaveMode::New),
            "existing" | "update" => Ok(SaveMode::Existing),
            "always" | "upsert" => Ok(SaveMode::Always),
            other => Err(NatKeyError::Other(format!("Unknown save mode '{other}'"))),
        }
    }
}

/// The main entry point: a normalized schema bound to a connection.
/// Provides natural-key aware CRUD over the schema's tables.
pub struct Store<C: Connection = SqliteConnection> {
    schema: Schema,
    conn: C,
    save_mode: SaveMode,
}

impl Store<SqliteConnection> {
    /// A store over a fresh in-memory SQLite database with the tables created
    pub fn open_in_memory(schema: Schema) -> Result<Self> {
        let mut store = Store::new(schema, SqliteConnection::open_in_memory()?);
        store.create_tables()?;
        Ok(store)
    }
}

impl<C: Connection> Store<C> {
    pub fn new(schema: Schema, conn: C) -> Self {
        Store {
            schema,
            conn,
            save_mode: SaveMode::default(),
        }
    }

    /// Set the mode used by [`Store::save`]
    pub fn with_save_mode(mut self, mode: SaveMode) -> Self {
        self.save_mode = mode;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn save_mode(&self) -> SaveMode {
        self.save_mode
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    /// Get the underlying connection
    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// The first row matching `criteria`. Without a window directive only
    /// one row is fetched.
    pub fn load(&mut self, table: &str, criteria: &Row) -> Result<Option<Row>> {
        let mut criteria = criteria.clone();
        if !clause::has_window(&criteria) {
            criteria.insert(FIRST.into(), Value::from(0));
            criteria.insert(COUNT.into(), Value::from(1));
        }
        Ok(self.load_many(table, &criteria)?.into_iter().next())
    }

    /// Every row matching `criteria`, ordered by `$sort` or the table default
    pub fn load_many(&mut self, table: &str, criteria: &Row) -> Result<Vec<Row>> {
        let table = self.schema.table(table)?;
        let dialect = self.conn.dialect();
        let expand = expand_fields(table, criteria)?;

        let mut criteria = criteria.clone();
        resolve_foreign_ids(&mut self.conn, &self.schema, table, &mut criteria)?;

        let query = Statement {
            select: Some(clause::select_clause(dialect, table, &criteria)?),
            target: Some(clause::from_clause(dialect, table)),
            where_: clause::where_clause(dialect, table, &criteria)?,
            order_by: clause::order_by_clause(dialect, table, &criteria)?,
            limit: clause::limit_clause(&criteria)?,
            ..Default::default()
        }
        .build();

        debug!("{}", query.sql);
        let rows = self.conn.query(&query.sql, &query.params)?;

        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            let mut row = table.decode_row(row);
            if let Some(only) = &expand {
                resolve_foreign_rows(
                    &mut self.conn,
                    &self.schema,
                    table,
                    &mut row,
                    only.as_deref(),
                )?;
            }
            loaded.push(row);
        }
        Ok(loaded)
    }

    /// [`Store::load`], deserialized into `T`
    pub fn load_as<T: DeserializeOwned>(
        &mut self,
        table: &str,
        criteria: &Row,
    ) -> Result<Option<T>> {
        match self.load(table, criteria)? {
            Some(row) => Ok(Some(serde_json::from_value(Value::Object(row))?)),
            None => Ok(None),
        }
    }

    /// [`Store::load_many`], deserialized into `T`
    pub fn load_many_as<T: DeserializeOwned>(
        &mut self,
        table: &str,
        criteria: &Row,
    ) -> Result<Vec<T>> {
        self.load_many(table, criteria)?
            .into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(NatKeyError::from))
            .collect()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Save a row with the store's default mode
    pub fn save(&mut self, table: &str, row: &mut Row) -> Result<()> {
        let mode = self.save_mode;
        self.save_with(table, row, mode)
    }

    /// Save a row. Natural-key lookups are resolved in a copy, so the
    /// caller's row keeps them; a generated key is written back.
    pub fn save_with(&mut self, table: &str, row: &mut Row, mode: SaveMode) -> Result<()> {
        let table = self.schema.table(table)?;
        let dialect = self.conn.dialect();

        let mut prepared = row.clone();
        if let Some(key) = table.auto_increment_key() {
            if prepared.get(&key.name).is_some_and(Value::is_null) {
                prepared.remove(&key.name);
            }
        }

        let new_row = mode == SaveMode::New;
        let warnings = validation::validate_and_prepare(table, &mut prepared, new_row)?;
        for warning in &warnings {
            warn!("{}: {warning}", table.name);
        }

        resolve_foreign_ids(&mut self.conn, &self.schema, table, &mut prepared)?;

        match mode {
            SaveMode::New => {
                let insert = Statement {
                    target: Some(clause::insert_clause(dialect, table, &prepared)?),
                    ..Default::default()
                }
                .build();
                debug!("{}", insert.sql);
                let exec = self.conn.execute(&insert.sql, &insert.params)?;
                backfill_key(table, row, exec.last_insert_id.map(Value::from));
            }
            SaveMode::Existing => update_existing(&mut self.conn, dialect, table, &prepared)?,
            SaveMode::Always => {
                // an empty row has nothing to collide on
                let returning = dialect.upsert_returns_key() && !prepared.is_empty();
                let upsert = Statement {
                    target: Some(clause::insert_clause(dialect, table, &prepared)?),
                    on_duplicate: clause::on_duplicate_clause(dialect, table, &prepared)?,
                    returning: clause::returning_clause(dialect, table).filter(|_| returning),
                    ..Default::default()
                }
                .build();
                debug!("{}", upsert.sql);

                let key = if returning {
                    let rows = self.conn.query(&upsert.sql, &upsert.params)?;
                    table.auto_increment_key().and_then(|key| {
                        rows.into_iter().next().and_then(|mut r| r.remove(&key.name))
                    })
                } else {
                    let exec = self.conn.execute(&upsert.sql, &upsert.params)?;
                    exec.last_insert_id.map(Value::from)
                };
                backfill_key(table, row, key);
            }
        }
        Ok(())
    }

    /// Save rows of one table in a single transaction
    pub fn save_many(&mut self, table: &str, rows: &mut [Row], mode: SaveMode) -> Result<()> {
        let snapshot = rows.to_vec();
        let result = self.transaction(|store| {
            for row in rows.iter_mut() {
                store.save_with(table, row, mode)?;
            }
            Ok(())
        });

        if result.is_err() {
            rows.clone_from_slice(&snapshot);
        }
        result
    }

    /// Save rows of several tables, in map order, in a single transaction.
    /// Any failure rolls back every table and leaves the rows as they were.
    pub fn save_multiple_tables(
        &mut self,
        batches: &mut IndexMap<String, Vec<Row>>,
        mode: SaveMode,
    ) -> Result<()> {
        for name in batches.keys() {
            self.schema.table(name)?;
        }

        let snapshot = batches.clone();
        let result = self.transaction(|store| {
            for (table, rows) in batches.iter_mut() {
                debug!("Saving {} row(s) into {table}", rows.len());
                for row in rows.iter_mut() {
                    store.save_with(table, row, mode)?;
                }
            }
            Ok(())
        });

        if result.is_err() {
            *batches = snapshot;
        }
        result
    }

    /// Delete the rows matching `criteria`; returns how many went.
    pub fn delete(&mut self, table: &str, criteria: &Row) -> Result<u64> {
        let table = self.schema.table(table)?;
        let dialect = self.conn.dialect();

        if let Some(key) = [SORT, FIRST, LAST, COUNT, FIELDS, EXPAND]
            .into_iter()
            .find(|k| criteria.contains_key(*k))
        {
            return Err(NatKeyError::Clause(format!("'{key}' is not allowed in a delete")));
        }
        if clause::field_criteria(criteria).next().is_none() {
            return Err(NatKeyError::Clause(format!(
                "Refusing to delete every row of '{}' without criteria",
                table.name
            )));
        }

        let mut criteria = criteria.clone();
        resolve_foreign_ids(&mut self.conn, &self.schema, table, &mut criteria)?;

        let delete = Statement {
            target: Some(clause::delete_clause(dialect, table)),
            where_: clause::where_clause(dialect, table, &criteria)?,
            ..Default::default()
        }
        .build();

        debug!("{}", delete.sql);
        Ok(self.conn.execute(&delete.sql, &delete.params)?.affected_rows)
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.conn.begin()?;
        match f(self) {
            Ok(value) => match self.conn.commit() {
                Ok(()) => Ok(value),
                Err(e) => Err(self.rollback_after(e)),
            },
            Err(e) => Err(self.rollback_after(e)),
        }
    }

    fn rollback_after(&mut self, error: NatKeyError) -> NatKeyError {
        warn!("Rolling back transaction: {error}");
        if let Err(rollback) = self.conn.rollback() {
            warn!("Rollback failed: {rollback}");
        }
        error
    }

    // ── DDL ──────────────────────────────────────────────────────────

    /// The `CREATE TABLE` statements for the schema in this store's dialect
    pub fn ddl(&self) -> Result<Vec<String>> {
        ddl::create_schema(self.conn.dialect(), &self.schema)
    }

    pub fn create_database(&mut self) -> Result<()> {
        let name = self.schema.database.as_deref().ok_or_else(|| {
            NatKeyError::Schema("Schema does not name a database".into())
        })?;
        let sql = ddl::create_database(self.conn.dialect(), name)?;
        info!("Creating database {name}");
        self.conn.execute_batch(&sql)
    }

    pub fn create_tables(&mut self) -> Result<()> {
        for sql in self.ddl()? {
            info!("{sql}");
            self.conn.execute_batch(&sql)?;
        }
        Ok(())
    }
}

/// `$expand`: `None` when absent or false, `Some(None)` for every foreign
/// key, `Some(Some(names))` for the named ones.
fn expand_fields(table: &Table, criteria: &Row) -> Result<Option<Option<Vec<String>>>> {
    match criteria.get(EXPAND) {
        None | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => Ok(Some(None)),
        Some(Value::Array(items)) => {
            let names = items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        NatKeyError::Clause(format!("$expand entries must be strings, got {item}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            for name in &names {
                if !table.field(name)?.is_foreign_key() {
                    return Err(NatKeyError::Clause(format!(
                        "$expand names '{name}', which is not a foreign key of '{}'",
                        table.name
                    )));
                }
            }
            Ok(Some(Some(names)))
        }
        Some(other) => Err(NatKeyError::Clause(format!(
            "$expand must be true or a list of field names, got {other}"
        ))),
    }
}

/// Write a generated auto-increment key into the caller's row
fn backfill_key(table: &Table, row: &mut Row, generated: Option<Value>) {
    let (Some(key), Some(id)) = (table.auto_increment_key(), generated) else {
        return;
    };
    if row.get(&key.name).map_or(true, Value::is_null) {
        row.insert(key.name.clone(), id);
    }
}

fn update_existing<C: Connection + ?Sized>(
    conn: &mut C,
    dialect: Dialect,
    table: &Table,
    row: &Row,
) -> Result<()> {
    let mut key = Row::new();
    for name in &table.primary_key {
        match row.get(name) {
            Some(value) if !value.is_null() => {
                key.insert(name.clone(), value.clone());
            }
            _ => {
                return Err(NatKeyError::Validation(format!(
                    "Saving an existing row of '{}' needs its primary key ({})",
                    table.name,
                    table.primary_key.join(", ")
                )))
            }
        }
    }
    let not_found = || NatKeyError::NotFound {
        table: table.name.clone(),
        criteria: Value::Object(key.clone()).to_string(),
    };

    let Some(set) = clause::set_clause(dialect, table, row)? else {
        // nothing to change; only confirm the row is there
        let probe = Statement {
            select: Some(clause::select_clause(dialect, table, &Row::new())?),
            target: Some(clause::from_clause(dialect, table)),
            where_: clause::where_clause(dialect, table, &key)?,
            limit: Some(clause::Clause::new("LIMIT 1")),
            ..Default::default()
        }
        .build();
        debug!("{}", probe.sql);
        if conn.query(&probe.sql, &probe.params)?.is_empty() {
            return Err(not_found());
        }
        return Ok(());
    };

    let update = Statement {
        target: Some(clause::update_clause(dialect, table)),
        set: Some(set),
        where_: clause::where_clause(dialect, table, &key)?,
        ..Default::default()
    }
    .build();

    debug!("{}", update.sql);
    if conn.execute(&update.sql, &update.params)?.affected_rows == 0 {
        return Err(not_found());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::RecordingConnection;
    use crate::driver::Execution;
    use crate::schema::load_schema_str;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const BLOG: &str = r#"
database: blog
tables:
  user:
    $sort: name
    name: string unique
    email: varchar(320) null
    admin: bool default:false
  post:
    $sort: -id
    author: user ondelete:cascade
    title: string unique
    body: text null
    meta: json null
"#;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn setup_test_store() -> Store {
        Store::open_in_memory(load_schema_str(BLOG).unwrap()).unwrap()
    }

    fn seed_users(store: &mut Store) {
        for name in ["ann", "bob", "cy"] {
            store
                .save_with("user", &mut row(json!({"name": name})), SaveMode::New)
                .unwrap();
        }
    }

    #[test]
    fn test_save_backfills_generated_id() {
        let mut store = setup_test_store();
        let mut user = row(json!({"name": "ann"}));
        store.save_with("user", &mut user, SaveMode::New).unwrap();
        assert_eq!(user["id"], json!(1));

        let mut post = row(json!({"author": {"name": "ann"}, "title": "Hello"}));
        store.save("post", &mut post).unwrap();
        assert_eq!(post["id"], json!(1));
        // the caller keeps the natural key
        assert_eq!(post["author"], json!({"name": "ann"}));

        let stored = store.load("post", &row(json!({"id": 1}))).unwrap().unwrap();
        assert_eq!(stored["author"], json!(1));
        assert_eq!(stored["title"], json!("Hello"));
    }

    #[test]
    fn test_save_new_rejects_duplicates() {
        let mut store = setup_test_store();
        seed_users(&mut store);

        let err = store
            .save_with("user", &mut row(json!({"name": "ann"})), SaveMode::New)
            .unwrap_err();
        assert!(matches!(err, NatKeyError::DuplicateKey(_)), "{err}");
    }

    #[test]
    fn test_save_always_updates_on_unique_collision() {
        let mut store = setup_test_store();
        let mut first = row(json!({"name": "bob", "email": "b@x"}));
        store.save("user", &mut first).unwrap();
        assert_eq!(first["id"], json!(1));

        let mut second = row(json!({"name": "bob", "email": "new@x"}));
        store.save("user", &mut second).unwrap();
        assert_eq!(second["id"], json!(1));

        let users = store.load_many("user", &Row::new()).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["email"], json!("new@x"));
    }

    #[test]
    fn test_save_existing() {
        let mut store = setup_test_store();
        seed_users(&mut store);

        let err = store
            .save_with("user", &mut row(json!({"name": "x"})), SaveMode::Existing)
            .unwrap_err();
        assert!(matches!(err, NatKeyError::Validation(_)), "{err}");

        let err = store
            .save_with("user", &mut row(json!({"id": 99, "email": "a"})), SaveMode::Existing)
            .unwrap_err();
        assert!(matches!(err, NatKeyError::NotFound { .. }), "{err}");

        store
            .save_with("user", &mut row(json!({"id": 2, "email": "bob@x"})), SaveMode::Existing)
            .unwrap();
        let bob = store.load("user", &row(json!({"id": 2}))).unwrap().unwrap();
        assert_eq!(
            bob,
            row(json!({"id": 2, "name": "bob", "email": "bob@x", "admin": false}))
        );

        // key only: succeeds when the row is there
        store
            .save_with("user", &mut row(json!({"id": 2})), SaveMode::Existing)
            .unwrap();
        assert!(store
            .save_with("user", &mut row(json!({"id": 42})), SaveMode::Existing)
            .is_err());
    }

    #[test]
    fn test_save_multiple_tables_rolls_back() {
        let mut store = setup_test_store();

        let mut batches = IndexMap::new();
        batches.insert("user".to_string(), vec![row(json!({"name": "dee"}))]);
        batches.insert(
            "post".to_string(),
            vec![
                row(json!({"author": {"name": "dee"}, "title": "ok"})),
                row(json!({"author": {"name": "nobody"}, "title": "bad"})),
            ],
        );

        let err = store
            .save_multiple_tables(&mut batches, SaveMode::New)
            .unwrap_err();
        assert!(
            matches!(err, NatKeyError::ForeignKeyLookup { count: 0, .. }),
            "{err}"
        );

        assert!(store.load("user", &row(json!({"name": "dee"}))).unwrap().is_none());
        assert!(store.load_many("post", &Row::new()).unwrap().is_empty());
        // ids from the rolled back inserts are not left behind
        assert!(!batches["user"][0].contains_key("id"));
        assert!(!batches["post"][0].contains_key("id"));
    }

    #[test]
    fn test_save_multiple_tables_commits() {
        let mut store = setup_test_store();

        let mut batches = IndexMap::new();
        batches.insert("user".to_string(), vec![row(json!({"name": "dee"}))]);
        batches.insert(
            "post".to_string(),
            vec![row(json!({"author": {"name": "dee"}, "title": "first"}))],
        );
        store
            .save_multiple_tables(&mut batches, SaveMode::New)
            .unwrap();
        assert_eq!(batches["user"][0]["id"], json!(1));
        assert_eq!(batches["post"][0]["id"], json!(1));

        let posts = store
            .load_many("post", &row(json!({"author": {"name": "dee"}})))
            .unwrap();
        assert_eq!(posts.len(), 1);

        let mut unknown = IndexMap::new();
        unknown.insert("nope".to_string(), vec![Row::new()]);
        assert!(matches!(
            store.save_multiple_tables(&mut unknown, SaveMode::New),
            Err(NatKeyError::Schema(_))
        ));
    }

    #[test]
    fn test_save_many_is_one_transaction() {
        let mut store = setup_test_store();
        let mut rows = vec![row(json!({"name": "ann"})), row(json!({"name": "ann"}))];

        assert!(store.save_many("user", &mut rows, SaveMode::New).is_err());
        assert!(store.load_many("user", &Row::new()).unwrap().is_empty());
        assert!(!rows[0].contains_key("id"));

        let mut rows = vec![row(json!({"name": "ann"})), row(json!({"name": "bob"}))];
        store.save_many("user", &mut rows, SaveMode::New).unwrap();
        assert_eq!(rows[1]["id"], json!(2));
    }

    #[test]
    fn test_load_sort_and_window() {
        let mut store = setup_test_store();
        seed_users(&mut store);

        let names = |rows: Vec<Row>| -> Vec<String> {
            rows.iter()
                .map(|r| r["name"].as_str().unwrap().to_string())
                .collect()
        };

        assert_eq!(
            names(store.load_many("user", &Row::new()).unwrap()),
            vec!["ann", "bob", "cy"]
        );
        assert_eq!(
            names(
                store
                    .load_many("user", &row(json!({"$sort": "-name", "$first": 0, "$count": 2})))
                    .unwrap()
            ),
            vec!["cy", "bob"]
        );

        let last = store.load("user", &row(json!({"$sort": "-name"}))).unwrap().unwrap();
        assert_eq!(last["name"], json!("cy"));
        assert!(store.load("user", &row(json!({"name": "zed"}))).unwrap().is_none());

        let only = store
            .load("user", &row(json!({"name": "bob", "$fields": ["id"]})))
            .unwrap()
            .unwrap();
        assert_eq!(only, row(json!({"id": 2})));
    }

    #[test]
    fn test_load_decodes_and_expands() {
        let mut store = setup_test_store();
        seed_users(&mut store);
        store
            .save(
                "post",
                &mut row(json!({"author": {"name": "ann"}, "title": "t", "meta": {"tags": ["a"]}})),
            )
            .unwrap();

        let post = store
            .load("post", &row(json!({"$expand": true})))
            .unwrap()
            .unwrap();
        assert_eq!(post["meta"], json!({"tags": ["a"]}));
        assert_eq!(
            post["author"],
            json!({"id": 1, "name": "ann", "email": null, "admin": false})
        );

        let err = store
            .load("post", &row(json!({"$expand": ["title"]})))
            .unwrap_err();
        assert!(matches!(err, NatKeyError::Clause(_)), "{err}");
    }

    #[test]
    fn test_load_with_lookup_list() {
        let mut store = setup_test_store();
        seed_users(&mut store);
        for (author, title) in [("ann", "a1"), ("bob", "b1"), ("cy", "c1")] {
            store
                .save("post", &mut row(json!({"author": {"name": author}, "title": title})))
                .unwrap();
        }

        let posts = store
            .load_many(
                "post",
                &row(json!({"author": [{"name": "ann"}, {"name": "bob"}]})),
            )
            .unwrap();
        let ids: Vec<&Value> = posts.iter().map(|p| &p["id"]).collect();
        assert_eq!(ids, vec![&json!(2), &json!(1)]);
    }

    #[test]
    fn test_load_as_typed() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: i64,
            name: String,
            email: Option<String>,
            admin: bool,
        }

        let mut store = setup_test_store();
        seed_users(&mut store);

        let bob: Option<User> = store.load_as("user", &row(json!({"name": "bob"}))).unwrap();
        assert_eq!(
            bob,
            Some(User {
                id: 2,
                name: "bob".into(),
                email: None,
                admin: false,
            })
        );

        let all: Vec<User> = store.load_many_as("user", &Row::new()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_delete() {
        let mut store = setup_test_store();
        seed_users(&mut store);
        for (author, title) in [("ann", "a1"), ("ann", "a2"), ("bob", "b1")] {
            store
                .save("post", &mut row(json!({"author": {"name": author}, "title": title})))
                .unwrap();
        }

        assert!(matches!(
            store.delete("user", &Row::new()),
            Err(NatKeyError::Clause(_))
        ));
        assert!(matches!(
            store.delete("user", &row(json!({"name": "ann", "$count": 1}))),
            Err(NatKeyError::Clause(_))
        ));

        assert_eq!(store.delete("post", &row(json!({"author": {"name": "bob"}}))).unwrap(), 1);

        // ON DELETE CASCADE takes ann's posts with her
        assert_eq!(store.delete("user", &row(json!({"name": "ann"}))).unwrap(), 1);
        assert!(store.load_many("post", &Row::new()).unwrap().is_empty());
        assert_eq!(store.delete("user", &row(json!({"name": "ann"}))).unwrap(), 0);
    }

    #[test]
    fn test_unknown_table() {
        let mut store = setup_test_store();
        let err = store.load("nope", &Row::new()).unwrap_err();
        assert!(matches!(err, NatKeyError::Schema(_)), "{err}");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let mut store = setup_test_store();
        let result: Result<()> = store.transaction(|s| {
            s.save_with("user", &mut row(json!({"name": "x"})), SaveMode::New)?;
            Err(NatKeyError::Other("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.load("user", &row(json!({"name": "x"}))).unwrap().is_none());
    }

    #[test]
    fn test_mysql_upsert_sql() {
        let schema = load_schema_str(BLOG).unwrap();
        let mut conn = RecordingConnection::new(Dialect::MySql);
        conn.executions.push_back(Ok(Execution {
            affected_rows: 2,
            last_insert_id: Some(42),
        }));
        let mut store = Store::new(schema, conn);

        let mut user = row(json!({"name": "ann", "email": "a@x"}));
        store.save("user", &mut user).unwrap();
        assert_eq!(user["id"], json!(42));
        assert_eq!(
            store.connection().sql(),
            vec!["INSERT INTO `user` (`name`, `email`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `id` = LAST_INSERT_ID(`id`), `name` = VALUES(`name`), `email` = VALUES(`email`)"]
        );
    }

    #[test]
    fn test_mysql_statements() {
        let schema = load_schema_str(BLOG).unwrap();
        let mut store = Store::new(schema, RecordingConnection::new(Dialect::MySql));

        store
            .save_with("user", &mut row(json!({"id": 7, "email": "e"})), SaveMode::Existing)
            .unwrap();
        store.load("user", &row(json!({"name": "ann"}))).unwrap();

        store.connection().push_rows(vec![json!({"id": 7})]);
        store
            .delete("post", &row(json!({"author": {"name": "ann"}})))
            .unwrap();

        store.create_database().unwrap();

        let conn = store.connection();
        assert_eq!(
            conn.sql(),
            vec![
                "UPDATE `user` SET `email` = ? WHERE `id` = ?",
                "SELECT `id`, `name`, `email`, `admin` FROM `user` WHERE `name` = ? ORDER BY `name` LIMIT 0, 1",
                "SELECT `id` FROM `user` WHERE `name` = ? LIMIT 2",
                "DELETE FROM `post` WHERE `author` = ?",
                "CREATE DATABASE IF NOT EXISTS `blog` DEFAULT CHARACTER SET utf8mb4",
            ]
        );
        assert_eq!(conn.statements[0].1, vec![json!("e"), json!(7)]);
        assert_eq!(conn.statements[3].1, vec![json!(7)]);
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let schema = load_schema_str(BLOG).unwrap();
        let mut conn = RecordingConnection::new(Dialect::MySql);
        conn.fail_commit = true;
        conn.executions.push_back(Ok(Execution {
            affected_rows: 1,
            last_insert_id: Some(5),
        }));
        let mut store = Store::new(schema, conn);

        let mut rows = vec![row(json!({"name": "ann"}))];
        let err = store.save_many("user", &mut rows, SaveMode::New).unwrap_err();
        assert!(err.to_string().contains("locked"), "{err}");
        assert!(!rows[0].contains_key("id"));

        let sql = store.connection().sql();
        assert_eq!(sql.first(), Some(&"BEGIN"));
        assert_eq!(sql[sql.len() - 2..], ["COMMIT", "ROLLBACK"]);
    }

    #[test]
    fn test_sqlite_ddl() {
        let mut store = setup_test_store();
        assert!(matches!(
            store.create_database(),
            Err(NatKeyError::Unsupported(_))
        ));

        let ddl = store.ddl().unwrap();
        assert_eq!(ddl.len(), 2);
        assert!(ddl[0].starts_with("CREATE TABLE IF NOT EXISTS \"user\""));
        assert!(ddl[1].starts_with("CREATE TABLE IF NOT EXISTS \"post\""));
    }

    #[test]
    fn test_save_mode_parsing() {
        assert_eq!("NEW".parse::<SaveMode>().unwrap(), SaveMode::New);
        assert_eq!("upsert".parse::<SaveMode>().unwrap(), SaveMode::Always);
        assert!("sometimes".parse::<SaveMode>().is_err());
        assert_eq!(SaveMode::default(), SaveMode::Always);
    }
}
