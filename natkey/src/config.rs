use crate::driver::{Dialect, SqliteConnection};
use crate::error::{NatKeyError, Result};
use crate::schema::{load_schema, Schema};
use crate::store::{SaveMode, Store};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings read from `natkey.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to the schema file
    #[serde(default = "default_schema")]
    pub schema: PathBuf,
    /// SQLite database file, or `:memory:`
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default)]
    pub dialect: Dialect,
    #[serde(default)]
    pub save_mode: SaveMode,
    /// Enforce foreign keys in SQLite
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
}

fn default_schema() -> PathBuf {
    PathBuf::from("schema.yaml")
}

fn default_database() -> PathBuf {
    PathBuf::from("natkey.db")
}

fn default_foreign_keys() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            schema: default_schema(),
            database: default_database(),
            dialect: Dialect::default(),
            save_mode: SaveMode::default(),
            foreign_keys: default_foreign_keys(),
        }
    }
}

fn is_memory(path: &Path) -> bool {
    path == Path::new(":memory:")
}

impl Config {
    pub const FILE_NAME: &'static str = "natkey.yaml";

    /// Parse a config from YAML. Paths are left as written.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a config file. Relative paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NatKeyError::Other(format!("Cannot read config {}: {e}", path.display()))
        })?;
        let config = Self::parse(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.relative_to(base))
    }

    /// Load `natkey.yaml` from `dir` when present, else the defaults there
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Config::default().relative_to(dir))
        }
    }

    fn relative_to(mut self, base: &Path) -> Self {
        if self.schema.is_relative() {
            self.schema = base.join(&self.schema);
        }
        if self.database.is_relative() && !is_memory(&self.database) {
            self.database = base.join(&self.database);
        }
        self
    }

    pub fn schema(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema = path.into();
        self
    }

    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = path.into();
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn save_mode(mut self, mode: SaveMode) -> Self {
        self.save_mode = mode;
        self
    }

    /// Read and normalize the configured schema
    pub fn load_schema(&self) -> Result<Schema> {
        if !self.schema.exists() {
            return Err(NatKeyError::Schema(format!(
                "Schema file not found: {}",
                self.schema.display()
            )));
        }
        load_schema(&self.schema)
    }

    /// Open a store over the configured SQLite database
    pub fn open(&self) -> Result<Store<SqliteConnection>> {
        if self.dialect != Dialect::Sqlite {
            return Err(NatKeyError::Unsupported(format!(
                "No bundled driver for {}; only DDL can be rendered for it",
                self.dialect
            )));
        }
        let schema = self.load_schema()?;
        let conn = SqliteConnection::open(&self.database, self.foreign_keys)?;
        Ok(Store::new(schema, conn).with_save_mode(self.save_mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Row;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    const SCHEMA: &str = "tables:\n  tag:\n    name: string unique\n";

    #[test]
    fn test_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.dialect, Dialect::Sqlite);
        assert_eq!(config.save_mode, SaveMode::Always);
        assert!(config.foreign_keys);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::parse("schemas: x.yaml").is_err());
        assert!(Config::parse("dialect: oracle").is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(Config::FILE_NAME);
        std::fs::write(
            &path,
            "schema: db/schema.yaml\ndatabase: ':memory:'\ndialect: mysql\nsave_mode: new\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.schema, tmp.path().join("db/schema.yaml"));
        assert_eq!(config.database, PathBuf::from(":memory:"));
        assert_eq!(config.dialect, Dialect::MySql);
        assert_eq!(config.save_mode, SaveMode::New);
    }

    #[test]
    fn test_discover_without_file() {
        let tmp = TempDir::new().unwrap();
        let config = Config::discover(tmp.path()).unwrap();
        assert_eq!(config.schema, tmp.path().join("schema.yaml"));
        assert_eq!(config.database, tmp.path().join("natkey.db"));
    }

    #[test]
    fn test_open_store() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("schema.yaml"), SCHEMA).unwrap();

        let config = Config::discover(tmp.path()).unwrap().save_mode(SaveMode::New);
        let mut store = config.open().unwrap();
        assert_eq!(store.save_mode(), SaveMode::New);
        store.create_tables().unwrap();

        let mut tag = Row::new();
        tag.insert("name".into(), json!("rust"));
        store.save("tag", &mut tag).unwrap();
        drop(store);

        // data survives reopening the file
        let mut store = config.open().unwrap();
        assert_eq!(store.load_many("tag", &Row::new()).unwrap().len(), 1);
        assert!(tmp.path().join("natkey.db").exists());
    }

    #[test]
    fn test_open_mysql_unsupported() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("schema.yaml"), SCHEMA).unwrap();
        let config = Config::discover(tmp.path()).unwrap().dialect(Dialect::MySql);

        assert!(matches!(config.open(), Err(NatKeyError::Unsupported(_))));
        assert!(config.load_schema().is_ok());
    }

    #[test]
    fn test_missing_schema_file() {
        let tmp = TempDir::new().unwrap();
        let config = Config::discover(tmp.path()).unwrap();
        assert!(matches!(config.load_schema(), Err(NatKeyError::Schema(_))));
    }
}
