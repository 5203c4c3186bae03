use clap::{Parser, Subcommand, ValueEnum};
use natkey::{ddl, Config, Dialect, Row, SaveMode};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;

/// natkey CLI: schema-driven tables and natural-key CRUD from the command line
#[derive(Parser)]
#[command(name = "natkey", version, about)]
struct Cli {
    /// Config file (default: ./natkey.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Schema file, overriding the config
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// SQLite database file or :memory:, overriding the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// SQL dialect, overriding the config
    #[arg(long, global = true)]
    dialect: Option<DialectArg>,

    /// Output format
    #[arg(long, global = true, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Mysql,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    New,
    Existing,
    Always,
}

impl From<ModeArg> for SaveMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::New => SaveMode::New,
            ModeArg::Existing => SaveMode::Existing,
            ModeArg::Always => SaveMode::Always,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the normalized schema in canonical form
    Schema,

    /// Print the CREATE statements for the schema
    Ddl {
        /// Include CREATE DATABASE (MySQL only)
        #[arg(long)]
        create_database: bool,
    },

    /// Create the schema's tables in the database
    Init,

    /// Load rows from a table
    Load {
        /// Table name
        table: String,
        /// Criteria (e.g. --where name=Alice, --where 'author={"name":"Alice"}')
        #[arg(long = "where", value_parser = parse_key_value)]
        criteria: Vec<(String, String)>,
        /// Sort spec (e.g. --sort "-created, name")
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        first: Option<u64>,
        #[arg(long)]
        last: Option<u64>,
        #[arg(long)]
        count: Option<u64>,
        /// Replace foreign keys with their parent rows
        #[arg(long)]
        expand: bool,
        /// Return only the first match
        #[arg(long)]
        one: bool,
    },

    /// Save a row (or, with --json and a list, several rows)
    Save {
        /// Table name
        table: String,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// A row object or a list of rows as JSON
        #[arg(long, conflicts_with = "fields")]
        json: Option<String>,
        /// Save mode, overriding the config
        #[arg(long)]
        mode: Option<ModeArg>,
    },

    /// Delete the rows matching the criteria
    Delete {
        /// Table name
        table: String,
        /// Criteria (e.g. --where id=4)
        #[arg(long = "where", value_parser = parse_key_value)]
        criteria: Vec<(String, String)>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> natkey::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover(Path::new("."))?,
    };
    if let Some(schema) = &cli.schema {
        config = config.schema(schema);
    }
    if let Some(database) = &cli.database {
        config = config.database(database);
    }
    if let Some(dialect) = cli.dialect {
        config = config.dialect(dialect.into());
    }
    log::debug!("Using {config:?}");
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Schema => {
            let schema = config.load_schema()?;
            print_output(&schema.to_definition(), &cli.format)?;
        }

        Command::Ddl { create_database } => {
            let schema = config.load_schema()?;
            let mut statements = Vec::new();
            if create_database {
                let name = schema
                    .database
                    .as_deref()
                    .ok_or("Schema does not name a database")?;
                statements.push(ddl::create_database(config.dialect, name)?);
            }
            statements.extend(ddl::create_schema(config.dialect, &schema)?);
            for sql in statements {
                println!("{sql};\n");
            }
        }

        Command::Init => {
            let mut store = config.open()?;
            store.create_tables()?;
            let tables: Vec<&String> = store.schema().tables.keys().collect();
            print_output(&serde_json::json!({ "ok": true, "tables": tables }), &cli.format)?;
        }

        Command::Load {
            table,
            criteria,
            sort,
            first,
            last,
            count,
            expand,
            one,
        } => {
            let mut criteria = fields_to_row(&criteria);
            if let Some(sort) = sort {
                criteria.insert("$sort".into(), Value::String(sort));
            }
            for (key, value) in [("$first", first), ("$last", last), ("$count", count)] {
                if let Some(value) = value {
                    criteria.insert(key.into(), Value::from(value));
                }
            }
            if expand {
                criteria.insert("$expand".into(), Value::Bool(true));
            }

            let mut store = config.open()?;
            if one {
                let row = store.load(&table, &criteria)?;
                print_output(&row, &cli.format)?;
            } else {
                let rows = store.load_many(&table, &criteria)?;
                print_output(&rows, &cli.format)?;
            }
        }

        Command::Save {
            table,
            fields,
            json,
            mode,
        } => {
            let mut store = config.open()?;
            let mode = mode.map(SaveMode::from).unwrap_or(store.save_mode());

            match json.map(|s| serde_json::from_str::<Value>(&s)).transpose()? {
                Some(Value::Array(items)) => {
                    let mut rows = items
                        .into_iter()
                        .map(into_row)
                        .collect::<Result<Vec<_>, _>>()?;
                    store.save_many(&table, &mut rows, mode)?;
                    print_output(&rows, &cli.format)?;
                }
                Some(value) => {
                    let mut row = into_row(value)?;
                    store.save_with(&table, &mut row, mode)?;
                    print_output(&row, &cli.format)?;
                }
                None => {
                    let mut row = fields_to_row(&fields);
                    store.save_with(&table, &mut row, mode)?;
                    print_output(&row, &cli.format)?;
                }
            }
        }

        Command::Delete { table, criteria } => {
            let criteria = fields_to_row(&criteria);
            let mut store = config.open()?;
            let deleted = store.delete(&table, &criteria)?;
            print_output(&serde_json::json!({ "ok": true, "deleted": deleted }), &cli.format)?;
        }
    }

    Ok(())
}

fn print_output<T: Serialize>(
    value: &T,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn into_row(value: Value) -> Result<Row, String> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(format!("Expected a JSON object for a row, got {other}")),
    }
}

fn fields_to_row(fields: &[(String, String)]) -> Row {
    let mut row = Row::new();
    for (key, val) in fields {
        // numbers, booleans, null and lookup objects arrive as JSON
        let json_val = serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.clone()));
        row.insert(key.clone(), json_val);
    }
    row
}
