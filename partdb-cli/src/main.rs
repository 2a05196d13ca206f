use clap::{Parser, Subcommand, ValueEnum};
use partdb::schema::parse_schema;
use partdb::{FileEngine, Query, Record, Schema, Selector, Store};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// partdb CLI: read and write one partition of a file-backed database
#[derive(Parser)]
#[command(name = "partdb", version, about)]
struct Cli {
    /// Database file (created on first write)
    #[arg(long, env = "PARTDB_DB", default_value = "partdb.json")]
    db: PathBuf,

    /// Partition to operate on
    #[arg(long, env = "PARTDB_PARTITION", default_value = "default")]
    partition: String,

    /// Schema file (YAML or JSON). Without one the store is untyped.
    #[arg(long, env = "PARTDB_SCHEMA")]
    schema: Option<PathBuf>,

    /// Primary key of an untyped store
    #[arg(long, default_value = "id")]
    primary_key: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Add a record
    Add {
        /// Record as a JSON object
        record: Option<String>,
        /// Field values (e.g. --field name=Alice)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Overwrite an existing record with the same id
        #[arg(long)]
        force: bool,
    },

    /// Merge fields into an existing record
    Update {
        /// Partial record as a JSON object, including the id
        record: Option<String>,
        /// Field values to update (e.g. --field status=done)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Get a record by id
    Get {
        id: String,
    },

    /// List records matching a query (default: all)
    Find {
        /// `*` or a JSON query such as '{"name": {"$in": ["a"]}}'
        #[arg(default_value = "*")]
        selector: String,
    },

    /// Check whether an id is stored or a query matches
    Exists {
        selector: String,
    },

    /// Remove by id, `*`, or JSON query
    Remove {
        selector: String,
    },

    /// Count records matching a query (default: all)
    Count {
        #[arg(default_value = "*")]
        selector: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&cli)?;

    match cli.command {
        Command::Add {
            record,
            fields,
            force,
        } => {
            let record = build_record(record.as_deref(), &fields)?;
            let id = record.get(store.primary_key()).cloned();
            if force {
                store.force_add(record).await?;
            } else {
                store.add(record).await?;
            }
            print_output(&serde_json::json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Update { record, fields } => {
            let record = build_record(record.as_deref(), &fields)?;
            let id = record.get(store.primary_key()).cloned();
            store.update(record).await?;
            print_output(&serde_json::json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Get { id } => {
            let found = store.find_one(Selector::ById(id)).await?;
            print_output(&serde_json::json!(found), &cli.format)?;
        }

        Command::Find { selector } => {
            let records = store.find_many(parse_selector(&selector)?).await?;
            print_output(&serde_json::json!(records), &cli.format)?;
        }

        Command::Exists { selector } => {
            let found = store.exists(parse_selector(&selector)?).await?;
            print_output(&serde_json::json!({ "exists": found }), &cli.format)?;
        }

        Command::Remove { selector } => {
            let removed = store.remove(parse_selector(&selector)?).await?;
            print_output(&serde_json::json!({ "ok": true, "removed": removed }), &cli.format)?;
        }

        Command::Count { selector } => {
            let count = store.count(parse_selector(&selector)?).await?;
            print_output(&serde_json::json!({ "count": count }), &cli.format)?;
        }
    }

    Ok(())
}

fn open_store(cli: &Cli) -> Result<Store, Box<dyn std::error::Error>> {
    let schema = match &cli.schema {
        Some(path) => {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&cli.partition);
            Schema::from_fields(name, parse_schema(path)?)?
        }
        None => Schema::untyped(&cli.primary_key)?,
    };
    let engine = FileEngine::open(&cli.db)?;
    log::debug!("using {} partition {}", engine.path().display(), cli.partition);
    Ok(Store::open(Arc::new(engine), &cli.partition, schema)?)
}

/// `*`, a JSON query object, or an id.
fn parse_selector(s: &str) -> Result<Selector, Box<dyn std::error::Error>> {
    if s.trim_start().starts_with('{') {
        Ok(Selector::from(s.parse::<Query>()?))
    } else {
        Ok(Selector::from(s))
    }
}

fn build_record(
    json: Option<&str>,
    fields: &[(String, String)],
) -> Result<Record, Box<dyn std::error::Error>> {
    let mut record = match json {
        Some(text) => partdb::record::from_value(serde_json::from_str(text)?)?,
        None => Record::new(),
    };
    for (key, val) in fields {
        // Try to parse as JSON value (for numbers, booleans, arrays, objects)
        let value = serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
        record.insert(key.clone(), value);
    }
    Ok(record)
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}
