//! idmefdb CLI
//!
//! Command-line access to an IDMEF event database:
//! - Install the schema and inspect the bound format
//! - Check mapping files and selection strings
//! - List, fetch, insert and delete messages
//! - Run values queries

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use idmefdb::config::{generate_default_config, Config, LoggingConfig};
use idmefdb::criteria::{Criteria, CriteriaCompiler};
use idmefdb::db::describe_error;
use idmefdb::format::{ClassicFormat, FormatPlugin, IdentsOrder, ValuesQuery, Window};
use idmefdb::mapping::MappingIndex;
use idmefdb::registry::PluginRegistry;
use idmefdb::selection::{PathSelection, SelectedPath, SelectionFlags};
use idmefdb::sql::{PostgresDialect, SqlDialect, SqliteDialect};
use idmefdb::{Database, DbError, DbResult, Message, MessageKind, ObjectPath, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "idmefdb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query and manage IDMEF events stored in a relational database")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overrides the configured one
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Format plugin, skips detection from the database
    #[arg(long, global = true)]
    pub db_format: Option<String>,

    /// Output format (table, json, csv)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a mapping file
    CheckMapping {
        /// Mapping file
        path: PathBuf,
        /// Object paths to resolve against the mapping
        #[arg(short, long)]
        lookup: Vec<String>,
    },

    /// Compile a path selection and show its SQL
    Parse {
        /// Selection, e.g. "alert.classification.text/group_by, count(alert.messageid)"
        selection: String,
        /// Dialect used to render SQL (pgsql, sqlite)
        #[arg(short, long, default_value = "pgsql")]
        dialect: String,
    },

    /// Create the schema in an empty database
    Init {
        /// Format plugin to install
        #[arg(long, default_value = "classic")]
        schema: String,
    },

    /// Show the bound format and backend
    Info,

    /// List message idents
    Idents {
        /// List heartbeats instead of alerts
        #[arg(long)]
        heartbeat: bool,
        /// Filter, e.g. "alert.assessment.impact.severity == high" (repeatable, ANDed)
        #[arg(short, long = "where")]
        filters: Vec<String>,
        #[arg(short, long)]
        limit: Option<u64>,
        #[arg(long)]
        offset: Option<u64>,
        /// Order by create time (none, asc, desc)
        #[arg(long, default_value = "desc")]
        order: String,
    },

    /// Print one message
    Get {
        ident: u64,
        #[arg(long)]
        heartbeat: bool,
    },

    /// Insert a message from a JSON file
    Insert {
        /// JSON message ({"kind": "alert", "fields": {...}})
        path: PathBuf,
    },

    /// Run a values query
    Values {
        /// Path selection
        selection: String,
        #[arg(short, long = "where")]
        filters: Vec<String>,
        #[arg(long)]
        distinct: bool,
        #[arg(short, long)]
        limit: Option<u64>,
        #[arg(long)]
        offset: Option<u64>,
    },

    /// Delete messages by ident or by filter
    Delete {
        /// Idents to delete
        idents: Vec<u64>,
        #[arg(long)]
        heartbeat: bool,
        /// Delete every message matching these filters
        #[arg(short, long = "where")]
        filters: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(db) = &cli.db {
        config.database.file = Some(db.clone());
    }
    if let Some(format) = &cli.db_format {
        config.format.name = Some(format.clone());
    }

    init_logging(&config.logging);

    match cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &content)?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }

        Commands::CheckMapping { path, lookup } => {
            let index = db(MappingIndex::load(&path).map_err(DbError::from))?;
            println!("{}: {} objects", path.display(), index.len());

            for object in lookup {
                let path: ObjectPath = db(object.parse())?;
                let entry = db(index.resolve(&path))?;
                println!("{:<40} {}", object, entry.sql_expression());
            }
        }

        Commands::Parse { selection, dialect } => {
            let selection = db(PathSelection::compile(&selection).map_err(Into::into))?;
            let registry = db(load_registry(&config))?;
            let format = db(registry.format(config.format.name.as_deref().unwrap_or("classic")))?;

            let dialect: Box<dyn SqlDialect> = match dialect.as_str() {
                "pgsql" | "postgres" => Box::new(PostgresDialect),
                "sqlite" => Box::new(SqliteDialect),
                other => return Err(anyhow!("unknown dialect '{}'", other)),
            };
            let compiler = CriteriaCompiler::new(format.mapping(), dialect.as_ref());

            println!("{:<4} {:<40} {:<20} SQL", "Col", "Selection", "Flags");
            println!("{}", "-".repeat(90));
            for selected in &selection {
                let sql = db(compiler.compile_selected(selected))?;
                println!(
                    "{:<4} {:<40} {:<20} {}",
                    selected.column_index(),
                    column_label(selected),
                    format!("{:?}", selected.flags),
                    sql.expr
                );
            }
        }

        Commands::Init { schema } => {
            let registry = db(load_registry(&config))?;
            prepare_db_file(&config)?;
            let sql = db(registry.open_sql(&config.database.to_sql_settings()))?;
            let database = db(Database::install(sql, &registry, &schema))?;
            println!(
                "Installed {} schema {}",
                database.format_name(),
                database.format_version().unwrap_or("-")
            );
        }

        Commands::Info => {
            let database = open(&config)?;
            println!("idmefdb v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Backend: {}", config.database.backend);
            println!("  Server version: {}", database.server_version());
            println!("Format: {}", database.format_name());
            println!(
                "  Schema version: {}",
                database.format_version().unwrap_or("(not checked)")
            );
            println!("  Mapped objects: {}", database.mapping().len());
        }

        Commands::Idents {
            heartbeat,
            filters,
            limit,
            offset,
            order,
        } => {
            let database = open(&config)?;
            let criteria = parse_filters(&filters)?;
            let order: IdentsOrder = db(order.parse())?;

            let result = db(database.get_idents(
                kind(heartbeat),
                criteria.as_ref(),
                Window::new(limit, offset),
                order,
            ))?;
            let idents = match result {
                Some(result) => db(result.collect_remaining())?,
                None => Vec::new(),
            };

            let rows: Vec<Vec<serde_json::Value>> =
                idents.iter().map(|i| vec![serde_json::json!(i)]).collect();
            print_rows(&cli.format, &["ident".to_string()], &rows)?;
        }

        Commands::Get { ident, heartbeat } => {
            let database = open(&config)?;
            let message = db(database.get_message(kind(heartbeat), ident))?
                .ok_or_else(|| anyhow!("no {} with ident {}", kind(heartbeat), ident))?;

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&message)?),
                _ => {
                    let rows: Vec<Vec<serde_json::Value>> = message
                        .fields
                        .iter()
                        .map(|(path, value)| {
                            vec![serde_json::json!(path.to_string()), plain_json(Some(value))]
                        })
                        .collect();
                    print_rows(&cli.format, &["path".to_string(), "value".to_string()], &rows)?;
                }
            }
        }

        Commands::Insert { path } => {
            let database = open(&config)?;
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {:?}", path))?;
            let message: Message = serde_json::from_str(&content)
                .with_context(|| format!("invalid message in {:?}", path))?;

            let ident = db(database.insert(&message))?;
            println!("Inserted {} {}", message.kind, ident);
        }

        Commands::Values {
            selection,
            filters,
            distinct,
            limit,
            offset,
        } => {
            let database = open(&config)?;
            let selection = db(PathSelection::compile(&selection).map_err(Into::into))?;
            let criteria = parse_filters(&filters)?;
            let header: Vec<String> = selection.iter().map(column_label).collect();

            let query = ValuesQuery {
                distinct,
                window: Window::new(limit, offset),
            };
            let result = db(database.get_values(selection, criteria.as_ref(), query))?;

            let mut rows = Vec::new();
            if let Some(result) = result {
                while let Some(row) = db(result.get_next())? {
                    rows.push(row.iter().map(|v| plain_json(v.as_ref())).collect());
                }
            }
            print_rows(&cli.format, &header, &rows)?;
        }

        Commands::Delete {
            idents,
            heartbeat,
            filters,
        } => {
            let database = open(&config)?;
            let kind = kind(heartbeat);

            let deleted = if filters.is_empty() {
                db(database.delete_from_list(kind, &idents))?
            } else {
                if !idents.is_empty() {
                    return Err(anyhow!("give either idents or --where filters, not both"));
                }
                let criteria = parse_filters(&filters)?;
                match db(database.get_idents(
                    kind,
                    criteria.as_ref(),
                    Window::default(),
                    IdentsOrder::None,
                ))? {
                    Some(result) => db(database.delete_from_result_idents(kind, &result))?,
                    None => 0,
                }
            };
            println!("Deleted {} {}(s)", deleted, kind);
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("idmefdb={}", config.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Error text built by the orchestrator
fn db<T>(result: DbResult<T>) -> anyhow::Result<T> {
    result.map_err(|e| anyhow!(describe_error(&e)))
}

fn load_registry(config: &Config) -> DbResult<PluginRegistry> {
    let mut registry = PluginRegistry::with_builtins()?;
    if let Some(path) = &config.format.mapping_file {
        let format = ClassicFormat::from_mapping_file(&expand_home(path))?;
        registry.register_format(Arc::new(format));
    }
    Ok(registry)
}

fn open(config: &Config) -> anyhow::Result<Database> {
    let registry = db(load_registry(config))?;
    let mut settings = config.database.to_sql_settings();
    settings.file = settings
        .file
        .map(|f| expand_home(&f).to_string_lossy().to_string());

    db(Database::open(
        &registry,
        &settings,
        config.format.name.as_deref(),
    ))
}

fn prepare_db_file(config: &Config) -> anyhow::Result<()> {
    if let Some(file) = &config.database.file {
        if let Some(parent) = expand_home(file).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(path).to_path_buf(),
    }
}

fn kind(heartbeat: bool) -> MessageKind {
    if heartbeat {
        MessageKind::Heartbeat
    } else {
        MessageKind::Alert
    }
}

fn parse_filters(filters: &[String]) -> anyhow::Result<Option<Criteria>> {
    let mut criteria: Option<Criteria> = None;
    for filter in filters {
        let parsed = db(Criteria::parse_filter(filter))?;
        criteria = Some(match criteria {
            Some(existing) => existing.and(parsed),
            None => parsed,
        });
    }
    Ok(criteria)
}

/// Column header for a selected path, in selection syntax
fn column_label(selected: &SelectedPath) -> String {
    let mut label = selected.path.to_string();

    if let Some(unit) = &selected.time_constraint {
        label = format!("extract({} FROM {})", unit, label);
    }
    if let Some(interval) = &selected.interval {
        label = format!("interval({}, {}, {})", label, interval.value, interval.unit);
    }

    let aggregate = selected.flags.aggregate().and_then(|flag| {
        [
            (SelectionFlags::MIN, "min"),
            (SelectionFlags::MAX, "max"),
            (SelectionFlags::AVG, "avg"),
            (SelectionFlags::STD, "std"),
            (SelectionFlags::COUNT, "count"),
            (SelectionFlags::SUM, "sum"),
        ]
        .into_iter()
        .find(|(f, _)| *f == flag)
        .map(|(_, name)| name)
    });

    match aggregate {
        Some(name) => format!("{}({})", name, label),
        None => label,
    }
}

/// Untagged JSON rendering of a value
fn plain_json(value: Option<&Value>) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(Value::String(s)) => serde_json::json!(s),
        Some(Value::Integer(i)) => serde_json::json!(i),
        Some(Value::Float(f)) => serde_json::json!(f),
        Some(other) => serde_json::json!(other.to_string()),
    }
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_rows(
    format: &str,
    header: &[String],
    rows: &[Vec<serde_json::Value>],
) -> anyhow::Result<()> {
    match format {
        "json" => {
            let objects: Vec<serde_json::Map<String, serde_json::Value>> = rows
                .iter()
                .map(|row| header.iter().cloned().zip(row.iter().cloned()).collect())
                .collect();
            println!("{}", serde_json::to_string_pretty(&objects)?);
        }
        "csv" => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record(header)?;
            for row in rows {
                writer.write_record(row.iter().map(|v| match v {
                    serde_json::Value::Null => String::new(),
                    other => cell(other),
                }))?;
            }
            writer.flush()?;
        }
        _ => {
            if rows.is_empty() {
                println!("No results");
                return Ok(());
            }

            let widths: Vec<usize> = header
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    rows.iter()
                        .map(|r| r.get(i).map(|v| cell(v).len()).unwrap_or(0))
                        .chain(std::iter::once(h.len()))
                        .max()
                        .unwrap_or(0)
                })
                .collect();

            let line = |cells: Vec<String>| {
                cells
                    .iter()
                    .zip(&widths)
                    .map(|(c, w)| format!("{:<width$}", c, width = w))
                    .collect::<Vec<_>>()
                    .join(" | ")
            };

            println!("{}", line(header.to_vec()));
            println!("{}", "-".repeat(widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1)));
            for row in rows {
                println!("{}", line(row.iter().map(cell).collect()));
            }
        }
    }

    Ok(())
}
