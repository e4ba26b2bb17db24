//! Objstore CLI - manage the physical layout of an object store database

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use objstore::config::{default_config_path, ensure_db_dir, load_config, write_config};
use objstore::query::Query;
use objstore::{RowStore, SqliteRowStore, StorageConfig};

#[derive(Parser)]
#[command(name = "objstore")]
#[command(version = "0.0.1")]
#[command(about = "Schema-flexible object storage on a fixed relational layout")]
#[command(long_about = r#"
Objstore persists objects with per-class property sets onto one object table,
one value table per data type, one relation table and optional audit logs.

Example usage:
  objstore config
  objstore init --database objstore.db
  objstore stats --database objstore.db
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the object, value, relation and log tables
    Init {
        /// Path to the database file
        #[arg(short, long, default_value = "objstore.db")]
        database: PathBuf,
    },

    /// Show row counts per physical table
    Stats {
        /// Path to the database file
        #[arg(short, long, default_value = "objstore.db")]
        database: PathBuf,
    },

    /// Print the rows of one physical table as JSON lines
    Dump {
        /// Physical table name
        table: String,

        /// Path to the database file
        #[arg(short, long, default_value = "objstore.db")]
        database: PathBuf,

        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Write the default configuration file
    Config {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct TableRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Rows")]
    rows: usize,
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<StorageConfig> {
    Ok(load_config(path)?.unwrap_or_default())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { database } => {
            let config = resolve_config(cli.config.as_deref())?;
            ensure_db_dir(&database)?;
            let store = SqliteRowStore::open(&database)?;
            store.create_layout(&config, None)?;
            info!(database = %database.display(), "Layout created");
            println!("✅ Initialized {}", database.display());
        }

        Commands::Stats { database } => {
            let config = resolve_config(cli.config.as_deref())?;
            let store = SqliteRowStore::open(&database)?;
            let rows: Vec<TableRow> = store
                .table_counts(&config)?
                .into_iter()
                .map(|c| TableRow { table: c.table, rows: c.rows })
                .collect();

            println!("📊 Objstore Statistics ({})", database.display());
            if rows.is_empty() {
                println!("No layout tables found. Run `objstore init` first.");
            } else {
                println!("{}", Table::new(&rows).with(Style::rounded()));
            }
        }

        Commands::Dump { table, database, limit } => {
            let store = SqliteRowStore::open(&database)?;
            let mut query = Query::new(table);
            query.record_count = limit;
            store.for_each_row(&query, &mut |row| {
                let line = serde_json::to_string(&row).map_err(|e| objstore::Error::Config(e.to_string()))?;
                println!("{}", line);
                Ok(())
            })?;
        }

        Commands::Config { force } => {
            let path = cli.config.unwrap_or_else(default_config_path);
            write_config(&path, &StorageConfig::default(), force)?;
            println!("✅ Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}
