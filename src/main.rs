//! # Quality Store CLI (`qstore`)
//!
//! ## Usage
//!
//! ```bash
//! qstore --config ./config/qstore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qstore init` | Create the database and the configured collection |
//! | `qstore store <file>` | Store (or replace) an analysis report |
//! | `qstore get <app_id>` | Print the reconstructed report |
//! | `qstore query "<text>"` | Semantic search with metadata filters |
//! | `qstore apps` | List stored applications |
//! | `qstore delete <app_id>` | Remove an application's report |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to adjust.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quality_store::config::{self, Config};
use quality_store::ingest::StoreOptions;
use quality_store::search::QueryOptions;
use quality_store::{apps, get, ingest, migrate, search};

/// Quality Store: storage and semantic retrieval for code-quality analyses.
#[derive(Parser)]
#[command(name = "qstore", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/qstore.toml`. A missing file means built-in
    /// defaults; environment overrides apply either way.
    #[arg(long, global = true, default_value = "./config/qstore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and collection table. Safe to re-run.
    Init,

    /// Store an analysis report, replacing any previous one for the app.
    Store {
        /// Report file, or `-` to read from stdin.
        file: PathBuf,

        /// Application id. A random UUID is generated when omitted.
        #[arg(long)]
        app_id: Option<String>,

        /// Application name. Defaults to the file stem.
        #[arg(long)]
        app_name: Option<String>,

        /// Focus area covered by the report: `logging`, `availability`,
        /// `error_handling`, or `all`. Repeatable.
        #[arg(long)]
        focus: Vec<String>,

        /// Extra metadata as `key=value`. Repeatable.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Print the stored report of an application.
    Get {
        app_id: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search stored reports.
    Query {
        /// Free-text query.
        text: String,

        /// Only applications whose report covers this focus area. Repeatable.
        #[arg(long)]
        focus: Vec<String>,

        #[arg(long)]
        app_id: Option<String>,

        #[arg(long)]
        app_name: Option<String>,

        /// Only reports created on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only reports created on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of applications to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List stored applications.
    Apps {
        #[arg(long)]
        json: bool,
    },

    /// Delete an application's report.
    Delete { app_id: String },
}

/// Parse a `key=value` pair for `--meta` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg: Config = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!(
                "Initialized collection '{}' in {}",
                cfg.store.collection,
                cfg.store.db_file().display()
            );
        }
        Commands::Store {
            file,
            app_id,
            app_name,
            focus,
            meta,
        } => {
            let opts = StoreOptions {
                app_id,
                app_name,
                focus,
                meta,
            };
            ingest::run_store(&cfg, &file, &opts).await?;
        }
        Commands::Get { app_id, json } => {
            get::run_get(&cfg, &app_id, json).await?;
        }
        Commands::Query {
            text,
            focus,
            app_id,
            app_name,
            since,
            until,
            limit,
            json,
        } => {
            let opts = QueryOptions {
                focus,
                app_id,
                app_name,
                since,
                until,
                limit,
                json,
            };
            search::run_query(&cfg, &text, &opts).await?;
        }
        Commands::Apps { json } => {
            apps::run_apps(&cfg, json).await?;
        }
        Commands::Delete { app_id } => {
            apps::run_delete(&cfg, &app_id).await?;
        }
    }

    Ok(())
}
