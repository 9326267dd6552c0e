//! # Cloudsearch CLI (`cloudsearch`)
//!
//! Search every linked account at once from the terminal, and manage the
//! accounts that feed the search.
//!
//! ## Usage
//!
//! ```bash
//! cloudsearch --config ./config/cloudsearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cloudsearch init` | Create the SQLite database and run schema migrations |
//! | `cloudsearch search "<query>"` | Fan a query out to every live source |
//! | `cloudsearch accounts list` | List linked accounts |
//! | `cloudsearch accounts add-local <path>` | Link a local folder |
//! | `cloudsearch accounts delete <id>` | Unlink an account and purge its cache |
//! | `cloudsearch types` | List registered account and content types |
//! | `cloudsearch watch` | Keep credentials fresh until interrupted |
//!
//! ## Query syntax
//!
//! ```bash
//! # Free text across everything
//! cloudsearch search "quarterly budget"
//!
//! # Only images from local folders, changed during 2024
//! cloudsearch search "holiday type:image service:local after:2024-01-01 before:2024-12-31"
//!
//! # Answer from the cache only
//! cloudsearch search "budget mode:cache"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cloudsearch::config::{self, Config};
use cloudsearch::{app::App, logging, search, sources};

/// Cloudsearch: one query across every linked account.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "cloudsearch",
    about = "Cloudsearch: one query across every linked account",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cloudsearch.toml`. A missing file means
    /// every setting takes its default.
    #[arg(long, global = true, default_value = "./config/cloudsearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Search every live source.
    ///
    /// Results stream in as sources answer. The search ends when every
    /// source is done, on Ctrl-C, or when the timeout passes.
    Search {
        /// Query text. Supports `service:`, `type:`, `mode:`, `before:`
        /// and `after:` tokens.
        query: String,

        /// Upper bound on the search, overriding `search.timeout_secs`.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print one JSON object per result.
        #[arg(long)]
        json: bool,
    },

    /// Manage linked accounts.
    Accounts {
        #[command(subcommand)]
        action: AccountsAction,
    },

    /// List registered account and content types.
    Types,

    /// Refresh expiring credentials periodically until Ctrl-C.
    Watch,
}

#[derive(Subcommand)]
enum AccountsAction {
    /// List linked accounts.
    List,

    /// Link a local folder as a searchable account.
    AddLocal {
        /// Directory to search.
        path: PathBuf,

        /// Display name. Defaults to the directory name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Unlink an account and remove its cached results.
    Delete {
        /// Account id, as shown by `accounts list`.
        id: String,
    },
}

fn load(path: &std::path::Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            let app = App::open(cfg).await?;
            println!(
                "Database initialized successfully at {}.",
                app.config.db_path().display()
            );
            app.close().await;
        }
        Commands::Search {
            query,
            timeout_secs,
            json,
        } => {
            search::run_search(&cfg, &query, timeout_secs, json).await?;
        }
        Commands::Accounts { action } => match action {
            AccountsAction::List => {
                sources::list_accounts(&cfg).await?;
            }
            AccountsAction::AddLocal { path, name } => {
                sources::add_local(&cfg, &path, name).await?;
            }
            AccountsAction::Delete { id } => {
                sources::delete_account(&cfg, &id).await?;
            }
        },
        Commands::Types => {
            sources::list_types(&cfg).await?;
        }
        Commands::Watch => {
            sources::run_watch(&cfg).await?;
        }
    }

    Ok(())
}
