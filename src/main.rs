//! # Topic Chat CLI (`tchat`)
//!
//! Terminal front end for document-grounded topic conversations.
//!
//! ## Usage
//!
//! ```bash
//! tchat --config ./config/tchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tchat topics` | List catalog topics and their persisted documents |
//! | `tchat chat <topic>` | Open a topic and start a conversation |
//! | `tchat reset <topic>` | Forget a topic's persisted documents |
//!
//! ## Examples
//!
//! ```bash
//! # Upload two manuals and ask about them
//! tchat chat glazing --upload kiln.pdf glazes.pptx
//!
//! # Continue later; the documents are restored from the store
//! tchat chat glazing
//!
//! # Start over
//! tchat reset glazing
//! ```

mod chat_cmd;
mod topics_cmd;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use topic_chat::config::{self, Config};
use topic_chat::topic_store::SqliteTopicStore;
use topic_chat::{db, migrate};

/// Topic Chat CLI: ask questions about uploaded documents and get answers
/// with page citations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tchat",
    about = "Topic Chat: document-grounded conversations with page citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the topic catalog and what the store holds for each topic.
    Topics,

    /// Open a topic and start an interactive conversation.
    ///
    /// Persisted documents are restored first; `--upload` replaces them.
    Chat {
        /// Topic id from the catalog.
        topic: String,

        /// Documents to upload before the conversation starts.
        #[arg(long, num_args = 1..)]
        upload: Vec<PathBuf>,
    },

    /// Clear a topic's persisted documents.
    Reset {
        /// Topic id from the catalog.
        topic: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Topics => {
            topics_cmd::list_topics(&cfg).await?;
        }
        Commands::Chat { topic, upload } => {
            chat_cmd::run_chat(&cfg, &topic, &upload).await?;
        }
        Commands::Reset { topic } => {
            topics_cmd::reset_topic(&cfg, &topic).await?;
        }
    }

    Ok(())
}

/// Opens the SQLite-backed topic store, creating the schema if needed.
pub(crate) async fn open_store(cfg: &Config) -> anyhow::Result<SqliteTopicStore> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    Ok(SqliteTopicStore::new(pool, cfg.store.max_entry_bytes))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
