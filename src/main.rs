//! # Event Assistant CLI (`eva`)
//!
//! The `eva` binary manages the assistant's database, knowledge base, and
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! eva --config ./config/eva.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `eva init` | Create the SQLite database and run schema migrations |
//! | `eva ingest <dir>` | Chunk, embed, and store docs from a directory |
//! | `eva search "<query>"` | Run a retrieval query from the terminal |
//! | `eva serve` | Start the chat HTTP API |
//! | `eva cleanup` | Delete sessions older than the retention window |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use event_assistant::config;
use event_assistant::db;
use event_assistant::ingest;
use event_assistant::migrate;
use event_assistant::provider::OpenAiClient;
use event_assistant::retrieval::RetrievalService;
use event_assistant::server;
use event_assistant::session::SessionStore;
use event_assistant::store::ChunkStore;

/// Event Assistant — RAG chat backend for an event/venue listing platform.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/eva.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "eva",
    about = "Event Assistant — RAG chat backend for an event/venue listing platform",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/eva.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest knowledge-base documents from a directory.
    ///
    /// Reads `.txt` and `.md` files, splits them into overlapping chunks,
    /// embeds each chunk via the configured provider, and stores the
    /// result for retrieval. Requires `OPENAI_API_KEY`.
    Ingest {
        /// Directory containing the documentation files.
        dir: PathBuf,

        /// Delete all existing chunks before ingesting (full rebuild).
        #[arg(long)]
        clear: bool,
    },

    /// Run a retrieval query and print the ranked chunks.
    ///
    /// Useful for checking what context the assistant would see for a
    /// given question. Requires `OPENAI_API_KEY`.
    Search {
        /// The query string.
        query: String,

        /// Maximum number of chunks to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the chat HTTP API.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// session, chat, and admin endpoints.
    Serve,

    /// Delete chat sessions older than the retention window.
    ///
    /// Messages are removed with their sessions. Run this from cron to
    /// keep the database clean.
    Cleanup {
        /// Sessions older than this many days are deleted.
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dir, clear } => {
            let pool = db::connect(&cfg).await?;
            let store = ChunkStore::new(pool.clone(), cfg.openai.embedding_dims);
            let client = OpenAiClient::new(cfg.openai.clone())?;

            let summary =
                ingest::ingest_directory(&store, &client, &dir, &cfg.chunking, clear).await?;

            println!(
                "Ingested {} chunks from {} files",
                summary.chunks, summary.files
            );
            pool.close().await;
        }
        Commands::Search { query, limit } => {
            let pool = db::connect(&cfg).await?;
            let store = ChunkStore::new(pool.clone(), cfg.openai.embedding_dims);
            let client = Arc::new(OpenAiClient::new(cfg.openai.clone())?);
            let retrieval = RetrievalService::new(store, client);

            let k = limit.unwrap_or(cfg.retrieval.top_k);
            let results = retrieval.search(&query, k).await?;

            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    let source = result.source.as_deref().unwrap_or("(unlabeled)");
                    println!("{}. [{:.3}] {}", i + 1, result.similarity, source);
                    println!("    {}", result.content.replace('\n', " ").trim());
                    println!();
                }
            }
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Cleanup { days } => {
            let pool = db::connect(&cfg).await?;
            let sessions = SessionStore::new(pool.clone());
            let deleted = sessions.cleanup_older_than(days).await?;
            println!("Deleted {} sessions older than {} days", deleted, days);
            pool.close().await;
        }
    }

    Ok(())
}
