//! # docq CLI
//!
//! The `docq` binary runs the document-QA backend. It provides commands
//! for database initialization, serving the HTTP API, and re-running
//! ingestion for a single document from the command line.
//!
//! ## Usage
//!
//! ```bash
//! docq --config ./config/docq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docq init` | Create the SQLite database and run schema migrations |
//! | `docq serve` | Start the HTTP API server |
//! | `docq ingest <document-id>` | Run ingestion for one uploaded document |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docq::models::DocumentStatus;
use docq::{config, db, migrate, server, store};

/// docq — a document question-answering backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docq.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docq",
    about = "docq — a document question-answering backend: PDF ingestion, chunking, and embeddings",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (users,
    /// documents, document_chunks). Idempotent — running it multiple
    /// times is safe.
    Init,

    /// Start the HTTP API server.
    ///
    /// Binds to `[server].bind` and serves the upload/ingest API until
    /// the process is terminated.
    Serve,

    /// Run ingestion for one uploaded document and report the outcome.
    ///
    /// The document must be in the `uploaded` state, exactly as for the
    /// HTTP trigger; the run executes inline rather than in the
    /// background.
    Ingest {
        /// Document id (UUID) to ingest.
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docq=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("database initialized at {}", config.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&config).await?;
        }
        Commands::Ingest { document_id } => {
            run_ingest_once(&config, &document_id).await?;
        }
    }

    Ok(())
}

async fn run_ingest_once(config: &config::Config, document_id: &str) -> Result<()> {
    let state = server::build_state(config).await?;

    let doc = store::get_document(&state.pool, document_id)
        .await?
        .with_context(|| format!("document not found: {}", document_id))?;

    let started = store::transition(
        &state.pool,
        &doc.id,
        DocumentStatus::Uploaded,
        DocumentStatus::Processing,
    )
    .await?;
    if !started {
        anyhow::bail!(
            "document is not ready for ingestion (status: {})",
            doc.status.as_str()
        );
    }

    state.ingestor.run(document_id).await;

    let doc = store::get_document(&state.pool, document_id)
        .await?
        .context("document disappeared during ingestion")?;

    println!("ingest {}", document_id);
    println!("  status: {}", doc.status.as_str());
    if let Some(pages) = doc.page_count {
        println!("  pages: {}", pages);
    }
    match doc.status {
        DocumentStatus::Ready => {
            println!("ok");
            Ok(())
        }
        _ => {
            anyhow::bail!(
                "ingestion failed: {}",
                doc.error_message.as_deref().unwrap_or("unknown error")
            )
        }
    }
}
