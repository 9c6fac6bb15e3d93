//! # RAG Harness CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and run schema migrations |
//! | `rag stage <project> <paths>...` | Copy local files into the temp storage area |
//! | `rag ingest <project>` | Ingest staged (or named) documents |
//! | `rag query <project> "<question>"` | Answer a question from ingested documents |
//! | `rag history <session>` | Show or clear a session's chat log |
//! | `rag status <document_id>` | Show one document's metadata |
//! | `rag summary <project>` | Per-project document statistics |
//! | `rag delete <document_id>` | Remove a document's metadata and vectors |
//!
//! Logging is controlled by `RUST_LOG` and written to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rag_harness::app::App;
use rag_harness::commands::{self, IngestArgs};
use rag_harness::config;
use rag_harness::rag::QueryRequest;

/// RAG Harness CLI: deduplicating ingestion and retrieval-augmented queries.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "rag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Copy local files or directories into the project's temp area.
    ///
    /// Directory contents keep their relative paths, which become the
    /// document locations used by `ingest`.
    Stage {
        project: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ingest documents for a project.
    ///
    /// With no `--file`, every object staged under the project's temp
    /// prefix is ingested.
    Ingest {
        project: String,

        #[arg(long, default_value = "cli")]
        user: String,

        #[arg(long)]
        session: Option<String>,

        /// Document location relative to the project's temp prefix. Repeatable.
        #[arg(long = "file")]
        files: Vec<String>,

        #[arg(long)]
        ingest_source: Option<String>,

        #[arg(long)]
        source_path: Option<String>,

        /// Print the full batch result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask a question against a project's documents.
    Query {
        project: String,
        query: String,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Chat session; history from earlier turns shapes the query.
        #[arg(long)]
        session: Option<String>,

        /// Number of sources to keep (overrides `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Show or clear the chat log of a session.
    History {
        session: String,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Delete every message in the session.
        #[arg(long)]
        clear: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show a document's metadata and vector count.
    Status {
        document_id: String,

        /// Embedding model variant to show.
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Document counts, size and status breakdown for a project.
    Summary {
        project: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete a document's metadata rows and vectors.
    Delete { document_id: String },
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
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        return commands::run_init(&cfg).await;
    }

    let app = App::from_config(&cfg).await?;

    match cli.command {
        // Runs before the backends are built.
        Commands::Init => {}
        Commands::Stage { project, paths } => {
            commands::run_stage(&app, &project, &paths).await?;
        }
        Commands::Ingest {
            project,
            user,
            session,
            files,
            ingest_source,
            source_path,
            json,
        } => {
            let session = session.unwrap_or_else(|| commands::cli_session(&project, &user));
            let args = IngestArgs {
                project,
                user,
                session,
                files,
                ingest_source,
                source_path,
            };
            commands::run_ingest(&app, args, json).await?;
        }
        Commands::Query {
            project,
            query,
            user,
            session,
            top_k,
            json,
        } => {
            let session_id = session.unwrap_or_else(|| commands::cli_session(&project, &user));
            let request = QueryRequest {
                query,
                project_name: project,
                user_id: user,
                session_id,
                top_k,
            };
            commands::run_query(&app, request, json).await?;
        }
        Commands::History {
            session,
            limit,
            clear,
            json,
        } => {
            commands::run_history(&app, &session, limit, clear, json).await?;
        }
        Commands::Status {
            document_id,
            model,
            json,
        } => {
            commands::run_status(&app, &document_id, model.as_deref(), json).await?;
        }
        Commands::Summary { project, json } => {
            commands::run_summary(&app, &project, json).await?;
        }
        Commands::Delete { document_id } => {
            commands::run_delete(&app, &document_id).await?;
        }
    }

    Ok(())
}
