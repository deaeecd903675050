//! # docqa CLI
//!
//! Ask questions about an admin-curated set of documents.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa ingest <files>... --secret <s>` | Replace the knowledge with the given documents |
//! | `docqa ask "<question>"` | Ask a single question |
//! | `docqa chat` | Interactive question/answer session |
//! | `docqa status` | Show the size and sources of the current knowledge |
//! | `docqa serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! export OPENROUTER_API_KEY=...
//! export DOCQA_ADMIN_SECRET=...
//! docqa ingest handbook.pdf faq.docx --secret "$DOCQA_ADMIN_SECRET"
//! docqa ask "How many vacation days do new hires get?"
//! docqa serve --config ./config/docqa.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docqa::admin::AdminSession;
use docqa::app::App;
use docqa::chat::{read_documents, run_chat};
use docqa::config::{self, Config};
use docqa::server;

const DEFAULT_CONFIG_PATH: &str = "./config/docqa.toml";

/// docqa: answer questions strictly from uploaded documents.
///
/// The completion API key is read from the environment variable named by
/// `completion.api_key_env` (default `OPENROUTER_API_KEY`); the process
/// refuses to start without it. A `.env` file in the working directory is
/// loaded first.
#[derive(Parser)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docqa.toml` when that file exists, otherwise
    /// built-in defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the knowledge with the text of one or more documents.
    ///
    /// Documents are concatenated in the order given and truncated to
    /// `store.character_limit` characters.
    Ingest {
        /// Document paths (PDF, DOCX, PPTX, TXT, MD).
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Admin secret.
        #[arg(long)]
        secret: String,
    },

    /// Ask one question and print the answer.
    Ask {
        /// The question text.
        question: String,
    },

    /// Start an interactive question/answer session on stdin/stdout.
    Chat,

    /// Show the size and provenance of the current knowledge.
    Status,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            config::load_config(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => {
            let cfg = Config::default();
            config::validate(&cfg)?;
            Ok(cfg)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;
    let app = App::from_config(cfg).await?;

    match cli.command {
        Commands::Ingest { paths, secret } => {
            let mut session = AdminSession::new();
            if !app.gate.authorize_mutation(&mut session, Some(&secret)) {
                bail!("admin secret does not match");
            }
            let documents = read_documents(&paths)?;
            let knowledge = app.store.ingest(&documents).await?;
            info!(documents = documents.len(), "ingest complete");
            println!(
                "Ingested {} document(s): {} characters stored (limit {}).",
                documents.len(),
                knowledge.char_len(),
                knowledge.character_limit
            );
        }
        Commands::Ask { question } => {
            let question = question.trim();
            if question.is_empty() {
                return Ok(());
            }
            match app.ask(question).await {
                Ok(answer) => println!("{}", answer.text),
                Err(e) => {
                    eprintln!("{}", e.user_message());
                    std::process::exit(2);
                }
            }
        }
        Commands::Chat => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            run_chat(&app, stdin, &mut stdout).await?;
        }
        Commands::Status => {
            let knowledge = app.store.snapshot();
            println!("characters:  {}", knowledge.char_len());
            println!("limit:       {}", knowledge.character_limit);
            println!(
                "updated:     {}",
                knowledge
                    .updated_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!("documents:   {}", knowledge.source_document_names.len());
            for name in &knowledge.source_document_names {
                println!("  {}", name);
            }
        }
        Commands::Serve => {
            server::run_server(Arc::new(app)).await?;
        }
    }

    Ok(())
}
