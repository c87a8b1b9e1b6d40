//! # docchat CLI
//!
//! Chat with your documents: upload PDFs, text, or Markdown files, then ask
//! questions answered from their content with a short conversation memory.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat serve` | Start the HTTP API |
//! | `docchat ask <files>... -q "<question>"` | Ingest files and answer one question |
//! | `docchat chunk <files>...` | Decode and chunk files without embedding them |
//!
//! ## Examples
//!
//! ```bash
//! # Serve on the configured bind address
//! docchat serve
//!
//! # One-shot question over two files
//! docchat ask notes.md paper.pdf --question "What is the main result?"
//!
//! # Check how files will be split
//! docchat chunk paper.pdf
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use docchat::chunk::split_text;
use docchat::config::{self, Config};
use docchat::extract::decode_file;
use docchat::models::UploadedFile;
use docchat::pipeline::RagPipeline;
use docchat::server;

const DEFAULT_CONFIG: &str = "./config/docchat.toml";

/// docchat: retrieval-augmented chat over uploaded documents.
#[derive(Parser)]
#[command(name = "docchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docchat.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of `[logging].level`.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Ingest files and answer a single question.
    Ask {
        /// Files to ingest (PDF, text, Markdown, or anything UTF-8-ish).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// The question to answer.
        #[arg(long, short)]
        question: String,

        /// Answer without conversation history.
        #[arg(long)]
        no_memory: bool,
    },

    /// Dry run: decode and chunk files, printing chunk counts.
    Chunk {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn read_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadedFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(UploadedFile::new(filename, bytes));
    }
    Ok(files)
}

async fn run_ask(
    cfg: Config,
    paths: &[PathBuf],
    question: &str,
    no_memory: bool,
) -> anyhow::Result<()> {
    let pipeline = RagPipeline::from_config(cfg)?;
    let files = read_uploads(paths).await?;

    let report = pipeline.ingest(files).await?;
    for err in &report.errors {
        eprintln!("{}", err);
    }

    let answer = if no_memory {
        pipeline.query_without_memory(question).await?
    } else {
        pipeline.query(question).await?
    };

    println!("{}", answer.response);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources: {}", answer.sources.join(", "));
    }
    if !answer.success {
        bail!("answer generation failed");
    }
    Ok(())
}

async fn run_chunk(cfg: &Config, paths: &[PathBuf]) -> anyhow::Result<()> {
    let files = read_uploads(paths).await?;
    let mut total = 0usize;
    for file in &files {
        match decode_file(file) {
            Ok(docs) => {
                let mut count = 0usize;
                for doc in &docs {
                    count += split_text(
                        &doc.source,
                        &doc.text,
                        cfg.chunking.chunk_size,
                        cfg.chunking.chunk_overlap,
                    )?
                    .len();
                }
                println!("{}: {} chunks", file.filename, count);
                total += count;
            }
            Err(e) => println!("{}: error: {}", file.filename, e),
        }
    }
    println!("Total: {} chunks", total);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load(cli.config.as_deref())?;

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        cfg.logging.max_level()?
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask {
            files,
            question,
            no_memory,
        } => {
            run_ask(cfg, &files, &question, no_memory).await?;
        }
        Commands::Chunk { files } => {
            run_chunk(&cfg, &files).await?;
        }
    }

    Ok(())
}
