//! # Book Analyzer CLI (`bka`)
//!
//! Drives a remote book-analysis service from the terminal: upload a book
//! and see what analysis will cost, run the analysis while watching its
//! progress, then explore the knowledge graph and ask questions about it.
//!
//! ## Usage
//!
//! ```bash
//! bka --config ./config/bka.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bka health` | Check that the backend is reachable |
//! | `bka estimate <file>` | Upload a `.pdf`/`.txt` file and print the token and cost estimate |
//! | `bka analyze <file>` | Estimate, confirm, then start and track an analysis job |
//! | `bka books` | List analyzed books |
//! | `bka graph <book>` | Summarise a book's knowledge graph |
//! | `bka ask "<question>"` | Ask one question about a book |
//! | `bka chat` | Interactive question answering |
//!
//! The config file is optional; without it the backend is assumed at
//! `http://localhost:8000` and the API key is read from `OPENAI_API_KEY`.

use book_analyzer::config;
use book_analyzer::graph::GraphOptions;
use book_analyzer::progress::ProgressMode;
use book_analyzer::{chat, graph, jobs, library, logging, transport, upload};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Book Analyzer CLI: upload books, track analysis, explore knowledge
/// graphs and chat with the results.
#[derive(Parser)]
#[command(
    name = "bka",
    about = "Book Analyzer: cost estimates, analysis jobs, knowledge graphs and grounded chat for your books",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/bka.toml`. A missing file means built-in
    /// defaults.
    #[arg(long, global = true, default_value = "./config/bka.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the backend is reachable.
    Health,

    /// Upload a file and print its token and cost estimate.
    ///
    /// Only `.pdf` and `.txt` files are accepted.
    Estimate {
        /// Path to the book file.
        file: PathBuf,
    },

    /// Upload a file, confirm the estimate, then run and track analysis.
    ///
    /// Ctrl-C stops tracking; the backend job is not cancelled.
    Analyze {
        /// Path to the book file.
        file: PathBuf,

        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// List analyzed books.
    Books {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Summarise a book's knowledge graph.
    Graph {
        /// Book id (see `bka books`).
        book: String,

        /// Only show nodes whose weight is strictly greater than this.
        #[arg(long)]
        min_weight: Option<f64>,

        /// Number of top-weighted nodes to list (default: graph.top_k).
        #[arg(long)]
        top: Option<usize>,

        /// Show one node and its neighbours.
        #[arg(long)]
        node: Option<String>,

        /// Print the visible nodes and links as JSON.
        #[arg(long)]
        json: bool,

        /// Read threshold changes and view commands from stdin.
        #[arg(long, short = 'i')]
        interactive: bool,
    },

    /// Ask one question about a book.
    Ask {
        /// The question.
        question: String,

        /// Book id; defaults to the first listed book.
        #[arg(long)]
        book: Option<String>,
    },

    /// Interactive question answering on stdin.
    Chat {
        /// Book to start with; defaults to the first listed book.
        #[arg(long)]
        book: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Health => {
            transport::run_health(&cfg).await?;
        }
        Commands::Estimate { file } => {
            upload::run_estimate(&cfg, &file).await?;
        }
        Commands::Analyze {
            file,
            yes,
            progress,
        } => {
            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(raw) => ProgressMode::parse(raw).ok_or_else(|| {
                    anyhow::anyhow!("invalid --progress '{}': expected off, human or json", raw)
                })?,
            };
            jobs::run_analyze(&cfg, &file, yes, mode).await?;
        }
        Commands::Books { json } => {
            library::run_books(&cfg, json).await?;
        }
        Commands::Graph {
            book,
            min_weight,
            top,
            node,
            json,
            interactive,
        } => {
            let opts = GraphOptions {
                min_weight,
                top,
                node,
                json,
                interactive,
            };
            graph::run_graph(&cfg, &book, opts).await?;
        }
        Commands::Ask { question, book } => {
            chat::run_ask(&cfg, &question, book.as_deref()).await?;
        }
        Commands::Chat { book } => {
            chat::run_chat(&cfg, book.as_deref()).await?;
        }
    }

    Ok(())
}
