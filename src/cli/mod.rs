//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "exemplar",
    version,
    author = "neur0map",
    about = "Build and query a retrieval index of coding examples",
    long_about = "Exemplar ingests instruction/response coding corpora, embeds them into a vector \
                  index, and retrieves the most relevant examples for a requirement so they can be \
                  injected into code generation."
)]
pub struct Cli {
    /// Config file path (defaults to $RAG_CONFIG_PATH or ~/.config/exemplar/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest the enabled corpora and build the index
    Build {
        /// Stop after this many chunks
        #[arg(short, long)]
        max_chunks: Option<usize>,

        /// Read corpora from a local directory of <name>/<split>.jsonl files
        /// instead of the Hugging Face hub
        #[arg(short, long, value_name = "DIR")]
        source: Option<PathBuf>,

        /// Build in memory without writing index files
        #[arg(long)]
        no_save: bool,

        /// HTTP timeout for hub requests, in seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// Retrieve the examples most relevant to a query
    Query {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum similarity score
        #[arg(long)]
        min_score: Option<f32>,

        /// Print the formatted context block instead of a result list
        #[arg(long, conflicts_with = "json")]
        context: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show index availability and statistics
    Stats {
        /// Show statistics in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration, after environment overrides
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
