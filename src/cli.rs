use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::ChunkerConfig;

#[derive(Parser, Debug)]
#[command(
    name = "paperchunk",
    version,
    about = "Chunking and metadata enrichment for biomedical papers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Chunk(ChunkArgs),
    Ingest(IngestArgs),
    Query(QueryArgs),
    Status(StatusArgs),
}

/// Chunker settings shared by `chunk` and `ingest`. Flags override the
/// config file, which overrides the defaults.
#[derive(Args, Debug, Clone)]
pub struct ChunkerArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    #[arg(long = "separator")]
    pub separators: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub no_keep_separator: bool,
}

impl ChunkerArgs {
    pub fn resolve(&self) -> Result<ChunkerConfig> {
        let mut config = match &self.config {
            Some(path) => ChunkerConfig::load(path)?,
            None => ChunkerConfig::default(),
        };

        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(chunk_overlap) = self.chunk_overlap {
            config.chunk_overlap = chunk_overlap;
        }
        if !self.separators.is_empty() {
            config.separators = self.separators.iter().map(|value| unescape(value)).collect();
        }
        if self.no_keep_separator {
            config.keep_separator = false;
        }

        Ok(config)
    }
}

/// Lets `--separator '\n\n'` be typed on a shell without literal newlines.
fn unescape(value: &str) -> String {
    value.replace("\\n", "\n").replace("\\t", "\t")
}

#[derive(Args, Debug, Clone)]
pub struct ChunkArgs {
    #[arg(long, required_unless_present = "stdin", conflicts_with = "stdin")]
    pub input: Option<PathBuf>,

    /// Reads plain text from stdin; form feeds separate pages.
    #[arg(long, default_value_t = false)]
    pub stdin: bool,

    #[command(flatten)]
    pub chunker: ChunkerArgs,

    /// Writes JSON here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long = "input", required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(long, default_value = ".cache/paperchunk/chunks.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value = crate::semantic::DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[command(flatten)]
    pub chunker: ChunkerArgs,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long)]
    pub query: String,

    #[arg(long, default_value = ".cache/paperchunk/chunks.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value = crate::semantic::DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/paperchunk/chunks.sqlite")]
    pub db_path: PathBuf,
}
