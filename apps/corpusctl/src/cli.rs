use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase verbosity. Can be used multiple times (e.g., -v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use this configuration file instead of the platform default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List catalog shards, smallest first
    Catalog {
        /// 只显示这些语料（可重复）
        #[arg(long = "corpus")]
        corpora: Vec<u32>,
        /// 只显示这些语言的分片（可重复）
        #[arg(long = "language")]
        languages: Vec<String>,
    },
    /// List persisted runs with their progress
    Runs {
        /// Only runs whose job id or shard names contain this text
        #[arg(long)]
        filter: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one persisted run
    Show {
        job: Uuid,
        /// Print the raw persisted record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every persisted run
    ClearRuns,
    /// Print the effective configuration
    Config,
}
