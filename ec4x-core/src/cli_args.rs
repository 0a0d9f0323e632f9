use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Clone, Parser)]
#[command(name = "ec4xd", version, about = "EC4X turn-based game daemon", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// runs the daemon
    Start {
        #[arg(long, env("EC4X_DATA_DIR"))]
        data_dir: Option<PathBuf>,
        /// tick interval in seconds
        #[arg(long)]
        poll_interval: Option<u64>,
        /// daemon configuration file (KDL)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// synchronously resolves one turn for one game
    Resolve {
        game_id: String,
        #[arg(long, env("EC4X_DATA_DIR"), default_value = "./ec4x-data")]
        data_dir: PathBuf,
        /// balance tables override (KDL)
        #[arg(long)]
        game_config: Option<PathBuf>,
    },
    /// lists managed games and their turn counters
    Status {
        #[arg(long, env("EC4X_DATA_DIR"), default_value = "./ec4x-data")]
        data_dir: PathBuf,
    },
    /// prints the daemon version
    Version,
}
