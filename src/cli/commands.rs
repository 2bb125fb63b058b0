use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dbk", about = concat!("daybook v", env!("CARGO_PKG_VERSION"), " - optimistic task cache and day ordering"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (default: nearest daybook.toml)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sort a JSON task list into day/time order
    Order(OrderArgs),
    /// Replay a scripted session against an in-memory server
    Replay(ReplayArgs),
    /// Show writes the server rejected
    Recovery(RecoveryArgs),
}

#[derive(Args)]
pub struct OrderArgs {
    /// JSON file holding an array of tasks
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Session script (JSON)
    pub session: PathBuf,
    /// Log rolled-back writes to .recovery.log in this directory
    #[arg(long)]
    pub recovery_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct RecoveryArgs {
    /// Directory holding .recovery.log (default: [recovery] dir, then cwd)
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Maximum number of entries to show (default: 10)
    #[arg(long)]
    pub limit: Option<usize>,
    /// Remove entries older than 30 days instead of listing
    #[arg(long)]
    pub prune: bool,
}
