use clap::Parser;
use std::path::PathBuf;

/// Command-line interface for the agent team usage tracker.
#[derive(Debug, Parser)]
#[command(author, version, about = "Live token and cost tracker for agent teams", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file (defaults to ./team-usage.toml if present).
    #[arg(long, value_name = "FILE")]
    pub config_path: Option<PathBuf>,
    /// JSON-Lines file the agent runtime writes usage events to.
    #[arg(long, value_name = "FILE")]
    pub events: Option<PathBuf>,
    /// Replay the event file once, print a plain-text summary and exit.
    #[arg(long, conflicts_with = "compact")]
    pub summary: bool,
    /// Replay the event file once, print the one-line team total and exit.
    #[arg(long)]
    pub compact: bool,
}
