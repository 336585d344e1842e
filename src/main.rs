mod app;
mod cli;
mod config;
mod ingest;
mod ledger;
mod report;
mod tui;
mod usage;

use anyhow::Result;
use clap::Parser;
use std::{fs::OpenOptions, sync::Mutex};
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "team-usage.log";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = cli::Cli::parse();
    let mut config = config::AppConfig::load(cli.config_path.as_deref())?;
    if let Some(events) = cli.events {
        config.events.path = events;
    }

    let app = app::App::new(config);
    if cli.summary {
        print!("{}", app.summary()?);
        return Ok(());
    }
    if cli.compact {
        println!("{}", app.compact_summary()?);
        return Ok(());
    }
    app.run().await
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Keep the TUI clean: write all tracing output to a file instead of the terminal.
    let file = match OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open {LOG_FILE} for tracing output: {err}");
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
}
