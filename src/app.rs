use crate::{
    config::AppConfig,
    ingest, report, tui,
    usage::{self, LedgerSnapshot},
};
use anyhow::Result;
use std::sync::Arc;

/// High-level application orchestrator.
pub struct App {
    config: Arc<AppConfig>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn run(self) -> Result<()> {
        let (aggregator_handle, usage_tx) =
            usage::spawn_aggregator(self.config.events.channel_capacity);
        let ingest_handle = ingest::spawn(self.config.clone(), usage_tx);

        tracing::info!(
            events = %self.config.events.path.display(),
            "Launching interactive TUI (requires an attached terminal)"
        );
        let tui_result = tui::run(self.config.clone(), aggregator_handle.subscribe()).await;

        ingest_handle.shutdown().await?;
        let last = aggregator_handle.shutdown().await;
        tracing::info!(
            events = last.events_recorded,
            root = last.ledger.root_agent_name().unwrap_or_default(),
            title = last.session_title(),
            sessions = last.ledger.session_count(),
            "usage tracker stopped"
        );
        tui_result
    }

    /// Replays the configured event file into a fresh ledger and renders it as text.
    pub fn summary(&self) -> Result<String> {
        Ok(report::render_summary(&self.replay()?))
    }

    /// Replays the configured event file and renders the one-line team total.
    pub fn compact_summary(&self) -> Result<String> {
        let snapshot = self.replay()?;
        Ok(report::render_compact(&snapshot.ledger.render_totals()))
    }

    fn replay(&self) -> Result<LedgerSnapshot> {
        let snapshot = ingest::replay_file(&self.config.events.path)?;
        tracing::info!(
            events = snapshot.events_recorded,
            path = %self.config.events.path.display(),
            "replayed usage events"
        );
        Ok(snapshot)
    }
}
