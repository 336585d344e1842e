use crate::ledger::UsageLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

pub mod event;

pub use event::{AgentContext, RuntimeEvent, TokenUsageEvent};

/// Shown until the runtime reports a session title.
pub const DEFAULT_SESSION_TITLE: &str = "New session";

/// Token, context-window and cost counters for one reporting instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    #[serde(default, alias = "input_tokens")]
    pub input_tokens: u64,
    #[serde(default, alias = "output_tokens")]
    pub output_tokens: u64,
    #[serde(default, alias = "context_length")]
    pub context_length: u64,
    #[serde(default, alias = "context_limit")]
    pub context_limit: u64,
    #[serde(default)]
    pub cost: f64,
}

impl UsageSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Negative or non-finite costs read as zero.
    pub fn sanitized(mut self) -> Self {
        if !self.cost.is_finite() || self.cost < 0.0 {
            self.cost = 0.0;
        }
        self
    }

    /// Folds another session's usage into a running total. The context limit is a
    /// ceiling, so the largest one observed wins.
    pub fn accumulate(&mut self, other: &UsageSnapshot) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.context_length = self.context_length.saturating_add(other.context_length);
        self.context_limit = self.context_limit.max(other.context_limit);
        self.cost += other.cost;
    }

    /// Debits a descendant's self usage from an inclusive figure.
    ///
    /// Token and cost counters clamp at zero. `context_length` is recomputed from the
    /// remaining input and output tokens rather than subtracted, and `context_limit`
    /// is left alone.
    pub fn debit(&mut self, delta: &UsageSnapshot) {
        self.input_tokens = self.input_tokens.saturating_sub(delta.input_tokens);
        self.output_tokens = self.output_tokens.saturating_sub(delta.output_tokens);
        self.context_length = self.total_tokens();
        self.cost = (self.cost - delta.cost).max(0.0);
    }
}

pub type UsageEventSender = mpsc::Sender<RuntimeEvent>;
pub type UsageEventReceiver = mpsc::Receiver<RuntimeEvent>;

/// Read-only copy of the ledger published after every applied event.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub ledger: UsageLedger,
    pub session_title: Option<String>,
    pub events_recorded: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LedgerSnapshot {
    /// Applies one runtime event. Both the live aggregator and one-shot replays go
    /// through here.
    pub fn apply(&mut self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::TokenUsage(usage) => self.ledger.record_event(usage),
            RuntimeEvent::SessionTitle(title) => {
                tracing::debug!(title = %title, "session title updated");
                self.session_title = Some(title.clone());
            }
        }
        self.events_recorded += 1;
    }

    pub fn session_title(&self) -> &str {
        self.session_title
            .as_deref()
            .filter(|title| !title.is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE)
    }
}

/// Spawns the task that exclusively owns the ledger. Events sent through the returned
/// sender are applied one at a time in arrival order.
pub fn spawn_aggregator(capacity: usize) -> (UsageAggregatorHandle, UsageEventSender) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (publisher, snapshots) = watch::channel(LedgerSnapshot::default());

    let join = tokio::spawn(async move {
        let aggregator = UsageAggregator::new(publisher);
        aggregator.run(rx).await;
    });

    (UsageAggregatorHandle { join, snapshots }, tx)
}

pub struct UsageAggregatorHandle {
    join: JoinHandle<()>,
    snapshots: watch::Receiver<LedgerSnapshot>,
}

impl UsageAggregatorHandle {
    pub fn subscribe(&self) -> watch::Receiver<LedgerSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until every sender is dropped and the queue is drained, then returns the
    /// final ledger state.
    pub async fn shutdown(self) -> LedgerSnapshot {
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "usage aggregator task failed");
        }
        self.snapshots.borrow().clone()
    }
}

struct UsageAggregator {
    state: LedgerSnapshot,
    publisher: watch::Sender<LedgerSnapshot>,
}

impl UsageAggregator {
    fn new(publisher: watch::Sender<LedgerSnapshot>) -> Self {
        Self {
            state: LedgerSnapshot::default(),
            publisher,
        }
    }

    async fn run(mut self, mut rx: UsageEventReceiver) {
        while let Some(event) = rx.recv().await {
            self.handle_event(&event);
        }
        tracing::debug!(
            events = self.state.events_recorded,
            "usage aggregator drained"
        );
    }

    fn handle_event(&mut self, event: &RuntimeEvent) {
        self.state.apply(event);
        self.state.updated_at = Some(Utc::now());
        self.publisher.send_replace(self.state.clone());
    }
}
