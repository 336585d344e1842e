use crate::{
    config::AppConfig,
    usage::{LedgerSnapshot, RuntimeEvent, UsageEventSender, event::SessionTitleEvent},
};
use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle, time};

const TOKEN_USAGE_TYPE: &str = "token_usage";
const SESSION_TITLE_TYPE: &str = "session_title";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid usage event JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

enum EventKind {
    TokenUsage,
    SessionTitle,
}

/// Decodes one line of the event stream. Blank lines, `null` and events of other types
/// decode to `None`. Objects without a `type` are usage reports.
pub fn decode_line(line: &str) -> Result<Option<RuntimeEvent>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)?;
    let kind = match &value {
        Value::Null => return Ok(None),
        Value::Object(map) => match map.get("type").and_then(Value::as_str) {
            None | Some(TOKEN_USAGE_TYPE) => EventKind::TokenUsage,
            Some(SESSION_TITLE_TYPE) => EventKind::SessionTitle,
            Some(_) => return Ok(None),
        },
        Value::Bool(_) => return Err(DecodeError::NotAnObject("a boolean")),
        Value::Number(_) => return Err(DecodeError::NotAnObject("a number")),
        Value::String(_) => return Err(DecodeError::NotAnObject("a string")),
        Value::Array(_) => return Err(DecodeError::NotAnObject("an array")),
    };

    let event = match kind {
        EventKind::TokenUsage => RuntimeEvent::TokenUsage(serde_json::from_value(value)?),
        EventKind::SessionTitle => {
            let title: SessionTitleEvent = serde_json::from_value(value)?;
            RuntimeEvent::SessionTitle(title.title)
        }
    };
    Ok(Some(event))
}

pub struct IngestHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<Result<()>>,
}

impl IngestHandle {
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!(err)),
        }
    }
}

/// Tails the configured event file and forwards every decoded event to the aggregator.
pub fn spawn(config: Arc<AppConfig>, usage_tx: UsageEventSender) -> IngestHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let poll_interval = Duration::from_millis(config.events.poll_interval_ms.max(10));
    let mut tailer = EventTailer::new(config.events.path.clone());

    let join = tokio::spawn(async move {
        let mut ticker = time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for event in tailer.poll() {
                        if usage_tx.send(event).await.is_err() {
                            tracing::debug!("usage aggregator closed; stopping event ingest");
                            return Ok(());
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    break;
                }
            }
        }
        Ok(())
    });

    IngestHandle {
        shutdown: Some(shutdown_tx),
        join,
    }
}

/// Reads a whole event file into a fresh snapshot. A final line without a trailing
/// newline is included.
pub fn replay_file(path: &Path) -> Result<LedgerSnapshot> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read event file {}", path.display()))?;

    let mut snapshot = LedgerSnapshot::default();
    for (idx, line) in contents.lines().enumerate() {
        match decode_line(line) {
            Ok(Some(event)) => snapshot.apply(&event),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), line = idx + 1, "skipping malformed usage event");
            }
        }
    }
    Ok(snapshot)
}

struct EventTailer {
    path: PathBuf,
    offset: u64,
    /// End offset of the unterminated tail seen on the previous poll.
    idle_tail: Option<u64>,
}

impl EventTailer {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            idle_tail: None,
        }
    }

    fn poll(&mut self) -> Vec<RuntimeEvent> {
        let len = match self.path.metadata() {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "event file not found yet");
                return Vec::new();
            }
            Err(err) => {
                tracing::warn!(error = %err, path = %self.path.display(), "failed to stat event file");
                return Vec::new();
            }
        };

        if len == self.offset {
            self.idle_tail = None;
            return Vec::new();
        }

        if len < self.offset {
            // Re-reporting is last-write-wins, so replaying a rewritten file is safe.
            tracing::warn!(path = %self.path.display(), "event file shrank; reading from the start");
            self.offset = 0;
            self.idle_tail = None;
        }

        let chunk = match read_new_lines(&self.path, self.offset) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(error = %err, path = %self.path.display(), "failed to read event file");
                return Vec::new();
            }
        };
        self.offset = chunk.offset;

        let mut events = Vec::with_capacity(chunk.lines.len() + 1);
        for line in &chunk.lines {
            match decode_line(line) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, path = %self.path.display(), "skipping malformed usage event");
                }
            }
        }

        if chunk.partial.trim().is_empty() {
            self.idle_tail = None;
        } else if self.idle_tail == Some(chunk.end) {
            // The writer left an unterminated line alone for a whole poll. Take it
            // once it decodes; a newline appended later reads as a blank line.
            if let Ok(event) = decode_line(&chunk.partial) {
                tracing::debug!(path = %self.path.display(), "consuming unterminated final line");
                events.extend(event);
                self.offset = chunk.end;
                self.idle_tail = None;
            }
        } else {
            self.idle_tail = Some(chunk.end);
        }
        events
    }
}

struct LineChunk {
    /// Complete lines after the starting offset.
    lines: Vec<String>,
    /// Offset just past the last newline.
    offset: u64,
    /// Bytes after the last newline, not yet terminated.
    partial: String,
    /// Offset of the end of the data read.
    end: u64,
}

fn read_new_lines(path: &Path, offset: u64) -> Result<LineChunk> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open event file {}", path.display()))?;
    file.seek(SeekFrom::Start(offset))
        .with_context(|| "failed to seek event file")?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| "failed to read event file")?;
    let end = offset + buf.len() as u64;

    let split = buf
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |last_newline| last_newline + 1);

    let text = String::from_utf8_lossy(&buf[..split]);
    let lines = text.split_terminator('\n').map(str::to_string).collect();
    Ok(LineChunk {
        lines,
        offset: offset + split as u64,
        partial: String::from_utf8_lossy(&buf[split..]).into_owned(),
        end,
    })
}
