//! Session event journal written as JSON lines.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reconcile::ActiveView;
use crate::results::ResultKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Health,
    Scrape,
    Compare,
    Forecast,
    Plan,
    Execute,
    Report,
}

/// One handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub action: SessionAction,
    pub ok: bool,
    /// Plan length for plan/execute actions.
    pub step_count: Option<usize>,
    #[serde(default)]
    pub matched: Vec<ResultKind>,
    pub active_view: ActiveView,
    pub error: Option<String>,
}

impl SessionEvent {
    pub fn new(session_id: Uuid, action: SessionAction, active_view: ActiveView) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            action,
            ok: true,
            step_count: None,
            matched: Vec::new(),
            active_view,
            error: None,
        }
    }

    pub fn steps(mut self, count: usize) -> Self {
        self.step_count = Some(count);
        self
    }

    pub fn matched(mut self, kinds: Vec<ResultKind>) -> Self {
        self.matched = kinds;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.ok = false;
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("journal channel closed")]
    Closed,
    #[error("journal worker failed: {0}")]
    Join(String),
}

pub trait JournalSink: Send + Sync {
    fn record(&self, event: SessionEvent) -> Result<(), JournalError>;
}

#[derive(Clone)]
pub struct JsonlJournalSink {
    sender: mpsc::Sender<SessionEvent>,
}

pub struct JournalWorker {
    handle: Option<std::thread::JoinHandle<Result<(), JournalError>>>,
}

impl JournalWorker {
    /// Wait for every queued event to be written. All sink clones must be
    /// dropped first.
    pub fn join(mut self) -> Result<(), JournalError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(JournalError::Join("journal worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlJournalSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, JournalWorker), JournalError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (sender, receiver) = mpsc::channel::<SessionEvent>();
        let handle = std::thread::spawn(move || write_journal_loop(file, receiver));
        Ok((
            Self { sender },
            JournalWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl JournalSink for JsonlJournalSink {
    fn record(&self, event: SessionEvent) -> Result<(), JournalError> {
        self.sender.send(event).map_err(|_| JournalError::Closed)
    }
}

fn write_journal_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<SessionEvent>,
) -> Result<(), JournalError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line =
            serde_json::to_string(&event).map_err(|e| JournalError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}
