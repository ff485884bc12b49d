//! Audit trail for judge calls that did not produce a usable verdict.

use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{mpsc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::judge::{CallStatus, JudgeCallOutcome};

/// One dropped or replaced judge call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp_ms: i64,
    /// "calibration" or "tournament".
    pub stage: String,
    pub match_id: String,
    pub judge: String,
    pub outcome: CallStatus,
    pub attempts: u32,
    /// Judge brought in after this one timed out or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    pub prompt_hash: String,
}

impl AuditEvent {
    pub fn from_outcome(
        stage: &str,
        match_id: &str,
        judge: &str,
        outcome: &JudgeCallOutcome,
    ) -> Self {
        Self {
            timestamp_ms: now_epoch_ms(),
            stage: stage.to_string(),
            match_id: match_id.to_string(),
            judge: judge.to_string(),
            outcome: outcome.status,
            attempts: outcome.attempts,
            replaced_by: None,
            error: outcome.error.clone(),
            raw_response: outcome.raw_response.clone(),
            prompt_hash: outcome.prompt_hash.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("audit channel closed")]
    Closed,
    #[error("audit worker failed: {0}")]
    Join(String),
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), TraceError>;
}

/// Writes events as JSON lines from a background thread.
#[derive(Clone)]
pub struct JsonlAuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

pub struct AuditWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl AuditWorker {
    /// Wait for the writer to drain. Drop every sink clone first.
    pub fn join(mut self) -> Result<(), TraceError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("audit worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, AuditWorker), TraceError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (sender, receiver) = mpsc::channel::<AuditEvent>();
        let handle = std::thread::spawn(move || write_audit_loop(file, receiver));
        Ok((
            Self { sender },
            AuditWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_audit_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<AuditEvent>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Keeps events in memory; used by tests and by runs without an audit file.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), TraceError> {
        self.events
            .lock()
            .map_err(|_| TraceError::Closed)?
            .push(event);
        Ok(())
    }
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
