//! Durable queue of confirmed events the index has not mirrored yet.
//!
//! Saved as pretty JSON after every change so a restart picks up where the
//! last process stopped.

use crate::events::LedgerEvent;
use deadhand_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub id: u64,
    pub event: LedgerEvent,
    /// Store attempts made so far, across replays
    pub attempts: u32,
    pub last_error: String,
    pub queued_at: Timestamp,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OutboxState {
    next_id: u64,
    events: Vec<QueuedEvent>,
}

pub struct Outbox {
    /// `None` keeps the queue in memory only
    path: Option<PathBuf>,
    state: Mutex<OutboxState>,
}

impl Outbox {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(OutboxState::default()),
        }
    }

    /// Load the outbox from `path`, or start empty if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OutboxError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            OutboxState::default()
        };
        if !state.events.is_empty() {
            log::warn!(
                "Outbox {} holds {} unmirrored event(s)",
                path.display(),
                state.events.len()
            );
        }
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self, state: &OutboxState) -> Result<(), OutboxError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(state)?;
        // Write-then-rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Queue an event. Returns its id.
    pub fn push(
        &self,
        event: LedgerEvent,
        attempts: u32,
        last_error: String,
        queued_at: Timestamp,
    ) -> Result<u64, OutboxError> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.events.push(QueuedEvent {
            id,
            event,
            attempts,
            last_error,
            queued_at,
        });
        if let Err(e) = self.save(&state) {
            state.events.retain(|q| q.id != id);
            return Err(e);
        }
        Ok(id)
    }

    /// Queued events, oldest first.
    pub fn pending(&self) -> Vec<QueuedEvent> {
        self.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop an event that has been mirrored or can never be.
    pub fn complete(&self, id: u64) -> Result<(), OutboxError> {
        let mut state = self.lock();
        state.events.retain(|q| q.id != id);
        self.save(&state)
    }

    /// Record another failed replay of an event.
    pub fn record_failure(&self, id: u64, attempts: u32, error: String) -> Result<(), OutboxError> {
        let mut state = self.lock();
        if let Some(queued) = state.events.iter_mut().find(|q| q.id == id) {
            queued.attempts += attempts;
            queued.last_error = error;
        }
        self.save(&state)
    }
}
