//! Change tracking for delta responses.

use std::collections::VecDeque;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use odata_model::{KeyValues, Row};
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Updated,
    Deleted,
}

/// One committed mutation. `data` is absent for deletions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub entity_set: String,
    pub key: KeyValues,
    pub data: Option<Row>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("unknown or malformed delta token")]
    InvalidToken,
}

/// Source of delta tokens and the changes between them.
pub trait ChangeTracker: Send + Sync {
    /// Token denoting "now" for `entity_set`.
    fn current_token(&self, entity_set: &str) -> String;

    /// Events recorded for the token's entity set after the token was issued, oldest first.
    ///
    /// # Errors
    /// `TrackerError::InvalidToken` when the token was not issued by this tracker.
    fn changes_since(&self, token: &str) -> Result<Vec<ChangeEvent>, TrackerError>;

    /// # Errors
    /// `TrackerError::InvalidToken` when the token was not issued by this tracker.
    fn entity_set_from_token(&self, token: &str) -> Result<String, TrackerError>;

    fn record(&self, event: ChangeEvent);
}

/// Events a [`MemoryChangeTracker`] keeps unless told otherwise.
const DEFAULT_RETENTION: usize = 10_000;

#[derive(Default)]
struct Log {
    /// Sequence number of `events[0]`.
    start: usize,
    events: VecDeque<ChangeEvent>,
}

impl Log {
    fn end(&self) -> usize {
        self.start + self.events.len()
    }
}

/// Process-local tracker with sequence-number tokens.
///
/// Only the newest `retention` events are kept; a token older than the oldest
/// kept event is rejected, so the client has to start over with a full read.
pub struct MemoryChangeTracker {
    log: RwLock<Log>,
    retention: usize,
}

impl Default for MemoryChangeTracker {
    fn default() -> Self {
        Self {
            log: RwLock::new(Log::default()),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl MemoryChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_events` events (at least one).
    #[must_use]
    pub fn with_retention(mut self, max_events: usize) -> Self {
        self.retention = max_events.max(1);
        self
    }

    fn decode(&self, token: &str) -> Result<(String, usize), TrackerError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TrackerError::InvalidToken)?;
        let text = String::from_utf8(bytes).map_err(|_| TrackerError::InvalidToken)?;
        let (set, seq) = text.rsplit_once(':').ok_or(TrackerError::InvalidToken)?;
        let seq: usize = seq.parse().map_err(|_| TrackerError::InvalidToken)?;
        let log = self.log.read();
        if set.is_empty() || seq < log.start || seq > log.end() {
            return Err(TrackerError::InvalidToken);
        }
        Ok((set.to_owned(), seq))
    }
}

impl ChangeTracker for MemoryChangeTracker {
    fn current_token(&self, entity_set: &str) -> String {
        let seq = self.log.read().end();
        URL_SAFE_NO_PAD.encode(format!("{entity_set}:{seq}"))
    }

    fn changes_since(&self, token: &str) -> Result<Vec<ChangeEvent>, TrackerError> {
        let (set, seq) = self.decode(token)?;
        let log = self.log.read();
        if seq < log.start {
            return Err(TrackerError::InvalidToken);
        }
        Ok(log
            .events
            .iter()
            .skip(seq - log.start)
            .filter(|e| e.entity_set == set)
            .cloned()
            .collect())
    }

    fn entity_set_from_token(&self, token: &str) -> Result<String, TrackerError> {
        self.decode(token).map(|(set, _)| set)
    }

    fn record(&self, event: ChangeEvent) {
        let mut log = self.log.write();
        log.events.push_back(event);
        while log.events.len() > self.retention {
            log.events.pop_front();
            log.start += 1;
        }
    }
}
