use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorRecord;
use crate::types::*;

/// Session events: the append-only audit trail of one state machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    SessionStarted {
        session_id: Uuid,
    },
    AvailabilityProbed {
        availability: EngineAvailability,
    },
    AssetStaged {
        role: AssetRole,
        origin: AssetOrigin,
        remote_path: String,
    },
    GarmentGenerated {
        remote_path: String,
        degraded: bool,
    },
    CategoryResolved {
        category: Category,
        source: String,
    },
    GenerationStarted {
        epoch: Epoch,
    },
    AttemptStarted {
        epoch: Epoch,
        engine: EngineKind,
    },
    AttemptFailed {
        epoch: Epoch,
        engine: EngineKind,
        error: ErrorRecord,
    },
    FallbackEngaged {
        epoch: Epoch,
    },
    Succeeded {
        epoch: Epoch,
        engine: EngineKind,
        result_ref: String,
    },
    Failed {
        epoch: Epoch,
        error: ErrorRecord,
    },
    StaleResponseDiscarded {
        epoch: Epoch,
        current_epoch: Epoch,
    },
    RunCancelled {
        epoch: Epoch,
    },
    Reset {
        previous_session: Uuid,
        new_session: Uuid,
    },
    StyleCleared {
        session_id: Uuid,
    },
    RetryRequested {
        epoch: Epoch,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: SessionEvent,
}

#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<RecordedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: SessionEvent) -> u64 {
        let seq = self.events.len() as u64 + 1;
        self.events.push(RecordedEvent {
            seq,
            at: Utc::now(),
            event,
        });
        seq
    }

    /// Drop everything recorded so far and start over with `first`.
    /// Used on reset so a long-lived machine keeps one session's history.
    pub fn restart(&mut self, first: SessionEvent) -> u64 {
        self.events.clear();
        self.append(first)
    }

    pub fn all(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Fallback attempts started for `epoch`. Never more than one.
    pub fn fallback_attempts(&self, epoch: Epoch) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e.event,
                    SessionEvent::AttemptStarted {
                        epoch: ep,
                        engine: EngineKind::Fallback,
                    } if ep == epoch
                )
            })
            .count()
    }
}
