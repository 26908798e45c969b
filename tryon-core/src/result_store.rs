//! Terminal outcome holder for a session.
//!
//! Pure storage: one live result at a time, replaced by each new record. The
//! epoch check happens in the session before anything reaches the store.
//! Observers get a `watch` receiver so they can await the terminal state
//! without polling.

use serde::Serialize;
use tokio::sync::watch;

use crate::error::ErrorRecord;
use crate::types::{Epoch, InferenceResult, Step};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResultState {
    Empty,
    Succeeded { epoch: Epoch, result: InferenceResult },
    Failed { epoch: Epoch, error: ErrorRecord },
}

impl ResultState {
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            ResultState::Empty => None,
            ResultState::Succeeded { epoch, .. } | ResultState::Failed { epoch, .. } => {
                Some(*epoch)
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultState::Empty)
    }
}

/// What an orchestrator run ended with.
#[derive(Debug, Clone)]
pub enum TerminalRecord {
    Success(InferenceResult),
    Failure(ErrorRecord),
}

#[derive(Debug)]
pub struct ResultStore {
    tx: watch::Sender<ResultState>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ResultState::Empty);
        Self { tx }
    }

    /// Replace the live result. Returns the step the session moves to.
    pub fn record(&self, epoch: Epoch, record: TerminalRecord) -> Step {
        let (state, step) = match record {
            TerminalRecord::Success(result) => {
                (ResultState::Succeeded { epoch, result }, Step::Done)
            }
            TerminalRecord::Failure(error) => (ResultState::Failed { epoch, error }, Step::Failed),
        };
        self.tx.send_replace(state);
        step
    }

    pub fn current(&self) -> ResultState {
        self.tx.borrow().clone()
    }

    pub fn clear(&self) {
        self.tx.send_replace(ResultState::Empty);
    }

    pub fn subscribe(&self) -> watch::Receiver<ResultState> {
        self.tx.subscribe()
    }
}
