//! Error model for the try-on engine.
//!
//! Two layers:
//!
//! - `ErrorRecord` is the session-attached, serialisable form. Its `kind` is the
//!   taxonomy the orchestrator classifies on, and its `retryable` flag drives the
//!   primary → fallback decision.
//! - `TryOnError` is what the imperative session operations return to their caller.

use serde::{Deserialize, Serialize};

use crate::garment::GenerationError;
use crate::types::{EngineKind, Step};
use crate::uploader::UploadError;

// ---------------------------------------------------------------------------
// Stage / kind
// ---------------------------------------------------------------------------

/// Which part of the pipeline produced the error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    Upload,
    Classification,
    Generation,
    Inference,
}

impl ErrorStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorStage::Upload => "upload",
            ErrorStage::Classification => "classification",
            ErrorStage::Generation => "generation",
            ErrorStage::Inference => "inference",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad file type/size, empty description, malformed reference.
    Validation,
    /// Connection-level failure before any response arrived.
    Network,
    /// Attempt exceeded its deadline.
    NetworkTimeout,
    /// Engine answered with an error status or a structured failure body.
    ServiceError,
    RateLimited,
    UnknownFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::ServiceError => "service_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UnknownFailure => "unknown_failure",
        }
    }

    /// Everything except validation is worth one more attempt.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Validation)
    }
}

// ---------------------------------------------------------------------------
// ErrorRecord
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{} error during {}: {message}", .kind.as_str(), .stage.as_str())]
pub struct ErrorRecord {
    pub stage: ErrorStage,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
    /// Engines that were attempted before this error became terminal.
    #[serde(default)]
    pub engines_tried: Vec<EngineKind>,
}

impl ErrorRecord {
    pub fn new(stage: ErrorStage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            retryable: kind.is_retryable(),
            message: message.into(),
            engines_tried: Vec::new(),
        }
    }

    pub fn validation(stage: ErrorStage, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Validation, message)
    }

    pub fn with_engines(mut self, engines: &[EngineKind]) -> Self {
        self.engines_tried = engines.to_vec();
        self
    }

    pub fn both_engines_failed(&self) -> bool {
        self.engines_tried.contains(&EngineKind::Primary)
            && self.engines_tried.contains(&EngineKind::Fallback)
    }

    /// Message for the presentation layer. Invalid input, deadline expiry and
    /// exhaustion of both engines each get their own wording.
    pub fn user_message(&self) -> String {
        if self.both_engines_failed() {
            return "Both try-on methods failed. Please try again later.".to_string();
        }
        if self.kind == ErrorKind::Validation {
            return format!("Invalid input: {}", self.message);
        }
        match (self.stage, self.kind) {
            (_, ErrorKind::NetworkTimeout) => {
                "The request timed out. Processing is taking longer than expected; please try again."
                    .to_string()
            }
            (_, ErrorKind::RateLimited) => {
                "The try-on service is rate limited. Please try again in a few minutes.".to_string()
            }
            (ErrorStage::Upload, _) => format!("Upload failed: {}", self.message),
            (ErrorStage::Generation, _) => {
                format!("Failed to generate clothing image: {}", self.message)
            }
            (ErrorStage::Inference, ErrorKind::Network) => {
                "No response from the try-on service. Please check your connection.".to_string()
            }
            _ => format!("Try-on failed: {}", self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// TryOnError: returned by session operations
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TryOnError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Cannot {operation} while the session is in step {from}")]
    InvalidTransition { from: Step, operation: &'static str },

    /// The session was reset or moved on while the operation was awaiting.
    #[error("Session changed while {operation} was in progress; result discarded")]
    Superseded { operation: &'static str },

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Garment generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Retry not permitted: {0}")]
    NotRetryable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, TryOnError>;
