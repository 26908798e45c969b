//! Inference engine seam.
//!
//! Both engines sit behind [`InferenceEngine`] even though their calling
//! conventions differ (the primary takes staged paths and a category label,
//! the fallback takes the subject's bytes and a garment identifier). Adapters
//! live in [`crate::http`]; tests plug in fakes.

use async_trait::async_trait;

use crate::error::{ErrorKind, ErrorRecord, ErrorStage};
use crate::types::{EngineKind, InferenceRequest};

/// What a successful engine call yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Fully resolved URL of the composited image.
    pub result_ref: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("no response within {0}")]
    Timeout(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// 2xx response whose body reports failure.
    #[error("engine reported failure: {0}")]
    Rejected(String),

    /// The request could not be expressed in the engine's calling convention.
    #[error("malformed reference: {0}")]
    MalformedReference(String),

    #[error("unreadable response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Timeout(_) => ErrorKind::NetworkTimeout,
            EngineError::Transport(_) => ErrorKind::Network,
            EngineError::Status { status, .. } => classify_status(*status),
            EngineError::Rejected(_) => ErrorKind::ServiceError,
            EngineError::MalformedReference(_) => ErrorKind::Validation,
            EngineError::Decode(_) | EngineError::Other(_) => ErrorKind::UnknownFailure,
        }
    }

    pub fn to_record(&self, engine: EngineKind) -> ErrorRecord {
        ErrorRecord::new(
            ErrorStage::Inference,
            self.kind(),
            format!("{engine} engine: {self}"),
        )
        .with_engines(&[engine])
    }
}

/// Status-code taxonomy shared by every HTTP collaborator.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        400 | 404 | 413 | 415 | 422 => ErrorKind::Validation,
        429 => ErrorKind::RateLimited,
        _ => ErrorKind::ServiceError,
    }
}

/// One backend capable of compositing a garment onto a subject.
///
/// Implementations make exactly one attempt per call; deadlines and fallback
/// are the orchestrator's business.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Display name for logs.
    fn name(&self) -> &str;

    async fn infer(&self, request: &InferenceRequest) -> Result<EngineOutput, EngineError>;
}
