//! Virtual try-on session engine
//!
//! Drives one user's try-on from garment selection to a composited result:
//! stages the subject and garment images, resolves the garment category, and
//! runs the inference request against a primary engine with a single fallback.
//!
//! # Architecture
//!
//! ```text
//!   select_garment / upload_subject
//!         │
//!         ▼
//! ┌─────────────────────────────────────────┐
//! │  AssetUploader / GarmentGenerator       │
//! │  validate → stage → remote path         │
//! └─────────────────────────────────────────┘
//!         │  ReviewAndConfirm
//!         ▼
//! ┌─────────────────────────────────────────┐
//! │  CategoryClassifier                     │
//! │  hint, else ordered keyword rules       │
//! └─────────────────────────────────────────┘
//!         │  epoch += 1, Generating
//!         ▼
//! ┌─────────────────────────────────────────┐
//! │  InferenceOrchestrator                  │
//! │  primary ──retryable error──► fallback  │
//! └─────────────────────────────────────────┘
//!         │  epoch still current?
//!         ▼
//!   ResultStore → Done | Failed
//! ```

pub mod cancel;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod garment;
pub mod health;
pub mod http;
pub mod orchestrator;
pub mod result_store;
pub mod session;
pub mod types;
pub mod uploader;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use classifier::{CategoryClassifier, CategorySource};
pub use config::TryOnConfig;
pub use engine::{EngineError, EngineOutput, InferenceEngine};
pub use error::{ErrorKind, ErrorRecord, ErrorStage, Result, TryOnError};
pub use events::{RecordedEvent, SessionEvent};
pub use garment::{CatalogItem, GarmentGenerator, GarmentSelection, GeneratedGarment, GenerationError};
pub use health::{HealthProbe, StaticProbe};
pub use orchestrator::{
    AttemptPolicy, AttemptRecord, InferenceJob, InferenceOrchestrator, RunOutcome, RunPhase,
    RunReport,
};
pub use result_store::{ResultState, ResultStore};
pub use session::{GenerationTicket, SessionDeps, SessionStateMachine};
pub use types::*;
pub use uploader::{AssetUploader, UploadBackend, UploadError, UploadLimits};
