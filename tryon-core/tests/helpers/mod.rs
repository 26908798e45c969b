//! In-process fakes for the remote collaborators.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use tryon_core::{
    AssetRole, AssetUploader, AttemptPolicy, EngineError, EngineKind, EngineOutput,
    GarmentGenerator, GeneratedGarment, GenerationError, InferenceEngine, InferenceOrchestrator,
    InferenceRequest, LocalFile, SessionDeps, SessionStateMachine, UploadBackend, UploadError,
    UploadLimits,
};

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUploads {
    calls: AtomicUsize,
}

impl MemoryUploads {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadBackend for MemoryUploads {
    async fn upload(&self, file: &LocalFile, role: AssetRole) -> Result<String, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let folder = match role {
            AssetRole::Subject => "models",
            AssetRole::Garment => "clothes",
        };
        Ok(format!("uploads/{folder}/{}", file.file_name))
    }
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

/// Answers every call with the same outcome, optionally after a delay.
pub struct ScriptedEngine {
    kind: EngineKind,
    outcome: Result<String, EngineError>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedEngine {
    pub fn ok(kind: EngineKind) -> Arc<Self> {
        Self::build(kind, Ok(format!("{}.jpg", kind.as_str())), Duration::ZERO)
    }

    pub fn failing(kind: EngineKind, error: EngineError) -> Arc<Self> {
        Self::build(kind, Err(error), Duration::ZERO)
    }

    pub fn slow(kind: EngineKind, delay: Duration) -> Arc<Self> {
        Self::build(kind, Ok(format!("{}.jpg", kind.as_str())), delay)
    }

    fn build(kind: EngineKind, outcome: Result<String, EngineError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            outcome,
            delay,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone().map(|name| EngineOutput {
            result_ref: format!("http://localhost:8000/api/result/{name}"),
        })
    }
}

/// Blocks every call until released; tracks how many calls overlap.
pub struct GatedEngine {
    kind: EngineKind,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pub started: Notify,
    release: Notify,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GatedEngine {
    pub fn new(kind: EngineKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            started: Notify::new(),
            release: Notify::new(),
        })
    }

    pub fn release_one(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEngine for GatedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn name(&self) -> &str {
        "gated"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        self.started.notify_one();
        self.release.notified().await;
        Ok(EngineOutput {
            result_ref: format!("http://localhost:8000/api/result/gated_{}.jpg", request.epoch),
        })
    }
}

// ---------------------------------------------------------------------------
// Garment generation
// ---------------------------------------------------------------------------

pub struct FixedGenerator {
    message: &'static str,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FixedGenerator {
    pub fn ok() -> Arc<Self> {
        Self::with_message("Clothing generated successfully")
    }

    pub fn degraded() -> Arc<Self> {
        Self::with_message("Clothing visualization created (local fallback used)")
    }

    fn with_message(message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            message,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GarmentGenerator for FixedGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedGarment, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(GeneratedGarment::from_response(
            &format!("/api/generated/generated_clothing_{n}.png"),
            self.message,
        ))
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub machine: SessionStateMachine,
    pub uploads: Arc<MemoryUploads>,
    pub generator: Arc<FixedGenerator>,
}

pub fn harness(
    primary: Arc<dyn InferenceEngine>,
    fallback: Option<Arc<dyn InferenceEngine>>,
    policy: AttemptPolicy,
) -> Harness {
    harness_with_generator(primary, fallback, policy, FixedGenerator::ok())
}

pub fn harness_with_generator(
    primary: Arc<dyn InferenceEngine>,
    fallback: Option<Arc<dyn InferenceEngine>>,
    policy: AttemptPolicy,
    generator: Arc<FixedGenerator>,
) -> Harness {
    let uploads = Arc::new(MemoryUploads::default());
    let uploader = AssetUploader::new(uploads.clone(), UploadLimits::default());
    let orchestrator = InferenceOrchestrator::new(primary, fallback, policy);
    let machine = SessionStateMachine::new(
        SessionDeps::new(uploader, orchestrator).with_generator(generator.clone()),
    );
    Harness {
        machine,
        uploads,
        generator,
    }
}

pub fn jpeg(name: &str) -> LocalFile {
    LocalFile::new(name, "image/jpeg", vec![0xFFu8, 0xD8, 0xFF, 0xE0, 0x00, 0x10])
}

pub fn oversized_png(bytes: usize) -> LocalFile {
    LocalFile::new("huge.png", "image/png", vec![0u8; bytes])
}

pub fn service_error() -> EngineError {
    EngineError::Status {
        status: 500,
        detail: "Segmind API error".to_string(),
    }
}

/// Stage an uploaded garment and a subject; leaves the session in review.
pub async fn stage_both(machine: &SessionStateMachine, description: &str) {
    machine
        .select_garment(tryon_core::GarmentSelection::Upload {
            file: jpeg("garment.jpg"),
            description: Some(description.to_string()),
        })
        .await
        .unwrap();
    machine.upload_subject(jpeg("me.jpg")).await.unwrap();
}
