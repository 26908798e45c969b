use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ErrorRecord;

// ─── Scalar aliases ───────────────────────────────────────────

/// Per-session request counter. Only the response tagged with the current
/// epoch may mutate session state.
pub type Epoch = u64;

// ─── Step ─────────────────────────────────────────────────────

/// Where a session is in the try-on flow. Declaration order is the forward order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DescribeOrSelectGarment,
    UploadSubject,
    ReviewAndConfirm,
    Generating,
    Done,
    Failed,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::DescribeOrSelectGarment => "describe_or_select_garment",
            Step::UploadSubject => "upload_subject",
            Step::ReviewAndConfirm => "review_and_confirm",
            Step::Generating => "generating",
            Step::Done => "done",
            Step::Failed => "failed",
        }
    }

    /// Steps in which subject/garment assets may still be added or replaced.
    pub fn accepts_assets(self) -> bool {
        matches!(
            self,
            Step::DescribeOrSelectGarment | Step::UploadSubject | Step::ReviewAndConfirm
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Step::Done | Step::Failed)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Category ─────────────────────────────────────────────────

/// Garment category sent to the inference engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    UpperBody,
    LowerBody,
    FullBody,
}

impl Category {
    /// Label understood by the primary engine's `clothing_category` field.
    pub fn wire_label(self) -> &'static str {
        match self {
            Category::UpperBody => "Upper body",
            Category::LowerBody => "Lower body",
            Category::FullBody => "Dress",
        }
    }

    /// Inverse of [`Category::wire_label`]; also accepts the `Full body` spelling.
    pub fn from_wire_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "upper body" => Some(Category::UpperBody),
            "lower body" => Some(Category::LowerBody),
            "dress" | "full body" => Some(Category::FullBody),
            _ => None,
        }
    }
}

// ─── Engines ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Primary,
    Fallback,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Primary => "primary",
            EngineKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readiness of both engines, probed at session start. Informational only:
/// an unavailable engine is still attempted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineAvailability {
    pub primary: bool,
    pub fallback: bool,
}

impl EngineAvailability {
    pub fn all_ready(&self) -> bool {
        self.primary && self.fallback
    }
}

// ─── Assets ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    Subject,
    Garment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetOrigin {
    Uploaded,
    Catalog,
    Generated,
}

/// A file picked by the user, not yet validated or uploaded.
#[derive(Clone, Debug)]
pub struct LocalFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Arc<[u8]>,
}

impl LocalFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// In-memory handle to the picked file plus its preview.
#[derive(Clone, Debug, Serialize)]
pub struct LocalRef {
    pub file_name: String,
    /// `data:` URL rendered before the upload completes. Shared, so session
    /// snapshots don't copy it.
    pub preview: Arc<str>,
    #[serde(skip)]
    pub data: Arc<[u8]>,
}

/// A piece of binary content owned by a session.
#[derive(Clone, Debug, Serialize)]
pub struct Asset {
    pub id: Uuid,
    pub role: AssetRole,
    pub origin: AssetOrigin,
    pub local_ref: Option<LocalRef>,
    /// Server-assigned path. Present only once the asset is staged.
    pub remote_path: Option<String>,
    pub content_type: String,
    pub size_bytes: u64,
    /// Catalog identifier, used by the fallback engine's calling convention.
    pub catalog_item_id: Option<String>,
    /// Set when the garment generator answered with its local stand-in image.
    pub degraded: bool,
}

impl Asset {
    pub fn is_staged(&self) -> bool {
        self.remote_path.as_deref().is_some_and(|p| !p.is_empty())
    }
}

// ─── Session ──────────────────────────────────────────────────

/// One user's attempt at a try-on.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub step: Step,
    pub subject_asset: Option<Asset>,
    pub garment_asset: Option<Asset>,
    pub garment_description: Option<String>,
    /// Category carried by a catalog selection; wins over keyword classification.
    pub category_hint: Option<Category>,
    pub category: Option<Category>,
    pub request_epoch: Epoch,
    pub result: Option<InferenceResult>,
    pub last_error: Option<ErrorRecord>,
    pub availability: Option<EngineAvailability>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(request_epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            step: Step::DescribeOrSelectGarment,
            subject_asset: None,
            garment_asset: None,
            garment_description: None,
            category_hint: None,
            category: None,
            request_epoch,
            result: None,
            last_error: None,
            availability: None,
            created_at: Utc::now(),
        }
    }

    pub fn subject_ready(&self) -> bool {
        self.subject_asset.as_ref().is_some_and(Asset::is_staged)
    }

    pub fn garment_ready(&self) -> bool {
        self.garment_asset.as_ref().is_some_and(Asset::is_staged)
    }
}

// ─── Inference ────────────────────────────────────────────────

/// What an engine needs to know about the subject photo.
#[derive(Clone, Debug)]
pub struct SubjectRef {
    pub remote_path: String,
    pub content_type: String,
    /// Raw bytes, when the session still holds them (uploaded subjects always do).
    pub data: Option<Arc<[u8]>>,
}

impl SubjectRef {
    pub fn from_asset(asset: &Asset) -> Option<Self> {
        Some(Self {
            remote_path: asset.remote_path.clone()?,
            content_type: asset.content_type.clone(),
            data: asset.local_ref.as_ref().map(|l| l.data.clone()),
        })
    }
}

/// What an engine needs to know about the garment.
#[derive(Clone, Debug)]
pub struct GarmentRef {
    pub remote_path: String,
    pub catalog_item_id: Option<String>,
}

impl GarmentRef {
    pub fn from_asset(asset: &Asset) -> Option<Self> {
        Some(Self {
            remote_path: asset.remote_path.clone()?,
            catalog_item_id: asset.catalog_item_id.clone(),
        })
    }
}

/// One attempt to call one engine.
#[derive(Clone, Debug)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub engine: EngineKind,
    pub subject: SubjectRef,
    pub garment: GarmentRef,
    pub category: Category,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub epoch: Epoch,
}

impl InferenceRequest {
    pub fn new(
        engine: EngineKind,
        subject: SubjectRef,
        garment: GarmentRef,
        category: Category,
        epoch: Epoch,
        timeout: Duration,
    ) -> Self {
        let started_at = Utc::now();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::new_v4(),
            engine,
            subject,
            garment,
            category,
            started_at,
            deadline,
            epoch,
        }
    }
}

/// Terminal success of an orchestrator run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// URL of the composited image.
    pub result_ref: String,
    pub engine_used: EngineKind,
    pub latency_ms: u64,
    pub epoch: Epoch,
}

impl InferenceResult {
    pub fn via_fallback(&self) -> bool {
        self.engine_used == EngineKind::Fallback
    }
}
