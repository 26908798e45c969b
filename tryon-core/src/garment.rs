//! Garment acquisition: catalog items, text-to-garment generation.
//!
//! Uploaded garments go through [`crate::uploader`]; this module covers the
//! two paths that produce a staged garment without an upload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::classify_status;
use crate::error::{ErrorKind, ErrorRecord, ErrorStage};
use crate::types::{Asset, AssetOrigin, AssetRole, Category, LocalFile};

/// A pre-staged garment from the product catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: String,
    pub name: String,
    /// Already present in the primary's file store.
    pub image_path: String,
    #[serde(default)]
    pub category: Option<Category>,
}

impl CatalogItem {
    pub fn to_asset(&self) -> Asset {
        Asset {
            id: Uuid::new_v4(),
            role: AssetRole::Garment,
            origin: AssetOrigin::Catalog,
            local_ref: None,
            remote_path: Some(self.image_path.clone()),
            content_type: content_type_for_path(&self.image_path).to_string(),
            size_bytes: 0,
            catalog_item_id: Some(self.item_id.clone()),
            degraded: false,
        }
    }
}

/// How the user picked a garment.
#[derive(Debug, Clone)]
pub enum GarmentSelection {
    Upload {
        file: LocalFile,
        description: Option<String>,
    },
    Catalog(CatalogItem),
    /// Free text, turned into an image by a [`GarmentGenerator`].
    Describe(String),
}

/// Output of a text-to-garment call.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedGarment {
    /// Server path of the generated image (leading `/` stripped).
    pub image_path: String,
    pub message: String,
    /// The generator substituted its local stand-in renderer.
    pub degraded: bool,
}

impl GeneratedGarment {
    /// Build from the endpoint's `{imageUrl, message}` pair.
    pub fn from_response(image_url: &str, message: &str) -> Self {
        Self {
            image_path: image_url.trim_start_matches('/').to_string(),
            message: message.to_string(),
            degraded: message.to_ascii_lowercase().contains("fallback"),
        }
    }

    pub fn to_asset(&self) -> Asset {
        Asset {
            id: Uuid::new_v4(),
            role: AssetRole::Garment,
            origin: AssetOrigin::Generated,
            local_ref: None,
            remote_path: Some(self.image_path.clone()),
            content_type: content_type_for_path(&self.image_path).to_string(),
            size_bytes: 0,
            catalog_item_id: None,
            degraded: self.degraded,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("description is empty")]
    EmptyPrompt,

    #[error("generation timed out after {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("generation endpoint returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("unreadable generation response: {0}")]
    Decode(String),
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::EmptyPrompt => ErrorKind::Validation,
            GenerationError::Timeout(_) => ErrorKind::NetworkTimeout,
            GenerationError::Network(_) => ErrorKind::Network,
            GenerationError::Status { status, .. } => classify_status(*status),
            GenerationError::Decode(_) => ErrorKind::UnknownFailure,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        let stage = match self {
            GenerationError::EmptyPrompt => ErrorStage::Classification,
            _ => ErrorStage::Generation,
        };
        ErrorRecord::new(stage, self.kind(), self.to_string())
    }
}

/// Text-to-image garment source.
#[async_trait]
pub trait GarmentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedGarment, GenerationError>;
}

/// Trims and rejects blank prompts, then delegates.
pub async fn generate_garment(
    generator: &dyn GarmentGenerator,
    prompt: &str,
) -> Result<GeneratedGarment, GenerationError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(GenerationError::EmptyPrompt);
    }
    let garment = generator.generate(prompt).await?;
    if garment.image_path.is_empty() {
        return Err(GenerationError::Decode("imageUrl is empty".to_string()));
    }
    if garment.degraded {
        warn!(image = %garment.image_path, "garment generator used its local stand-in");
    } else {
        info!(image = %garment.image_path, "garment generated");
    }
    Ok(garment)
}

/// Generator for deployments without a generation endpoint.
pub struct UnavailableGenerator;

#[async_trait]
impl GarmentGenerator for UnavailableGenerator {
    async fn generate(&self, _prompt: &str) -> Result<GeneratedGarment, GenerationError> {
        Err(GenerationError::Status {
            status: 503,
            detail: "garment generation is not configured".to_string(),
        })
    }
}

/// Best-effort content type from a file extension.
pub fn content_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
