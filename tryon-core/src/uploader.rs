//! Asset staging.
//!
//! `AssetUploader` validates a picked file against the content-type whitelist
//! and the size ceiling before any network call, then hands it to an
//! `UploadBackend` (HTTP in production, in-memory in tests). Failures are not
//! retried here.

use async_trait::async_trait;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TryOnConfig;
use crate::error::{ErrorKind, ErrorRecord, ErrorStage};
use crate::types::{Asset, AssetOrigin, AssetRole, LocalFile, LocalRef};

/// Error type for staging operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// Rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// Timeout, refused or reset connection.
    #[error("network error: {0}")]
    Network(String),

    /// The upload endpoint answered with an error status.
    #[error("upload endpoint returned HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Validation(_) => ErrorKind::Validation,
            UploadError::Network(_) => ErrorKind::Network,
            UploadError::Rejected { status: 429, .. } => ErrorKind::RateLimited,
            UploadError::Rejected { .. } => ErrorKind::ServiceError,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(ErrorStage::Upload, self.kind(), self.to_string())
    }
}

/// Remote store for staged files. Returns the server-assigned path.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    async fn upload(&self, file: &LocalFile, role: AssetRole) -> Result<String, UploadError>;
}

#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl UploadLimits {
    pub fn from_config(config: &TryOnConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            allowed_content_types: config
                .allowed_content_types
                .iter()
                .map(|ct| ct.to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from_config(&TryOnConfig::default())
    }
}

pub struct AssetUploader {
    backend: Arc<dyn UploadBackend>,
    limits: UploadLimits,
}

impl AssetUploader {
    pub fn new(backend: Arc<dyn UploadBackend>, limits: UploadLimits) -> Self {
        Self { backend, limits }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Whitelist and size checks. No I/O.
    pub fn validate(&self, file: &LocalFile) -> Result<(), UploadError> {
        let content_type = normalize_content_type(&file.content_type);
        if !self
            .limits
            .allowed_content_types
            .iter()
            .any(|allowed| *allowed == content_type)
        {
            return Err(UploadError::Validation(format!(
                "unsupported file type {:?}; upload a JPEG, PNG or WebP image",
                file.content_type
            )));
        }
        if file.size_bytes() == 0 {
            return Err(UploadError::Validation(format!(
                "{} is empty",
                file.file_name
            )));
        }
        if file.size_bytes() > self.limits.max_bytes {
            return Err(UploadError::Validation(format!(
                "{} is {} bytes; the limit is {} bytes",
                file.file_name,
                file.size_bytes(),
                self.limits.max_bytes
            )));
        }
        Ok(())
    }

    /// Validate, then upload once. The returned asset is staged.
    pub async fn stage(&self, file: LocalFile, role: AssetRole) -> Result<Asset, UploadError> {
        if let Err(e) = self.validate(&file) {
            warn!(file = %file.file_name, error = %e, "rejected before upload");
            return Err(e);
        }

        let local_ref = local_ref_for(&file);
        debug!(file = %file.file_name, bytes = file.size_bytes(), ?role, "uploading");

        let remote_path = self.backend.upload(&file, role).await?;
        if remote_path.trim().is_empty() {
            return Err(UploadError::Rejected {
                status: 200,
                detail: "upload endpoint returned an empty path".to_string(),
            });
        }

        info!(file = %file.file_name, %remote_path, ?role, "asset staged");
        Ok(Asset {
            id: Uuid::new_v4(),
            role,
            origin: AssetOrigin::Uploaded,
            local_ref: Some(local_ref),
            remote_path: Some(remote_path),
            content_type: normalize_content_type(&file.content_type),
            size_bytes: file.size_bytes(),
            catalog_item_id: None,
            degraded: false,
        })
    }
}

/// `image/jpg` is a common mislabel for `image/jpeg`.
pub fn normalize_content_type(raw: &str) -> String {
    let ct = raw.trim().to_ascii_lowercase();
    match ct.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => ct,
    }
}

/// `data:` URL for immediate rendering. Infallible and independent of upload.
pub fn preview_data_url(file: &LocalFile) -> String {
    format!(
        "data:{};base64,{}",
        normalize_content_type(&file.content_type),
        base64::engine::general_purpose::STANDARD.encode(&file.bytes)
    )
}

fn local_ref_for(file: &LocalFile) -> LocalRef {
    LocalRef {
        file_name: file.file_name.clone(),
        preview: preview_data_url(file).into(),
        data: file.bytes.clone(),
    }
}
