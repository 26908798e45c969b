//! HTTP adapters for the remote collaborators.
//!
//! | Collaborator | Route                                   | Request                                               | Response                                  |
//! |--------------|-----------------------------------------|-------------------------------------------------------|-------------------------------------------|
//! | upload       | `POST /api/upload/{model,cloth}`        | multipart field `file`                                | `{filename}`                              |
//! | primary      | `POST /api/tryon`                       | `{model_path, cloth_path, clothing_category, use_segmind}` | `{result}` / `{detail}`              |
//! | fallback     | `POST /api/virtual-tryon`               | `{user_image, clothing_item_id}`                      | `{success, result_image_path, error}`     |
//! | generation   | `POST /api/generate-clothing`           | `{prompt}`                                            | `{imageUrl, message}`                     |
//! | health       | `GET /health` on both services          |                                                       | `{status}` / `{ai_stylist_ready}`         |

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::TryOnConfig;
use crate::engine::{EngineError, EngineOutput, InferenceEngine};
use crate::garment::{GarmentGenerator, GeneratedGarment, GenerationError};
use crate::health::HealthProbe;
use crate::types::{AssetRole, EngineAvailability, EngineKind, InferenceRequest, LocalFile};
use crate::uploader::{normalize_content_type, UploadBackend, UploadError};

const MAX_DETAIL_CHARS: usize = 300;

/// Shared client. Per-call deadlines are applied by the callers.
pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("tryon/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Absolute URLs pass through; bare paths are resolved against `base`.
pub fn resolve_result_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        join_url(base, path)
    }
}

/// Pull a human-readable reason out of an error body: `detail`, then `error`,
/// then `message`, then the raw text.
pub fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: Option<serde_json::Value>,
        error: Option<String>,
        message: Option<String>,
    }

    let parsed = serde_json::from_str::<ErrorBody>(body).ok().and_then(|b| {
        b.detail
            .map(|d| match d {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .or(b.error)
            .or(b.message)
    });
    let detail = parsed.unwrap_or_else(|| body.trim().to_string());
    if detail.chars().count() > MAX_DETAIL_CHARS {
        let cut: String = detail.chars().take(MAX_DETAIL_CHARS).collect();
        format!("{cut}…")
    } else {
        detail
    }
}

/// Returns `(status, detail)` for non-success responses.
async fn check_status(resp: Response) -> Result<Response, (u16, String)> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err((status.as_u16(), error_detail(&body)))
}

fn engine_transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout(e.to_string())
    } else if e.is_decode() {
        EngineError::Decode(e.to_string())
    } else {
        EngineError::Transport(e.to_string())
    }
}

// ─── Upload ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UploadResponse {
    filename: Option<String>,
    #[serde(rename = "remotePath")]
    remote_path: Option<String>,
}

pub struct HttpUploadBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpUploadBackend {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn route(role: AssetRole) -> &'static str {
        match role {
            AssetRole::Subject => "api/upload/model",
            AssetRole::Garment => "api/upload/cloth",
        }
    }
}

#[async_trait]
impl UploadBackend for HttpUploadBackend {
    async fn upload(&self, file: &LocalFile, role: AssetRole) -> Result<String, UploadError> {
        let part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
            .file_name(file.file_name.clone())
            .mime_str(&normalize_content_type(&file.content_type))
            .map_err(|e| UploadError::Validation(format!("bad content type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = join_url(&self.base_url, Self::route(role));

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;
        let resp = check_status(resp)
            .await
            .map_err(|(status, detail)| UploadError::Rejected { status, detail })?;

        let body: UploadResponse = resp.json().await.map_err(|e| UploadError::Rejected {
            status: 200,
            detail: format!("unreadable upload response: {e}"),
        })?;
        body.filename
            .or(body.remote_path)
            .ok_or_else(|| UploadError::Rejected {
                status: 200,
                detail: "upload response carried no path".to_string(),
            })
    }
}

// ─── Primary engine ───────────────────────────────────────────

#[derive(Debug, Serialize)]
struct PrimaryRequest<'a> {
    model_path: &'a str,
    cloth_path: &'a str,
    clothing_category: &'static str,
    use_segmind: bool,
}

#[derive(Debug, Deserialize)]
struct PrimaryResponse {
    result: Option<String>,
    detail: Option<String>,
}

/// Path-based engine: both images must already be staged.
pub struct PrimaryHttpEngine {
    client: Client,
    base_url: String,
    engine_flag: bool,
}

impl PrimaryHttpEngine {
    pub fn new(client: Client, base_url: impl Into<String>, engine_flag: bool) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            engine_flag,
        }
    }
}

#[async_trait]
impl InferenceEngine for PrimaryHttpEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Primary
    }

    fn name(&self) -> &str {
        "primary-tryon"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<EngineOutput, EngineError> {
        if request.subject.remote_path.is_empty() || request.garment.remote_path.is_empty() {
            return Err(EngineError::MalformedReference(
                "subject and garment must both be staged".to_string(),
            ));
        }
        let body = PrimaryRequest {
            model_path: &request.subject.remote_path,
            cloth_path: &request.garment.remote_path,
            clothing_category: request.category.wire_label(),
            use_segmind: self.engine_flag,
        };
        debug!(request_id = %request.id, epoch = request.epoch, "POST /api/tryon");

        let resp = self
            .client
            .post(join_url(&self.base_url, "api/tryon"))
            .json(&body)
            .send()
            .await
            .map_err(engine_transport_error)?;
        let resp = check_status(resp)
            .await
            .map_err(|(status, detail)| EngineError::Status { status, detail })?;
        let parsed: PrimaryResponse = resp.json().await.map_err(engine_transport_error)?;

        match (parsed.result, parsed.detail) {
            (Some(name), _) if !name.is_empty() => Ok(EngineOutput {
                result_ref: primary_result_url(&self.base_url, &name),
            }),
            (_, Some(detail)) => Err(EngineError::Rejected(detail)),
            _ => Err(EngineError::Decode("response carried no result".to_string())),
        }
    }
}

/// The primary answers with a bare file name served under `/api/result/`.
pub fn primary_result_url(base: &str, result: &str) -> String {
    if result.starts_with("http://") || result.starts_with("https://") {
        return result.to_string();
    }
    let name = result.rsplit('/').next().unwrap_or(result);
    join_url(base, &format!("api/result/{name}"))
}

// ─── Fallback engine ──────────────────────────────────────────

#[derive(Debug, Serialize)]
struct FallbackRequest<'a> {
    user_image: String,
    clothing_item_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct FallbackResponse {
    #[serde(default)]
    success: bool,
    result_image_path: Option<String>,
    error: Option<String>,
}

/// Bytes-based engine: the subject travels inline as a `data:` URL and the
/// garment as an identifier. Results land in the primary's file store.
pub struct FallbackHttpEngine {
    client: Client,
    base_url: String,
    result_base_url: String,
}

impl FallbackHttpEngine {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        result_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            result_base_url: result_base_url.into(),
        }
    }
}

#[async_trait]
impl InferenceEngine for FallbackHttpEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Fallback
    }

    fn name(&self) -> &str {
        "ai-stylist"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<EngineOutput, EngineError> {
        let Some(data) = request.subject.data.as_ref().filter(|d| !d.is_empty()) else {
            return Err(EngineError::MalformedReference(
                "subject image bytes are not available".to_string(),
            ));
        };
        let garment_id = request
            .garment
            .catalog_item_id
            .as_deref()
            .unwrap_or(&request.garment.remote_path);
        let body = FallbackRequest {
            user_image: format!(
                "data:{};base64,{}",
                request.subject.content_type,
                base64::engine::general_purpose::STANDARD.encode(data)
            ),
            clothing_item_id: garment_id,
        };
        debug!(request_id = %request.id, epoch = request.epoch, garment_id, "POST /api/virtual-tryon");

        let resp = self
            .client
            .post(join_url(&self.base_url, "api/virtual-tryon"))
            .json(&body)
            .send()
            .await
            .map_err(engine_transport_error)?;
        let resp = check_status(resp)
            .await
            .map_err(|(status, detail)| EngineError::Status { status, detail })?;
        let parsed: FallbackResponse = resp.json().await.map_err(engine_transport_error)?;
        fallback_output(&self.result_base_url, parsed)
    }
}

fn fallback_output(
    result_base_url: &str,
    parsed: FallbackResponse,
) -> Result<EngineOutput, EngineError> {
    match parsed.result_image_path {
        Some(path) if parsed.success && !path.is_empty() => Ok(EngineOutput {
            result_ref: resolve_result_url(result_base_url, &path),
        }),
        _ => Err(EngineError::Rejected(
            parsed
                .error
                .unwrap_or_else(|| "fallback reported failure".to_string()),
        )),
    }
}

// ─── Garment generation ───────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
    #[serde(default)]
    message: String,
}

pub struct HttpGarmentGenerator {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGarmentGenerator {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl GarmentGenerator for HttpGarmentGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedGarment, GenerationError> {
        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                GenerationError::Timeout(format!("{} ms", self.timeout.as_millis()))
            } else {
                GenerationError::Network(e.to_string())
            }
        };

        let resp = self
            .client
            .post(join_url(&self.base_url, "api/generate-clothing"))
            .timeout(self.timeout)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(to_error)?;
        let resp = check_status(resp)
            .await
            .map_err(|(status, detail)| GenerationError::Status { status, detail })?;
        let body: GenerationResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;

        let image_url = body
            .image_url
            .ok_or_else(|| GenerationError::Decode("response carried no imageUrl".to_string()))?;
        Ok(GeneratedGarment::from_response(&image_url, &body.message))
    }
}

// ─── Health ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PrimaryHealth {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FallbackHealth {
    #[serde(default)]
    ai_stylist_ready: bool,
}

pub struct HttpHealthProbe {
    client: Client,
    primary_base_url: String,
    fallback_base_url: String,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(client: Client, config: &TryOnConfig) -> Self {
        Self {
            client,
            primary_base_url: config.primary_base_url.clone(),
            fallback_base_url: config.fallback_base_url.clone(),
            timeout: config.health_timeout(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, base: &str) -> Option<T> {
        let resp = self
            .client
            .get(join_url(base, "health"))
            .timeout(self.timeout)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json().await.ok()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> EngineAvailability {
        let (primary, fallback) = tokio::join!(
            self.get::<PrimaryHealth>(&self.primary_base_url),
            self.get::<FallbackHealth>(&self.fallback_base_url),
        );
        EngineAvailability {
            primary: primary
                .and_then(|h| h.status)
                .is_some_and(|s| s.eq_ignore_ascii_case("healthy")),
            fallback: fallback.is_some_and(|h| h.ai_stylist_ready),
        }
    }
}
