//! Try-on engine configuration: endpoints, upload limits, per-attempt timeouts.
//!
//! Loaded from YAML (`load_from_file`) or from defaults plus `TRYON_*`
//! environment overrides (`from_env`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 10 MiB upload ceiling.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TryOnConfig {
    /// Upload, primary inference, result and garment-generation endpoints.
    pub primary_base_url: String,
    /// Fallback inference endpoint.
    pub fallback_base_url: String,

    pub upload_timeout_ms: u64,
    pub primary_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
    pub generation_timeout_ms: u64,
    pub health_timeout_ms: u64,

    pub max_upload_bytes: u64,
    pub allowed_content_types: Vec<String>,

    /// When false the primary's retryable failures are terminal.
    pub fallback_enabled: bool,
    /// Engine selection flag forwarded to the primary (`use_segmind`).
    pub primary_engine_flag: bool,
}

impl Default for TryOnConfig {
    fn default() -> Self {
        Self {
            primary_base_url: "http://localhost:8000".to_string(),
            fallback_base_url: "http://localhost:5001".to_string(),
            upload_timeout_ms: 30_000,
            primary_timeout_ms: 600_000,
            fallback_timeout_ms: 15_000,
            generation_timeout_ms: 120_000,
            health_timeout_ms: 5_000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_content_types: DEFAULT_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fallback_enabled: true,
            primary_engine_flag: true,
        }
    }
}

impl TryOnConfig {
    /// Load from a YAML file. Missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        let config: TryOnConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `TRYON_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup. Split out so tests don't touch the
    /// process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRYON_PRIMARY_URL") {
            self.primary_base_url = v;
        }
        if let Some(v) = lookup("TRYON_FALLBACK_URL") {
            self.fallback_base_url = v;
        }

        let numeric = [
            ("TRYON_UPLOAD_TIMEOUT_MS", &mut self.upload_timeout_ms),
            ("TRYON_PRIMARY_TIMEOUT_MS", &mut self.primary_timeout_ms),
            ("TRYON_FALLBACK_TIMEOUT_MS", &mut self.fallback_timeout_ms),
            ("TRYON_GENERATION_TIMEOUT_MS", &mut self.generation_timeout_ms),
            ("TRYON_HEALTH_TIMEOUT_MS", &mut self.health_timeout_ms),
            ("TRYON_MAX_UPLOAD_BYTES", &mut self.max_upload_bytes),
        ];
        for (key, slot) in numeric {
            if let Some(v) = lookup(key) {
                *slot = v
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be an unsigned integer, got {v:?}"))?;
            }
        }

        if let Some(v) = lookup("TRYON_FALLBACK_ENABLED") {
            self.fallback_enabled = parse_bool("TRYON_FALLBACK_ENABLED", &v)?;
        }
        if let Some(v) = lookup("TRYON_PRIMARY_ENGINE_FLAG") {
            self.primary_engine_flag = parse_bool("TRYON_PRIMARY_ENGINE_FLAG", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("upload_timeout_ms", self.upload_timeout_ms),
            ("primary_timeout_ms", self.primary_timeout_ms),
            ("fallback_timeout_ms", self.fallback_timeout_ms),
            ("generation_timeout_ms", self.generation_timeout_ms),
            ("health_timeout_ms", self.health_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == 0) {
            anyhow::bail!("{name} must be greater than zero");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be greater than zero");
        }
        if self.allowed_content_types.is_empty() {
            anyhow::bail!("allowed_content_types must not be empty");
        }
        if self.primary_base_url.trim().is_empty() {
            anyhow::bail!("primary_base_url must not be empty");
        }
        Ok(())
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{key} must be a boolean, got {other:?}"),
    }
}
