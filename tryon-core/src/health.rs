//! Engine readiness probing.
//!
//! Availability only annotates the session; it never gates an attempt.

use async_trait::async_trait;

use crate::types::EngineAvailability;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Infallible: an unreachable engine is reported as not ready.
    async fn probe(&self) -> EngineAvailability;
}

/// Fixed answer, for offline runs and tests.
pub struct StaticProbe(pub EngineAvailability);

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn probe(&self) -> EngineAvailability {
        self.0
    }
}
