//! Primary → fallback inference run.
//!
//! Lifecycle of one run:
//!
//! ```text
//! Idle → RequestingPrimary → Succeeded
//!                          → RequestingFallback → Succeeded | Failed
//!                          → Failed
//! ```
//!
//! Each attempt gets its own deadline. The fallback is tried at most once and
//! only after a retryable primary failure. A cancelled run reports
//! `RunOutcome::Cancelled` and the caller applies nothing.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::TryOnConfig;
use crate::engine::{EngineError, InferenceEngine};
use crate::error::{ErrorRecord, ErrorStage};
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
    pub fallback_enabled: bool,
}

impl AttemptPolicy {
    pub fn from_config(config: &TryOnConfig) -> Self {
        Self {
            primary_timeout: config.primary_timeout(),
            fallback_timeout: config.fallback_timeout(),
            fallback_enabled: config.fallback_enabled,
        }
    }
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self::from_config(&TryOnConfig::default())
    }
}

/// Everything a run needs, captured at the `ReviewAndConfirm → Generating` edge.
#[derive(Debug, Clone)]
pub struct InferenceJob {
    pub session_id: Uuid,
    pub epoch: Epoch,
    pub subject: SubjectRef,
    pub garment: GarmentRef,
    pub category: Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    RequestingPrimary,
    RequestingFallback,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub request_id: Uuid,
    pub engine: EngineKind,
    pub elapsed_ms: u64,
    /// `None` on success.
    pub error: Option<ErrorRecord>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Succeeded(InferenceResult),
    Failed(ErrorRecord),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: Uuid,
    pub epoch: Epoch,
    pub outcome: RunOutcome,
    pub attempts: Vec<AttemptRecord>,
    pub phases: Vec<RunPhase>,
    pub total_ms: u64,
}

impl RunReport {
    pub fn fallback_attempted(&self) -> bool {
        self.attempts.iter().any(|a| a.engine == EngineKind::Fallback)
    }
}

enum Attempt {
    Ok(InferenceResult),
    Err(ErrorRecord),
    Cancelled,
}

pub struct InferenceOrchestrator {
    primary: Arc<dyn InferenceEngine>,
    fallback: Option<Arc<dyn InferenceEngine>>,
    policy: AttemptPolicy,
}

impl InferenceOrchestrator {
    pub fn new(
        primary: Arc<dyn InferenceEngine>,
        fallback: Option<Arc<dyn InferenceEngine>>,
        policy: AttemptPolicy,
    ) -> Self {
        Self {
            primary,
            fallback,
            policy,
        }
    }

    pub fn policy(&self) -> &AttemptPolicy {
        &self.policy
    }

    fn fallback_engine(&self) -> Option<&Arc<dyn InferenceEngine>> {
        self.fallback
            .as_ref()
            .filter(|_| self.policy.fallback_enabled)
    }

    pub async fn run(&self, job: InferenceJob, cancel: CancelSignal) -> RunReport {
        let started = Instant::now();
        let mut phases = vec![RunPhase::Idle, RunPhase::RequestingPrimary];
        let mut attempts = Vec::with_capacity(2);

        info!(
            session_id = %job.session_id,
            epoch = job.epoch,
            category = job.category.wire_label(),
            engine = self.primary.name(),
            "inference run started"
        );

        let primary_error = match self
            .attempt(
                self.primary.as_ref(),
                &job,
                self.policy.primary_timeout,
                &cancel,
                &mut attempts,
            )
            .await
        {
            Attempt::Ok(result) => {
                phases.push(RunPhase::Succeeded);
                return self.finish(job, RunOutcome::Succeeded(result), attempts, phases, started);
            }
            Attempt::Cancelled => {
                return self.finish(job, RunOutcome::Cancelled, attempts, phases, started);
            }
            Attempt::Err(record) => record,
        };

        let fallback = match self.fallback_engine() {
            Some(engine) if primary_error.retryable => engine,
            _ => {
                if primary_error.retryable {
                    warn!(epoch = job.epoch, "primary failed and no fallback is enabled");
                }
                phases.push(RunPhase::Failed);
                return self.finish(
                    job,
                    RunOutcome::Failed(primary_error),
                    attempts,
                    phases,
                    started,
                );
            }
        };

        warn!(
            epoch = job.epoch,
            error = %primary_error,
            fallback = fallback.name(),
            "primary failed, engaging fallback"
        );
        phases.push(RunPhase::RequestingFallback);

        let outcome = match self
            .attempt(
                fallback.as_ref(),
                &job,
                self.policy.fallback_timeout,
                &cancel,
                &mut attempts,
            )
            .await
        {
            Attempt::Ok(result) => {
                phases.push(RunPhase::Succeeded);
                RunOutcome::Succeeded(result)
            }
            Attempt::Cancelled => RunOutcome::Cancelled,
            Attempt::Err(fallback_error) => {
                phases.push(RunPhase::Failed);
                RunOutcome::Failed(combine_failures(&primary_error, fallback_error))
            }
        };
        self.finish(job, outcome, attempts, phases, started)
    }

    async fn attempt(
        &self,
        engine: &dyn InferenceEngine,
        job: &InferenceJob,
        timeout: Duration,
        cancel: &CancelSignal,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Attempt {
        if cancel.is_cancelled() {
            return Attempt::Cancelled;
        }

        let kind = engine.kind();
        let request = InferenceRequest::new(
            kind,
            job.subject.clone(),
            job.garment.clone(),
            job.category,
            job.epoch,
            timeout,
        );
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(timeout, engine.infer(&request)) => Some(match r {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Timeout(format!("{} ms", timeout.as_millis()))),
            }),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let Some(result) = result else {
            info!(epoch = job.epoch, engine = %kind, "attempt abandoned on cancellation");
            return Attempt::Cancelled;
        };

        match result {
            Ok(output) => {
                attempts.push(AttemptRecord {
                    request_id: request.id,
                    engine: kind,
                    elapsed_ms,
                    error: None,
                });
                Attempt::Ok(InferenceResult {
                    result_ref: output.result_ref,
                    engine_used: kind,
                    latency_ms: elapsed_ms,
                    epoch: job.epoch,
                })
            }
            Err(e) => {
                let record = e.to_record(kind);
                warn!(
                    epoch = job.epoch,
                    engine = %kind,
                    kind = record.kind.as_str(),
                    retryable = record.retryable,
                    elapsed_ms,
                    "attempt failed: {e}"
                );
                attempts.push(AttemptRecord {
                    request_id: request.id,
                    engine: kind,
                    elapsed_ms,
                    error: Some(record.clone()),
                });
                Attempt::Err(record)
            }
        }
    }

    fn finish(
        &self,
        job: InferenceJob,
        outcome: RunOutcome,
        attempts: Vec<AttemptRecord>,
        phases: Vec<RunPhase>,
        started: Instant,
    ) -> RunReport {
        let total_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            RunOutcome::Succeeded(r) => info!(
                epoch = job.epoch,
                engine = %r.engine_used,
                total_ms,
                "inference run succeeded"
            ),
            RunOutcome::Failed(e) => warn!(epoch = job.epoch, total_ms, error = %e, "inference run failed"),
            RunOutcome::Cancelled => info!(epoch = job.epoch, total_ms, "inference run cancelled"),
        }
        RunReport {
            session_id: job.session_id,
            epoch: job.epoch,
            outcome,
            attempts,
            phases,
            total_ms,
        }
    }
}

/// Terminal error after both engines failed. The fallback only runs after a
/// retryable primary error, so exhaustion stays retryable: a validation
/// rejection from the fallback keeps the primary's kind instead.
fn combine_failures(primary: &ErrorRecord, fallback: ErrorRecord) -> ErrorRecord {
    let kind = if fallback.kind.is_retryable() {
        fallback.kind
    } else {
        primary.kind
    };
    ErrorRecord::new(
        ErrorStage::Inference,
        kind,
        format!("{}; {}", primary.message, fallback.message),
    )
    .with_engines(&[EngineKind::Primary, EngineKind::Fallback])
}
