//! SessionStateMachine - owner of one try-on session.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │            SessionStateMachine (Clone handle)                │
//! ├──────────────────────────────────────────────────────────────┤
//! │  state:   Arc<Mutex<SessionState>>  session, events, inflight│
//! │  results: Arc<ResultStore>          watch-backed terminal    │
//! │  deps:    Arc<SessionDeps>          uploader, orchestrator,  │
//! │                                     generator, health probe  │
//! └──────────────────────────────────────────────────────────────┘
//!        │ confirm_and_generate()
//!        ▼
//!   tokio::spawn(orchestrator.run(job, cancel)) ──► apply_report()
//! ```
//!
//! The lock is never held across a network call. Every write that follows an
//! await re-checks the session id and step, and a run's report is applied
//! only when its epoch is the one the session is still waiting for.
//!
//! Steps: `DescribeOrSelectGarment → UploadSubject → ReviewAndConfirm →
//! Generating → Done | Failed`. Acquisitions advance the step as far as the
//! guards allow and never move it backwards.

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::{cancel_pair, CancelHandle};
use crate::classifier::{CategoryClassifier, CategorySource};
use crate::config::TryOnConfig;
use crate::engine::InferenceEngine;
use crate::error::{ErrorRecord, ErrorStage, Result, TryOnError};
use crate::events::{EventLog, RecordedEvent, SessionEvent};
use crate::garment::{
    generate_garment, GarmentGenerator, GarmentSelection, GenerationError, UnavailableGenerator,
};
use crate::health::HealthProbe;
use crate::http::{
    build_client, FallbackHttpEngine, HttpGarmentGenerator, HttpHealthProbe, HttpUploadBackend,
    PrimaryHttpEngine,
};
use crate::orchestrator::{AttemptPolicy, InferenceJob, InferenceOrchestrator, RunOutcome, RunReport};
use crate::result_store::{ResultState, ResultStore, TerminalRecord};
use crate::types::*;
use crate::uploader::{AssetUploader, UploadLimits};

// ─── Collaborators ────────────────────────────────────────────

/// Remote collaborators of a session.
pub struct SessionDeps {
    pub uploader: Arc<AssetUploader>,
    pub orchestrator: Arc<InferenceOrchestrator>,
    pub garments: Arc<dyn GarmentGenerator>,
    pub health: Option<Arc<dyn HealthProbe>>,
}

impl SessionDeps {
    pub fn new(uploader: AssetUploader, orchestrator: InferenceOrchestrator) -> Self {
        Self {
            uploader: Arc::new(uploader),
            orchestrator: Arc::new(orchestrator),
            garments: Arc::new(UnavailableGenerator),
            health: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn GarmentGenerator>) -> Self {
        self.garments = generator;
        self
    }

    pub fn with_health(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health = Some(probe);
        self
    }

    /// HTTP adapters for every collaborator, sharing one client.
    pub fn http(config: &TryOnConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| TryOnError::Config(e.to_string()))?;
        let client = build_client()?;

        let uploader = AssetUploader::new(
            Arc::new(HttpUploadBackend::new(
                client.clone(),
                &config.primary_base_url,
                config.upload_timeout(),
            )),
            UploadLimits::from_config(config),
        );

        let primary: Arc<dyn InferenceEngine> = Arc::new(PrimaryHttpEngine::new(
            client.clone(),
            &config.primary_base_url,
            config.primary_engine_flag,
        ));
        let fallback: Option<Arc<dyn InferenceEngine>> =
            if config.fallback_base_url.trim().is_empty() {
                None
            } else {
                Some(Arc::new(FallbackHttpEngine::new(
                    client.clone(),
                    &config.fallback_base_url,
                    &config.primary_base_url,
                )))
            };
        let orchestrator =
            InferenceOrchestrator::new(primary, fallback, AttemptPolicy::from_config(config));

        Ok(Self::new(uploader, orchestrator)
            .with_generator(Arc::new(HttpGarmentGenerator::new(
                client.clone(),
                &config.primary_base_url,
                config.generation_timeout(),
            )))
            .with_health(Arc::new(HttpHealthProbe::new(client, config))))
    }
}

// ─── State ────────────────────────────────────────────────────

struct InflightRun {
    epoch: Epoch,
    session_id: Uuid,
    cancel: CancelHandle,
}

struct SessionState {
    session: Session,
    events: EventLog,
    inflight: Option<InflightRun>,
}

/// Handle to a spawned orchestrator run.
pub struct GenerationTicket {
    pub epoch: Epoch,
    pub session_id: Uuid,
    handle: JoinHandle<Session>,
}

impl GenerationTicket {
    /// Session snapshot once the run's report has been applied (or discarded).
    pub async fn wait(self) -> Result<Session> {
        Ok(self.handle.await?)
    }
}

#[derive(Clone)]
pub struct SessionStateMachine {
    state: Arc<Mutex<SessionState>>,
    results: Arc<ResultStore>,
    deps: Arc<SessionDeps>,
    classifier: CategoryClassifier,
}

impl SessionStateMachine {
    pub fn new(deps: SessionDeps) -> Self {
        let session = Session::new(0);
        let mut events = EventLog::new();
        events.append(SessionEvent::SessionStarted {
            session_id: session.id,
        });
        info!(session_id = %session.id, "session started");
        Self {
            state: Arc::new(Mutex::new(SessionState {
                session,
                events,
                inflight: None,
            })),
            results: Arc::new(ResultStore::new()),
            deps: Arc::new(deps),
            classifier: CategoryClassifier::new(),
        }
    }

    pub fn from_config(config: &TryOnConfig) -> Result<Self> {
        Ok(Self::new(SessionDeps::http(config)?))
    }

    // ─── Observation ──────────────────────────────────────────

    pub async fn snapshot(&self) -> Session {
        self.state.lock().await.session.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResultState> {
        self.results.subscribe()
    }

    pub fn result_state(&self) -> ResultState {
        self.results.current()
    }

    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().await.events.all().to_vec()
    }

    pub async fn fallback_attempts(&self, epoch: Epoch) -> usize {
        self.state.lock().await.events.fallback_attempts(epoch)
    }

    /// Epoch of the run currently awaited, if any.
    pub async fn in_flight(&self) -> Option<Epoch> {
        self.state.lock().await.inflight.as_ref().map(|r| r.epoch)
    }

    /// Probe both engines and annotate the session. Returns `None` when no
    /// probe is configured.
    pub async fn refresh_availability(&self) -> Option<EngineAvailability> {
        let probe = self.deps.health.clone()?;
        let availability = probe.probe().await;

        let mut st = self.state.lock().await;
        st.session.availability = Some(availability);
        st.events
            .append(SessionEvent::AvailabilityProbed { availability });
        if !availability.all_ready() {
            warn!(
                primary = availability.primary,
                fallback = availability.fallback,
                "not every engine reports ready"
            );
        }
        Some(availability)
    }

    // ─── Acquisition ──────────────────────────────────────────

    /// Stage the subject photo. Accepted before or after the garment.
    pub async fn upload_subject(&self, file: LocalFile) -> Result<Session> {
        const OP: &str = "upload a subject photo";
        let session_id = self.begin_acquisition(OP).await?;

        match self.deps.uploader.stage(file, AssetRole::Subject).await {
            Ok(asset) => {
                self.commit_asset(session_id, OP, AssetRole::Subject, |session| {
                    session.subject_asset = Some(asset);
                })
                .await
            }
            Err(e) => {
                self.attach_error(session_id, e.to_record()).await;
                Err(e.into())
            }
        }
    }

    pub async fn select_garment(&self, selection: GarmentSelection) -> Result<Session> {
        const OP: &str = "select a garment";
        let session_id = self.begin_acquisition(OP).await?;

        match selection {
            GarmentSelection::Upload { file, description } => {
                let asset = match self.deps.uploader.stage(file, AssetRole::Garment).await {
                    Ok(asset) => asset,
                    Err(e) => {
                        self.attach_error(session_id, e.to_record()).await;
                        return Err(e.into());
                    }
                };
                let description = description
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty());
                self.commit_asset(session_id, OP, AssetRole::Garment, |session| {
                    session.garment_asset = Some(asset);
                    session.garment_description = description;
                    session.category_hint = None;
                })
                .await
            }
            GarmentSelection::Catalog(item) => {
                if item.image_path.trim().is_empty() {
                    let error = ErrorRecord::validation(
                        ErrorStage::Upload,
                        format!("catalog item {} has no image", item.item_id),
                    );
                    self.attach_error(session_id, error.clone()).await;
                    return Err(TryOnError::Validation(error.message));
                }
                let asset = item.to_asset();
                self.commit_asset(session_id, OP, AssetRole::Garment, |session| {
                    session.garment_asset = Some(asset);
                    session.garment_description = Some(item.name.clone());
                    session.category_hint = item.category;
                })
                .await
            }
            GarmentSelection::Describe(text) => {
                let generated = match generate_garment(self.deps.garments.as_ref(), &text).await {
                    Ok(g) => g,
                    Err(e) => {
                        self.attach_error(session_id, e.to_record()).await;
                        return Err(match e {
                            GenerationError::EmptyPrompt => {
                                TryOnError::Validation("garment description is empty".to_string())
                            }
                            other => other.into(),
                        });
                    }
                };
                let asset = generated.to_asset();
                let description = text.trim().to_string();
                self.commit_asset(session_id, OP, AssetRole::Garment, |session| {
                    session.garment_asset = Some(asset);
                    session.garment_description = Some(description);
                    session.category_hint = None;
                })
                .await
            }
        }
    }

    /// Text-to-garment shorthand for `select_garment(GarmentSelection::Describe(..))`.
    pub async fn describe_garment(&self, text: impl Into<String>) -> Result<Session> {
        self.select_garment(GarmentSelection::Describe(text.into()))
            .await
    }

    async fn begin_acquisition(&self, operation: &'static str) -> Result<Uuid> {
        let st = self.state.lock().await;
        if !st.session.step.accepts_assets() {
            return Err(TryOnError::InvalidTransition {
                from: st.session.step,
                operation,
            });
        }
        Ok(st.session.id)
    }

    async fn attach_error(&self, session_id: Uuid, error: ErrorRecord) {
        let mut st = self.state.lock().await;
        if st.session.id == session_id && st.session.step.accepts_assets() {
            warn!(session_id = %session_id, error = %error, "acquisition failed");
            st.session.last_error = Some(error);
        }
    }

    async fn commit_asset<F>(
        &self,
        session_id: Uuid,
        operation: &'static str,
        role: AssetRole,
        apply: F,
    ) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut st = self.state.lock().await;
        if st.session.id != session_id || !st.session.step.accepts_assets() {
            warn!(session_id = %session_id, operation, "session moved on; asset discarded");
            return Err(TryOnError::Superseded { operation });
        }

        apply(&mut st.session);
        st.session.last_error = None;
        st.session.category = None;

        let event = match role {
            AssetRole::Subject => st.session.subject_asset.as_ref(),
            AssetRole::Garment => st.session.garment_asset.as_ref(),
        }
        .and_then(staged_event);
        if let Some(event) = event {
            st.events.append(event);
        }

        let before = st.session.step;
        advance(&mut st.session);
        if st.session.step != before {
            info!(session_id = %session_id, from = %before, to = %st.session.step, "step advanced");
        }
        Ok(st.session.clone())
    }

    // ─── Generation ───────────────────────────────────────────

    /// `ReviewAndConfirm → Generating`: resolve the category, bump the epoch
    /// and spawn the orchestrator run.
    pub async fn confirm_and_generate(&self) -> Result<GenerationTicket> {
        let mut st = self.state.lock().await;
        if st.session.step != Step::ReviewAndConfirm {
            return Err(TryOnError::InvalidTransition {
                from: st.session.step,
                operation: "confirm and generate",
            });
        }

        let subject = st.session.subject_asset.as_ref().and_then(SubjectRef::from_asset);
        let garment = st.session.garment_asset.as_ref().and_then(GarmentRef::from_asset);
        let (Some(subject), Some(garment)) = (subject, garment) else {
            let error = ErrorRecord::validation(
                ErrorStage::Inference,
                "subject and garment must both be staged",
            );
            st.session.last_error = Some(error.clone());
            return Err(TryOnError::Validation(error.message));
        };

        let (category, source) = self.classifier.resolve(
            st.session.category_hint,
            st.session.garment_description.as_deref(),
        );
        st.session.category = Some(category);
        st.events.append(SessionEvent::CategoryResolved {
            category,
            source: describe_source(source),
        });

        st.session.request_epoch += 1;
        let epoch = st.session.request_epoch;
        let session_id = st.session.id;
        st.session.step = Step::Generating;
        st.session.result = None;
        st.session.last_error = None;
        self.results.clear();

        let (cancel, signal) = cancel_pair();
        st.inflight = Some(InflightRun {
            epoch,
            session_id,
            cancel,
        });
        st.events.append(SessionEvent::GenerationStarted { epoch });
        info!(
            session_id = %session_id,
            epoch,
            category = category.wire_label(),
            "generation started"
        );
        drop(st);

        let job = InferenceJob {
            session_id,
            epoch,
            subject,
            garment,
            category,
        };
        let machine = self.clone();
        let handle = tokio::spawn(async move {
            let report = machine.deps.orchestrator.run(job, signal).await;
            machine.apply_report(report).await
        });

        Ok(GenerationTicket {
            epoch,
            session_id,
            handle,
        })
    }

    /// Confirm and wait for the terminal snapshot.
    pub async fn generate(&self) -> Result<Session> {
        self.confirm_and_generate().await?.wait().await
    }

    async fn apply_report(&self, report: RunReport) -> Session {
        let mut st = self.state.lock().await;
        let epoch = report.epoch;

        for attempt in &report.attempts {
            if attempt.engine == EngineKind::Fallback {
                st.events.append(SessionEvent::FallbackEngaged { epoch });
            }
            st.events.append(SessionEvent::AttemptStarted {
                epoch,
                engine: attempt.engine,
            });
            if let Some(error) = &attempt.error {
                st.events.append(SessionEvent::AttemptFailed {
                    epoch,
                    engine: attempt.engine,
                    error: error.clone(),
                });
            }
        }

        let awaited = st
            .inflight
            .as_ref()
            .is_some_and(|r| r.epoch == epoch && r.session_id == report.session_id);
        if awaited {
            st.inflight = None;
        }

        if matches!(report.outcome, RunOutcome::Cancelled) {
            st.events.append(SessionEvent::RunCancelled { epoch });
            return st.session.clone();
        }

        let current = awaited
            && st.session.id == report.session_id
            && st.session.request_epoch == epoch
            && st.session.step == Step::Generating;
        if !current {
            let current_epoch = st.session.request_epoch;
            warn!(
                epoch,
                current_epoch,
                session_id = %report.session_id,
                "stale inference response discarded"
            );
            st.events.append(SessionEvent::StaleResponseDiscarded {
                epoch,
                current_epoch,
            });
            return st.session.clone();
        }

        match report.outcome {
            RunOutcome::Succeeded(result) => {
                st.events.append(SessionEvent::Succeeded {
                    epoch,
                    engine: result.engine_used,
                    result_ref: result.result_ref.clone(),
                });
                st.session.result = Some(result.clone());
                st.session.step = self.results.record(epoch, TerminalRecord::Success(result));
            }
            RunOutcome::Failed(error) => {
                st.events.append(SessionEvent::Failed {
                    epoch,
                    error: error.clone(),
                });
                st.session.last_error = Some(error.clone());
                st.session.step = self.results.record(epoch, TerminalRecord::Failure(error));
            }
            RunOutcome::Cancelled => {}
        }
        info!(
            session_id = %st.session.id,
            epoch,
            step = %st.session.step,
            total_ms = report.total_ms,
            "generation finished"
        );
        st.session.clone()
    }

    // ─── Resets ───────────────────────────────────────────────

    /// Any step → `DescribeOrSelectGarment` with a fresh session id. Cancels
    /// the in-flight run first. The epoch counter carries over; the event log
    /// starts again at the `Reset` entry.
    pub async fn reset(&self) -> Session {
        let mut st = self.state.lock().await;
        if let Some(run) = st.inflight.take() {
            run.cancel.cancel();
            info!(epoch = run.epoch, "in-flight run cancelled by reset");
        }

        let previous = st.session.id;
        let mut session = Session::new(st.session.request_epoch);
        session.availability = st.session.availability;
        st.session = session;
        self.results.clear();

        let new_session = st.session.id;
        st.events.restart(SessionEvent::Reset {
            previous_session: previous,
            new_session,
        });
        info!(previous = %previous, session_id = %new_session, "session reset");
        st.session.clone()
    }

    /// Keep the subject, drop the garment and the outcome.
    pub async fn try_another_style(&self) -> Result<Session> {
        let mut st = self.state.lock().await;
        if !st.session.step.is_terminal() {
            return Err(TryOnError::InvalidTransition {
                from: st.session.step,
                operation: "try another style",
            });
        }

        let session = &mut st.session;
        session.garment_asset = None;
        session.garment_description = None;
        session.category_hint = None;
        session.category = None;
        session.result = None;
        session.last_error = None;
        session.step = Step::DescribeOrSelectGarment;
        let session_id = session.id;
        self.results.clear();

        st.events.append(SessionEvent::StyleCleared { session_id });
        Ok(st.session.clone())
    }

    /// `Failed → ReviewAndConfirm` with both assets kept. Refused when the
    /// recorded error is not retryable.
    pub async fn retry(&self) -> Result<Session> {
        let mut st = self.state.lock().await;
        if st.session.step != Step::Failed {
            return Err(TryOnError::InvalidTransition {
                from: st.session.step,
                operation: "retry",
            });
        }
        if let Some(error) = st.session.last_error.as_ref().filter(|e| !e.retryable) {
            return Err(TryOnError::NotRetryable(error.user_message()));
        }

        st.session.last_error = None;
        st.session.result = None;
        st.session.step = Step::ReviewAndConfirm;
        self.results.clear();
        let epoch = st.session.request_epoch;
        st.events.append(SessionEvent::RetryRequested { epoch });
        Ok(st.session.clone())
    }
}

fn advance(session: &mut Session) {
    if session.step == Step::DescribeOrSelectGarment && session.garment_ready() {
        session.step = Step::UploadSubject;
    }
    if session.step == Step::UploadSubject && session.subject_ready() {
        session.step = Step::ReviewAndConfirm;
    }
}

fn staged_event(asset: &Asset) -> Option<SessionEvent> {
    let remote_path = asset.remote_path.clone()?;
    Some(match asset.origin {
        AssetOrigin::Generated => SessionEvent::GarmentGenerated {
            remote_path,
            degraded: asset.degraded,
        },
        origin => SessionEvent::AssetStaged {
            role: asset.role,
            origin,
            remote_path,
        },
    })
}

fn describe_source(source: CategorySource) -> String {
    match source {
        CategorySource::Hint => "hint".to_string(),
        CategorySource::Keyword(keyword) => format!("keyword:{keyword}"),
        CategorySource::Default => "default".to_string(),
    }
}
