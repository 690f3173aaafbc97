//! Per-request coordination of the recognition pipeline.
//!
//! [`PredictionOrchestrator::predict`] hands back a lazy stream of session
//! snapshots, one per state transition:
//!
//! ```text
//! preprocessing -> [loadingModel] -> inferring -> classified
//!     -> lookingUpNutrition -> succeeded
//!     -> rejected
//! any stage -> failed
//! ```
//!
//! Every request gets a sequence number when it is submitted. Only the latest
//! sequence for a user may write that user's session; an older stream stops
//! at its next step without publishing anything.

use crate::error::{InferenceError, PipelineError};
use crate::ingestor::{ImageIngestor, ImageSample, InputTensor};
use crate::metrics::{stage, PipelineMetrics};
use crate::models::inference::{InferenceEngine, ModelHandle};
use crate::models::policy::ClassificationPolicy;
use crate::models::registry::ModelRegistry;
use crate::nutrition::NutritionLookup;
use crate::types::session::{PredictionSession, SessionStatus};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Latest request and committed session for one user
struct UserSlot {
    latest: u64,
    session: PredictionSession,
}

/// Sequences ingest, inference, policy and nutrition lookup for each request
pub struct PredictionOrchestrator {
    registry: Arc<ModelRegistry>,
    ingestor: ImageIngestor,
    engine: InferenceEngine,
    policy: ClassificationPolicy,
    nutrition: Arc<dyn NutritionLookup>,
    metrics: Arc<PipelineMetrics>,
    sequence: AtomicU64,
    sessions: RwLock<HashMap<String, UserSlot>>,
}

impl PredictionOrchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        ingestor: ImageIngestor,
        engine: InferenceEngine,
        policy: ClassificationPolicy,
        nutrition: Arc<dyn NutritionLookup>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            registry,
            ingestor,
            engine,
            policy,
            nutrition,
            metrics,
            sequence: AtomicU64::new(0),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Submit a photo for `user_id`.
    ///
    /// The request supersedes any earlier one for the same user as soon as
    /// this returns. Nothing else happens until the stream is polled; the
    /// last item is a terminal session unless the request was superseded.
    pub fn predict(
        self: &Arc<Self>,
        user_id: impl Into<String>,
        sample: ImageSample,
    ) -> impl Stream<Item = PredictionSession> + Send + 'static {
        let session = self.register(user_id.into());

        let run = SessionRun {
            orchestrator: self.clone(),
            session,
            stage: Stage::Begin(sample),
            started: Instant::now(),
        };

        futures::stream::unfold(run, SessionRun::advance)
    }

    /// Drive a request to completion. `None` if it was superseded.
    pub async fn run(
        self: &Arc<Self>,
        user_id: impl Into<String>,
        sample: ImageSample,
    ) -> Option<PredictionSession> {
        let mut updates = Box::pin(self.predict(user_id, sample));
        let mut last = None;
        while let Some(session) = updates.next().await {
            last = Some(session);
        }
        last.filter(|s| s.status.is_terminal())
    }

    /// Latest committed session for `user_id`
    pub fn current(&self, user_id: &str) -> Option<PredictionSession> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.get(user_id).map(|slot| slot.session.clone())
    }

    /// Issue a sequence number and install a fresh idle session for the user.
    fn register(&self, user_id: String) -> PredictionSession {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let session = PredictionSession::new(user_id.clone(), sequence);

        let mut sessions = self.write_sessions();
        if let Some(previous) = sessions.get(&user_id) {
            if !previous.session.status.is_terminal() {
                debug!(
                    user_id = %user_id,
                    superseded = previous.latest,
                    sequence,
                    "New request supersedes running session"
                );
            }
        }
        sessions.insert(
            user_id,
            UserSlot {
                latest: sequence,
                session: session.clone(),
            },
        );

        self.metrics.record_started();
        session
    }

    /// Whether `session` belongs to the user's latest request
    pub fn is_current(&self, session: &PredictionSession) -> bool {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .get(&session.user_id)
            .is_some_and(|slot| slot.latest == session.sequence)
    }

    /// Store `session` if it still belongs to the latest request.
    fn commit(&self, session: &PredictionSession) -> bool {
        let mut sessions = self.write_sessions();
        match sessions.get_mut(&session.user_id) {
            Some(slot) if slot.latest == session.sequence => {
                slot.session = session.clone();
                true
            }
            _ => false,
        }
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<String, UserSlot>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Work left to do for one request
enum Stage {
    Begin(ImageSample),
    Preprocess(ImageSample),
    LoadModel(InputTensor),
    Infer(ModelHandle, InputTensor),
    Decide,
    Lookup,
    Done,
}

struct SessionRun {
    orchestrator: Arc<PredictionOrchestrator>,
    session: PredictionSession,
    stage: Stage,
    started: Instant,
}

impl SessionRun {
    async fn advance(mut self) -> Option<(PredictionSession, Self)> {
        let step = std::mem::replace(&mut self.stage, Stage::Done);
        if matches!(step, Stage::Done) {
            return None;
        }
        if !self.orchestrator.is_current(&self.session) {
            return self.superseded();
        }

        let orchestrator = self.orchestrator.clone();
        match step {
            Stage::Begin(sample) => {
                self.session.transition(SessionStatus::Preprocessing);
                self.stage = Stage::Preprocess(sample);
                self.emit()
            }

            Stage::Preprocess(sample) => {
                let t = Instant::now();
                let tensor = match orchestrator.ingestor.to_tensor(sample).await {
                    Ok(tensor) => tensor,
                    Err(e) => return self.fail(e.into()),
                };
                orchestrator.metrics.record_stage_time(stage::PREPROCESS, t.elapsed());

                match orchestrator.registry.cached() {
                    Some(model) => {
                        self.session.transition(SessionStatus::Inferring);
                        self.stage = Stage::Infer(model, tensor);
                    }
                    None => {
                        self.session.transition(SessionStatus::LoadingModel);
                        self.stage = Stage::LoadModel(tensor);
                    }
                }
                self.emit()
            }

            Stage::LoadModel(tensor) => {
                let t = Instant::now();
                let model = match orchestrator.registry.ensure_loaded().await {
                    Ok(model) => model,
                    Err(e) => return self.fail(e.into()),
                };
                orchestrator.metrics.record_stage_time(stage::MODEL_LOAD, t.elapsed());

                self.session.transition(SessionStatus::Inferring);
                self.stage = Stage::Infer(model, tensor);
                self.emit()
            }

            Stage::Infer(model, tensor) => {
                let t = Instant::now();
                let engine_owner = orchestrator.clone();
                let prediction = tokio::task::spawn_blocking(move || {
                    engine_owner.engine.predict(&model, tensor)
                })
                .await
                .unwrap_or_else(|e| Err(InferenceError::Runtime(e.to_string())));

                let vector = match prediction {
                    Ok(vector) => vector,
                    Err(e) => return self.fail(e.into()),
                };
                orchestrator.metrics.record_stage_time(stage::INFERENCE, t.elapsed());

                let classification = orchestrator.policy.classify(vector);
                orchestrator.metrics.record_classification(&classification);
                debug!(
                    user_id = %self.session.user_id,
                    label = %classification.label,
                    confidence = classification.confidence,
                    accepted = classification.accepted,
                    "Image classified"
                );

                self.session.classified(classification);
                self.stage = Stage::Decide;
                self.emit()
            }

            Stage::Decide => {
                let accepted = self
                    .session
                    .classification
                    .as_ref()
                    .is_some_and(|c| c.accepted);
                if accepted {
                    self.session.transition(SessionStatus::LookingUpNutrition);
                    self.stage = Stage::Lookup;
                } else {
                    self.session.reject();
                }
                self.emit()
            }

            Stage::Lookup => {
                let label = self
                    .session
                    .classification
                    .as_ref()
                    .map(|c| c.label.clone())
                    .unwrap_or_default();

                let t = Instant::now();
                let nutrition = orchestrator.nutrition.lookup(&label).await;
                orchestrator.metrics.record_stage_time(stage::NUTRITION, t.elapsed());
                orchestrator.metrics.record_nutrition(nutrition.is_some());

                self.session.succeed(nutrition);
                self.emit()
            }

            Stage::Done => None,
        }
    }

    /// Commit the current snapshot and hand it to the subscriber.
    fn emit(mut self) -> Option<(PredictionSession, Self)> {
        if !self.orchestrator.commit(&self.session) {
            return self.superseded();
        }

        let status = self.session.status;
        if status.is_terminal() {
            self.stage = Stage::Done;
            let metrics = &self.orchestrator.metrics;
            metrics.record_outcome(status, self.started.elapsed());
            if let Some(error) = &self.session.error {
                metrics.record_failure(error.kind);
            }
            info!(
                user_id = %self.session.user_id,
                sequence = self.session.sequence,
                status = status.as_str(),
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Prediction finished"
            );
        }

        Some((self.session.clone(), self))
    }

    fn fail(mut self, err: PipelineError) -> Option<(PredictionSession, Self)> {
        warn!(
            user_id = %self.session.user_id,
            sequence = self.session.sequence,
            kind = err.kind().as_str(),
            error = %err,
            "Prediction failed"
        );
        self.session.fail(&err);
        self.emit()
    }

    fn superseded(self) -> Option<(PredictionSession, Self)> {
        debug!(
            user_id = %self.session.user_id,
            sequence = self.session.sequence,
            status = self.session.status.as_str(),
            "Discarding superseded request"
        );
        self.orchestrator.metrics.record_superseded();
        None
    }
}
