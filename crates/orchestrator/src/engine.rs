//! The orchestration engine facade.
//!
//! Callers describe what they want generated; the engine claims the
//! subject in the arena, registers the background task, launches the
//! provider job, and drives the poll / classify / backoff / adjust cycle
//! until success or exhaustion. Trailers run the same cycle per chain
//! link, with the chain coordinator deciding when to switch providers.

use crate::descriptor::{Generation, JobArena, JobDescriptor, SubjectKey};
use crate::error::OrchestratorError;
use crate::fallback::{compose_chain_report, LinkFailure, TrailerChain};
use crate::pointer::{PointerStore, TrailerPointer};
use crate::poller::{poll_to_terminal, PollOutcome, POLL_CADENCE};
use crate::registry::{BackgroundTask, TaskRegistry};
use crate::retry::{AttemptFailure, RetryPolicy, RetryState};
use crate::watchdog::WatchdogLimits;
use chrono::Utc;
use parking_lot::Mutex;
use providers::{
    AdjustmentRequest, JobKind, JobState, LaunchRequest, MediaProvider, PromptAdjuster,
};
use std::sync::Arc;
use std::time::Duration;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_cadence: Duration,
    /// How long a finished task stays visible in the registry.
    pub success_grace: Duration,
    pub failure_grace: Duration,
    /// Trailer pointers older than this are discarded at startup.
    pub pointer_expiry: Duration,
    /// Non-terminal registry entries older than this are treated as
    /// abandoned by an ungracefully-closed session.
    pub abandoned_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_cadence: POLL_CADENCE,
            success_grace: Duration::from_secs(6),
            failure_grace: Duration::from_secs(30),
            pointer_expiry: Duration::from_secs(10 * 60),
            abandoned_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// One logical request from a caller.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: JobKind,
    pub show_id: String,
    /// Character id for portraits/videos, show id for trailers/posters.
    pub subject_id: String,
    pub prompt: String,
    pub reference_image_url: Option<String>,
    /// Pipeline position for progress ordering.
    pub step_number: u32,
}

impl GenerationRequest {
    pub fn character_id(&self) -> Option<String> {
        match self.kind {
            JobKind::Portrait | JobKind::Video => Some(self.subject_id.clone()),
            JobKind::Trailer | JobKind::Poster => None,
        }
    }
}

/// How a logical request ended, short of exhaustion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Succeeded {
        output_url: String,
        model_used: String,
        attempts: u32,
        used_adjustment: bool,
    },
    /// A newer request claimed this subject; this one stepped aside.
    Superseded,
}

enum LinkOutcome {
    Succeeded { output_url: String, model_used: String },
    Superseded,
    Exhausted { link_attempts: u32, detail: String },
}

pub struct Orchestrator {
    arena: Arc<Mutex<JobArena>>,
    registry: TaskRegistry,
    adjuster: Arc<dyn PromptAdjuster>,
    pointer_store: Arc<dyn PointerStore>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(adjuster: Arc<dyn PromptAdjuster>, pointer_store: Arc<dyn PointerStore>) -> Self {
        Self::with_config(adjuster, pointer_store, EngineConfig::default())
    }

    pub fn with_config(
        adjuster: Arc<dyn PromptAdjuster>,
        pointer_store: Arc<dyn PointerStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            arena: Arc::new(Mutex::new(JobArena::new())),
            registry: TaskRegistry::new(),
            adjuster,
            pointer_store,
            config,
        }
    }

    /// The shared ledger of in-flight work; UI layers subscribe here.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Current descriptor for a subject, if any.
    pub fn descriptor(&self, kind: JobKind, subject_id: &str) -> Option<JobDescriptor> {
        self.arena.lock().snapshot(&(kind, subject_id.to_string()))
    }

    /// Run one logical generation request to success or exhaustion.
    ///
    /// Calling this again for the same `(kind, subject)` is the restart
    /// path: the previous claim is invalidated first, its registry entry
    /// removed, and its provider job cancelled best-effort, all before
    /// the new launch goes out.
    pub async fn generate(
        &self,
        provider: Arc<dyn MediaProvider>,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let key: SubjectKey = (request.kind, request.subject_id.clone());
        let generation = self.claim(&key, &request);

        let policy = RetryPolicy::for_kind(request.kind);
        let mut state = RetryState::default();

        match self
            .run_link(&provider, &request, &key, generation, &policy, &mut state, false)
            .await
        {
            LinkOutcome::Succeeded {
                output_url,
                model_used,
            } => Ok(self.finish_success(&key, generation, output_url, model_used, &state)),
            LinkOutcome::Superseded => Ok(GenerationOutcome::Superseded),
            LinkOutcome::Exhausted {
                link_attempts,
                detail,
            } => {
                let message = format!(
                    "{} generation failed after {} attempt{}{}: {}",
                    request.kind,
                    link_attempts,
                    if link_attempts == 1 { "" } else { "s" },
                    if state.used_adjustment() {
                        " (prompt was AI-adjusted)"
                    } else {
                        ""
                    },
                    detail
                );
                Err(self.finish_failure(&key, generation, link_attempts, &state, message))
            }
        }
    }

    /// Run the trailer fallback chain to success or chain-wide give-up.
    pub async fn generate_trailer(
        &self,
        chain: &TrailerChain,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let request = GenerationRequest {
            kind: JobKind::Trailer,
            ..request
        };
        if chain.links.is_empty() {
            return Err(OrchestratorError::exhausted(
                0,
                false,
                "trailer chain has no links".to_string(),
            ));
        }

        let key: SubjectKey = (JobKind::Trailer, request.subject_id.clone());
        let generation = self.claim(&key, &request);

        let policy = RetryPolicy::trailer_link();
        // One retry state spans the whole chain: the adjustment
        // collaborator is consulted at most once chain-wide and its
        // rewrite carries into later links.
        let mut state = RetryState::default();
        let mut failures: Vec<LinkFailure> = Vec::new();

        for (index, link) in chain.links.iter().enumerate() {
            if index > 0 {
                state.reset_for_link();
                if self
                    .arena
                    .lock()
                    .with_current(&key, generation, |d| d.begin_attempt())
                    .is_none()
                {
                    return Ok(GenerationOutcome::Superseded);
                }
            }

            log::info!(
                "trailer chain for {}: link {}/{} via {}",
                request.show_id,
                index + 1,
                chain.links.len(),
                link.label
            );

            match self
                .run_link(
                    &link.provider,
                    &request,
                    &key,
                    generation,
                    &policy,
                    &mut state,
                    link.drop_reference,
                )
                .await
            {
                LinkOutcome::Succeeded {
                    output_url,
                    model_used,
                } => return Ok(self.finish_success(&key, generation, output_url, model_used, &state)),
                LinkOutcome::Superseded => return Ok(GenerationOutcome::Superseded),
                LinkOutcome::Exhausted {
                    link_attempts,
                    detail,
                } => failures.push(LinkFailure {
                    label: link.label.clone(),
                    attempts: link_attempts,
                    detail,
                }),
            }
        }

        let total_attempts = self
            .arena
            .lock()
            .snapshot(&key)
            .map(|d| d.attempt)
            .unwrap_or(0);
        let message = compose_chain_report(&failures);
        Err(self.finish_failure(&key, generation, total_attempts, &state, message))
    }

    /// Startup reconciliation: prune abandoned registry entries and, if a
    /// still-valid trailer pointer exists, re-attach a poller to it.
    ///
    /// A resumed job carries no prompt context, so it gets no retries,
    /// and its watchdog budget is whatever remains of the original
    /// wall-clock window after the pointer's age is deducted.
    /// `Ok(None)` means there was nothing to resume.
    pub async fn resume_trailer(
        &self,
        provider: Arc<dyn MediaProvider>,
    ) -> Result<Option<GenerationOutcome>, OrchestratorError> {
        self.registry.prune_abandoned(self.config.abandoned_ttl);

        let pointer = match self.pointer_store.get() {
            Ok(pointer) => pointer,
            Err(err) => {
                log::warn!("trailer pointer unreadable, ignoring: {}", err);
                None
            }
        };
        let Some(pointer) = pointer else {
            return Ok(None);
        };

        if pointer.is_expired(self.config.pointer_expiry) {
            log::info!(
                "discarding expired trailer pointer for show {}",
                pointer.show_id
            );
            self.clear_pointer();
            return Ok(None);
        }

        let key: SubjectKey = (JobKind::Trailer, pointer.show_id.clone());
        let (generation, _) =
            self.arena
                .lock()
                .claim(JobKind::Trailer, &pointer.show_id, pointer.job_id.clone());
        {
            let mut arena = self.arena.lock();
            arena.with_current(&key, generation, |d| {
                d.job_id = Some(pointer.job_id.clone());
                d.started_at = pointer.started_at;
                d.model_used = Some(provider.model().to_string());
            });
            arena.set_provider(&key, generation, provider.clone());
        }

        let mut task = BackgroundTask::new(
            pointer.job_id.clone(),
            JobKind::Trailer,
            pointer.show_id.clone(),
            None,
            0,
        );
        task.metadata = serde_json::json!({ "resumed": true });
        self.registry.register(task);

        let mut limits = WatchdogLimits::for_kind(JobKind::Trailer);
        let age = Utc::now()
            .signed_duration_since(pointer.started_at)
            .to_std()
            .unwrap_or_default();
        limits.wall_clock = limits.wall_clock.saturating_sub(age);

        match poll_to_terminal(
            provider.as_ref(),
            &pointer.job_id,
            &self.arena,
            &key,
            generation,
            &self.registry,
            &limits,
            self.config.poll_cadence,
        )
        .await
        {
            PollOutcome::Succeeded { output_url } => {
                let state = RetryState::default();
                Ok(Some(self.finish_success(
                    &key,
                    generation,
                    output_url,
                    provider.model().to_string(),
                    &state,
                )))
            }
            PollOutcome::Superseded => Ok(Some(GenerationOutcome::Superseded)),
            PollOutcome::Failed(failure) => {
                let message = format!("resumed trailer failed: {}", failure.detail());
                Err(self.finish_failure(&key, generation, 1, &RetryState::default(), message))
            }
        }
    }

    /// Claim the subject and register the task, displacing (and cleaning
    /// up after) any previous claim as one sequence before the launch.
    fn claim(&self, key: &SubjectKey, request: &GenerationRequest) -> Generation {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (generation, superseded) =
            self.arena
                .lock()
                .claim(key.0, &key.1, correlation_id.clone());

        if let Some(old) = superseded {
            log::info!(
                "restarting {} for {}: superseding task {}",
                key.0,
                key.1,
                old.task_id
            );
            self.registry.remove(&old.task_id);
            // Cancel against the provider that launched the displaced job.
            if let (Some(job_id), Some(provider)) = (old.job_id, old.provider) {
                tokio::spawn(async move {
                    if let Err(err) = provider.cancel(&job_id).await {
                        log::debug!("best-effort cancel of {} failed: {}", job_id, err);
                    }
                });
            }
        }

        let mut task = BackgroundTask::new(
            correlation_id,
            key.0,
            request.show_id.clone(),
            request.character_id(),
            request.step_number,
        );
        task.metadata = serde_json::json!({ "attempt": 1, "prompt_adjusted": false });
        self.registry.register(task);

        generation
    }

    /// One chain link (or the whole request, for non-trailer kinds):
    /// launch and poll, retrying with backoff until the link's ceiling.
    #[allow(clippy::too_many_arguments)]
    async fn run_link(
        &self,
        provider: &Arc<dyn MediaProvider>,
        request: &GenerationRequest,
        key: &SubjectKey,
        generation: Generation,
        policy: &RetryPolicy,
        state: &mut RetryState,
        drop_reference: bool,
    ) -> LinkOutcome {
        let limits = WatchdogLimits::for_kind(request.kind);

        loop {
            let Some((attempt, task_id)) = self
                .arena
                .lock()
                .with_current(key, generation, |d| (d.attempt, d.task_id.clone()))
            else {
                return LinkOutcome::Superseded;
            };

            self.registry.update(&task_id, |task| {
                task.state = JobState::Starting;
                task.metadata = serde_json::json!({
                    "attempt": attempt,
                    "prompt_adjusted": state.used_adjustment(),
                    "provider": provider.name(),
                });
            });

            let launch_request = LaunchRequest {
                kind: request.kind,
                prompt: state
                    .adjusted_prompt
                    .clone()
                    .unwrap_or_else(|| request.prompt.clone()),
                reference_image_url: if drop_reference {
                    None
                } else {
                    request.reference_image_url.clone()
                },
                correlation_id: task_id.clone(),
            };

            log::info!(
                "launching {} for {} on {} (attempt {})",
                request.kind,
                request.subject_id,
                provider.name(),
                attempt
            );

            let failure = match provider.launch(&launch_request).await {
                Err(err) => AttemptFailure::Reported(err.to_string()),
                Ok(ticket) => {
                    let adopted = {
                        let mut arena = self.arena.lock();
                        let adopted = arena.with_current(key, generation, |d| {
                            d.job_id = Some(ticket.job_id.clone());
                            d.task_id = ticket.job_id.clone();
                            d.model_used = Some(provider.model().to_string());
                        });
                        if adopted.is_some() {
                            arena.set_provider(key, generation, provider.clone());
                        }
                        adopted
                    };
                    if adopted.is_none() {
                        // Superseded between request and response; the
                        // stray provider job gets a best-effort cancel.
                        let provider = provider.clone();
                        let job_id = ticket.job_id;
                        tokio::spawn(async move {
                            let _ = provider.cancel(&job_id).await;
                        });
                        return LinkOutcome::Superseded;
                    }
                    self.registry.rekey(&task_id, &ticket.job_id);
                    if request.kind == JobKind::Trailer {
                        self.save_pointer(&ticket.job_id, &request.show_id);
                    }

                    match poll_to_terminal(
                        provider.as_ref(),
                        &ticket.job_id,
                        &self.arena,
                        key,
                        generation,
                        &self.registry,
                        &limits,
                        self.config.poll_cadence,
                    )
                    .await
                    {
                        PollOutcome::Succeeded { output_url } => {
                            return LinkOutcome::Succeeded {
                                output_url,
                                model_used: provider.model().to_string(),
                            }
                        }
                        PollOutcome::Superseded => return LinkOutcome::Superseded,
                        PollOutcome::Failed(failure) => failure,
                    }
                }
            };

            let class = policy.classify(&failure);
            state.record_failure(&failure);
            log::warn!(
                "{} attempt {} for {} failed as {:?}: {}",
                request.kind,
                attempt,
                request.subject_id,
                class,
                failure.detail()
            );

            if state.retries_used >= policy.max_retries {
                return LinkOutcome::Exhausted {
                    link_attempts: state.retries_used + 1,
                    detail: failure.detail(),
                };
            }
            state.retries_used += 1;

            let will_adjust = state.wants_adjustment(policy);
            let delay = policy.backoff(class, state.retries_used, will_adjust);
            tokio::time::sleep(delay).await;

            // A user-initiated restart may have claimed the subject while
            // we slept; the scheduled retry is silently abandoned.
            if !self.arena.lock().is_current(key, generation) {
                return LinkOutcome::Superseded;
            }

            if will_adjust {
                self.consult_adjuster(request, &failure, attempt + 1, state)
                    .await;
                self.arena.lock().with_current(key, generation, |d| {
                    d.used_prompt_adjustment = state.used_adjustment();
                    d.adjusted_prompt = state.adjusted_prompt.clone();
                    d.adjustment_reason = state.adjustment_reason.clone();
                });
            }

            if self
                .arena
                .lock()
                .with_current(key, generation, |d| d.begin_attempt())
                .is_none()
            {
                return LinkOutcome::Superseded;
            }
        }
    }

    async fn consult_adjuster(
        &self,
        request: &GenerationRequest,
        failure: &AttemptFailure,
        attempt_number: u32,
        state: &mut RetryState,
    ) {
        let adjustment_request = AdjustmentRequest {
            original_prompt: request.prompt.clone(),
            generation_kind: request.kind,
            last_error_text: failure.detail(),
            attempt_number,
        };

        match self.adjuster.adjust(&adjustment_request).await {
            Ok(outcome) => {
                state.adjuster_consulted = true;
                if let Some((prompt, reason)) = outcome.adjusted() {
                    log::info!(
                        "prompt adjusted for {} {}: {}",
                        request.kind,
                        request.subject_id,
                        reason.unwrap_or("no reason given")
                    );
                    state.adjusted_prompt = Some(prompt.to_string());
                    state.adjustment_reason = reason.map(|r| r.to_string());
                } else {
                    log::info!(
                        "prompt adjustment declined for {} {}; keeping prior prompt",
                        request.kind,
                        request.subject_id
                    );
                }
            }
            Err(err) => {
                // Unavailable this round; keep the prior prompt. A later
                // eligible retry may ask again.
                log::warn!("prompt adjustment unavailable: {}", err);
            }
        }
    }

    fn finish_success(
        &self,
        key: &SubjectKey,
        generation: Generation,
        output_url: String,
        model_used: String,
        state: &RetryState,
    ) -> GenerationOutcome {
        let finished = self.arena.lock().with_current(key, generation, |d| {
            d.model_used = Some(model_used.clone());
            (d.attempt, d.task_id.clone())
        });
        if let Some((_, task_id)) = &finished {
            self.registry
                .remove_after(task_id, self.config.success_grace);
        }
        if key.0 == JobKind::Trailer {
            self.clear_pointer();
        }
        GenerationOutcome::Succeeded {
            output_url,
            model_used,
            attempts: finished.map(|(attempt, _)| attempt).unwrap_or(1),
            used_adjustment: state.used_adjustment(),
        }
    }

    fn finish_failure(
        &self,
        key: &SubjectKey,
        generation: Generation,
        attempts: u32,
        state: &RetryState,
        message: String,
    ) -> OrchestratorError {
        let task_id = self.arena.lock().with_current(key, generation, |d| {
            d.fail(message.clone());
            d.task_id.clone()
        });
        if let Some(task_id) = task_id {
            self.registry.update(&task_id, |task| {
                task.state = JobState::Failed;
                task.completed_at = Some(Utc::now());
            });
            self.registry
                .remove_after(&task_id, self.config.failure_grace);
        }
        if key.0 == JobKind::Trailer {
            self.clear_pointer();
        }
        OrchestratorError::exhausted(attempts, state.used_adjustment(), message)
    }

    fn save_pointer(&self, job_id: &str, show_id: &str) {
        let pointer = TrailerPointer::new(job_id.to_string(), show_id.to_string());
        if let Err(err) = self.pointer_store.set(&pointer) {
            log::warn!("failed to persist trailer pointer: {}", err);
        }
    }

    fn clear_pointer(&self) {
        if let Err(err) = self.pointer_store.clear() {
            log::warn!("failed to clear trailer pointer: {}", err);
        }
    }
}
