//! Job descriptors and the per-subject arena.
//!
//! All mutable bookkeeping for one subject lives in a single arena entry
//! keyed by `(kind, subject_id)`, together with a generation token. Poll
//! loops and scheduled retries hold the token they were started with and
//! every mutation goes through [`JobArena::with_current`], so a loop whose
//! subject was re-claimed can no longer touch state.

use chrono::{DateTime, Utc};
use providers::{JobKind, JobState, MediaProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Arena key: the entity a job is generating an artifact for.
pub type SubjectKey = (JobKind, String);

/// Token identifying one claim of a subject. Bumped on every re-claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// The record for one generation attempt.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    /// Provider-issued job id, once the launch call has answered.
    pub job_id: Option<String>,
    /// Registry key for this job: the correlation id until the provider
    /// answers, the provider job id afterwards.
    pub task_id: String,
    pub kind: JobKind,
    pub subject_id: String,
    pub state: JobState,
    /// 1-based count of chained attempts for this logical request.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    /// Monotonic start of the current attempt, for the watchdog.
    pub attempt_started: Instant,
    /// Status queries issued for the current attempt.
    pub poll_count: u32,
    pub output_url: Option<String>,
    pub error_detail: Option<String>,
    pub used_prompt_adjustment: bool,
    pub adjustment_reason: Option<String>,
    pub adjusted_prompt: Option<String>,
    pub model_used: Option<String>,
}

impl JobDescriptor {
    fn new(kind: JobKind, subject_id: &str, correlation_id: String) -> Self {
        Self {
            job_id: None,
            task_id: correlation_id,
            kind,
            subject_id: subject_id.to_string(),
            state: JobState::Starting,
            attempt: 1,
            started_at: Utc::now(),
            attempt_started: Instant::now(),
            poll_count: 0,
            output_url: None,
            error_detail: None,
            used_prompt_adjustment: false,
            adjustment_reason: None,
            adjusted_prompt: None,
            model_used: None,
        }
    }

    /// Reset per-attempt bookkeeping for the next chained attempt.
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.state = JobState::Starting;
        self.started_at = Utc::now();
        self.attempt_started = Instant::now();
        self.poll_count = 0;
        self.job_id = None;
        self.output_url = None;
        self.error_detail = None;
    }

    /// Count a status query about to be issued.
    pub fn record_poll(&mut self) {
        self.poll_count += 1;
    }

    pub fn complete(&mut self, output_url: String) {
        self.state = JobState::Succeeded;
        self.output_url = Some(output_url);
        self.error_detail = None;
    }

    pub fn fail(&mut self, detail: String) {
        self.state = JobState::Failed;
        self.error_detail = Some(detail);
    }
}

/// What a re-claim displaced.
#[derive(Clone)]
pub struct Superseded {
    pub task_id: String,
    pub job_id: Option<String>,
    /// The provider that launched the displaced job, so cancellation
    /// goes to the service that owns it.
    pub provider: Option<Arc<dyn MediaProvider>>,
}

struct ArenaEntry {
    generation: u64,
    descriptor: JobDescriptor,
    provider: Option<Arc<dyn MediaProvider>>,
}

/// One entry per subject; the single writer of record for job state.
#[derive(Default)]
pub struct JobArena {
    entries: HashMap<SubjectKey, ArenaEntry>,
    next_generation: u64,
}

impl JobArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a subject for a fresh logical request, invalidating any
    /// previously active descriptor for it.
    pub fn claim(
        &mut self,
        kind: JobKind,
        subject_id: &str,
        correlation_id: String,
    ) -> (Generation, Option<Superseded>) {
        self.next_generation += 1;
        let generation = self.next_generation;

        let descriptor = JobDescriptor::new(kind, subject_id, correlation_id);
        let previous = self.entries.insert(
            (kind, subject_id.to_string()),
            ArenaEntry {
                generation,
                descriptor,
                provider: None,
            },
        );

        let superseded = previous
            .filter(|entry| !entry.descriptor.state.is_terminal())
            .map(|entry| Superseded {
                task_id: entry.descriptor.task_id,
                job_id: entry.descriptor.job_id,
                provider: entry.provider,
            });

        (Generation(generation), superseded)
    }

    /// Record which provider launched the claim's current job. Ignored
    /// (returning false) for superseded callers.
    pub fn set_provider(
        &mut self,
        key: &SubjectKey,
        generation: Generation,
        provider: Arc<dyn MediaProvider>,
    ) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.generation == generation.0 => {
                entry.provider = Some(provider);
                true
            }
            _ => false,
        }
    }

    /// Is `generation` still the active claim for this subject?
    pub fn is_current(&self, key: &SubjectKey, generation: Generation) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.generation == generation.0)
            .unwrap_or(false)
    }

    /// Mutate the descriptor only if `generation` is still current.
    /// Returns `None` (and touches nothing) for superseded callers.
    pub fn with_current<R>(
        &mut self,
        key: &SubjectKey,
        generation: Generation,
        f: impl FnOnce(&mut JobDescriptor) -> R,
    ) -> Option<R> {
        match self.entries.get_mut(key) {
            Some(entry) if entry.generation == generation.0 => Some(f(&mut entry.descriptor)),
            _ => None,
        }
    }

    pub fn snapshot(&self, key: &SubjectKey) -> Option<JobDescriptor> {
        self.entries.get(key).map(|entry| entry.descriptor.clone())
    }
}
