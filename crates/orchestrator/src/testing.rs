//! Scripted in-memory providers and adjusters for engine tests.

use parking_lot::Mutex;
use providers::{
    AdjustmentOutcome, AdjustmentRequest, JobState, LaunchRequest, LaunchTicket, MediaProvider,
    PromptAdjuster, ProviderError, StatusSnapshot,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

pub fn snap(state: JobState) -> StatusSnapshot {
    StatusSnapshot {
        state: Some(state),
        output_url: None,
        error_detail: None,
    }
}

pub fn snap_ok(url: &str) -> StatusSnapshot {
    StatusSnapshot {
        state: Some(JobState::Succeeded),
        output_url: Some(url.to_string()),
        error_detail: None,
    }
}

pub fn snap_failed(detail: &str) -> StatusSnapshot {
    StatusSnapshot {
        state: Some(JobState::Failed),
        output_url: None,
        error_detail: Some(detail.to_string()),
    }
}

pub fn snap_null() -> StatusSnapshot {
    StatusSnapshot {
        state: None,
        output_url: None,
        error_detail: None,
    }
}

/// Provider that answers launches with generated job ids and status
/// queries from a scripted queue. An empty queue reports `Processing`,
/// which models a provider that never finishes.
pub struct ScriptedProvider {
    name: String,
    model: String,
    launch_errors: Mutex<VecDeque<ProviderError>>,
    statuses: Mutex<VecDeque<Result<StatusSnapshot, ProviderError>>>,
    pub launch_requests: Mutex<Vec<LaunchRequest>>,
    pub launch_instants: Mutex<Vec<tokio::time::Instant>>,
    pub cancels: Mutex<Vec<String>>,
    pub status_calls: AtomicU32,
    next_job: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            model: format!("{}-v1", name),
            launch_errors: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            launch_requests: Mutex::new(Vec::new()),
            launch_instants: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            status_calls: AtomicU32::new(0),
            next_job: AtomicU32::new(0),
        }
    }

    pub fn push_status(&self, status: Result<StatusSnapshot, ProviderError>) {
        self.statuses.lock().push_back(status);
    }

    pub fn push_launch_error(&self, error: ProviderError) {
        self.launch_errors.lock().push_back(error);
    }

    pub fn launch_count(&self) -> usize {
        self.launch_requests.lock().len()
    }

    pub fn prompt_of_launch(&self, index: usize) -> String {
        self.launch_requests.lock()[index].prompt.clone()
    }
}

#[async_trait::async_trait]
impl MediaProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchTicket, ProviderError> {
        self.launch_requests.lock().push(request.clone());
        self.launch_instants.lock().push(tokio::time::Instant::now());
        if let Some(error) = self.launch_errors.lock().pop_front() {
            return Err(error);
        }
        let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LaunchTicket {
            job_id: format!("{}-job-{}", self.name, n),
        })
    }

    async fn status(&self, _job_id: &str) -> Result<StatusSnapshot, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().pop_front() {
            Some(result) => result,
            None => Ok(snap(JobState::Processing)),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        self.cancels.lock().push(job_id.to_string());
        Ok(())
    }
}

/// Adjuster answering from a scripted queue; an empty queue rewrites the
/// prompt to a fixed safe variant.
pub struct ScriptedAdjuster {
    outcomes: Mutex<VecDeque<Result<AdjustmentOutcome, ProviderError>>>,
    pub calls: AtomicU32,
    pub requests: Mutex<Vec<AdjustmentRequest>>,
}

impl ScriptedAdjuster {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: Result<AdjustmentOutcome, ProviderError>) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn rewrite(prompt: &str, reason: &str) -> AdjustmentOutcome {
        AdjustmentOutcome {
            success: true,
            adjusted_prompt: Some(prompt.to_string()),
            adjustment_reason: Some(reason.to_string()),
            refusal: None,
        }
    }

    pub fn refusal(message: &str) -> AdjustmentOutcome {
        AdjustmentOutcome {
            success: false,
            adjusted_prompt: None,
            adjustment_reason: None,
            refusal: Some(message.to_string()),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedAdjuster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PromptAdjuster for ScriptedAdjuster {
    fn name(&self) -> &str {
        "scripted-adjuster"
    }

    async fn adjust(&self, request: &AdjustmentRequest) -> Result<AdjustmentOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        match self.outcomes.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(Self::rewrite("a softer, policy-safe rendition", "default rewrite")),
        }
    }
}
