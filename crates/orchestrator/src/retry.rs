//! Failure classification, backoff, and per-request retry bookkeeping.
//!
//! Every failure class is retryable up to the ceiling; the engine always
//! attempts recovery before surfacing anything to the caller.

use providers::JobKind;
use std::time::Duration;

/// How an attempt ended short of success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The provider reported failure, or a launch/status call errored.
    Reported(String),
    /// The status endpoint returned no status for the job at all.
    NullStatus,
    /// Watchdog wall-clock trip.
    WallClockTimeout,
    /// Watchdog poll-count trip.
    PollCountStall,
}

impl AttemptFailure {
    pub fn detail(&self) -> String {
        match self {
            Self::Reported(text) => text.clone(),
            Self::NullStatus => "provider returned no status for the job".to_string(),
            Self::WallClockTimeout => "timed out waiting for the provider".to_string(),
            Self::PollCountStall => "provider stopped making progress".to_string(),
        }
    }

    /// Poll-count stalls and moderation failures count toward the
    /// prompt-adjustment trigger; wall-clock trips never do.
    pub fn adjustment_eligible(&self) -> bool {
        !matches!(self, Self::WallClockTimeout)
    }
}

/// Failure classification, first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    ContentModeration,
    RateLimited,
    StuckTimeout,
    GenericError,
}

/// Retry knobs for one logical request (or one trailer chain link).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Adjustment-eligible failures needed before consulting the
    /// prompt-adjustment collaborator.
    pub adjustment_threshold: u32,
    /// Moderation markers are provider-specific, not a contract; they are
    /// configuration so a provider can supply its own phrases.
    pub moderation_markers: Vec<String>,
    pub rate_limit_base: Duration,
    pub rate_limit_increment: Duration,
    pub rate_limit_cap: Duration,
    /// Delay for ordinary retries.
    pub short_delay: Duration,
    /// Delay for retries that also consult the adjustment collaborator.
    pub adjustment_delay: Duration,
}

fn default_moderation_markers() -> Vec<String> {
    [
        "content policy",
        "content moderation",
        "moderation",
        "sensitive",
        "flagged",
        "safety",
        "nsfw",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl RetryPolicy {
    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::Trailer => Self::trailer_link(),
            _ => Self {
                max_retries: 8,
                ..Self::trailer_link()
            },
        }
    }

    /// Policy for a single trailer chain link: a couple of automatic
    /// retries, then the fallback chain takes over.
    pub fn trailer_link() -> Self {
        Self {
            max_retries: 2,
            adjustment_threshold: 2,
            moderation_markers: default_moderation_markers(),
            rate_limit_base: Duration::from_secs(5),
            rate_limit_increment: Duration::from_secs(5),
            rate_limit_cap: Duration::from_secs(30),
            short_delay: Duration::from_secs(2),
            adjustment_delay: Duration::from_secs(3),
        }
    }

    pub fn with_moderation_markers(mut self, markers: Vec<String>) -> Self {
        self.moderation_markers = markers;
        self
    }

    pub fn classify(&self, failure: &AttemptFailure) -> FailureClass {
        match failure {
            AttemptFailure::WallClockTimeout | AttemptFailure::PollCountStall => {
                FailureClass::StuckTimeout
            }
            AttemptFailure::NullStatus => FailureClass::GenericError,
            AttemptFailure::Reported(text) => {
                let lower = text.to_lowercase();
                if self.moderation_markers.iter().any(|m| lower.contains(m)) {
                    FailureClass::ContentModeration
                } else if lower.contains("429")
                    || lower.contains("too many requests")
                    || lower.contains("rate limit")
                {
                    FailureClass::RateLimited
                } else {
                    FailureClass::GenericError
                }
            }
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, class: FailureClass, retry: u32, with_adjustment: bool) -> Duration {
        match class {
            FailureClass::RateLimited => {
                let scaled = self.rate_limit_base + self.rate_limit_increment * retry;
                scaled.min(self.rate_limit_cap)
            }
            _ if with_adjustment => self.adjustment_delay,
            _ => self.short_delay,
        }
    }
}

/// Per-request bookkeeping, cleared when the request reaches a terminal
/// state. For a trailer chain the same state spans all links so the
/// collaborator is consulted at most once chain-wide.
#[derive(Debug, Default)]
pub struct RetryState {
    pub retries_used: u32,
    /// Adjustment-eligible failures seen so far.
    pub adjustment_counter: u32,
    /// The collaborator answered (rewrite or refusal); never ask again.
    pub adjuster_consulted: bool,
    pub adjusted_prompt: Option<String>,
    pub adjustment_reason: Option<String>,
}

impl RetryState {
    pub fn record_failure(&mut self, failure: &AttemptFailure) {
        if failure.adjustment_eligible() {
            self.adjustment_counter += 1;
        }
    }

    /// Should the next retry consult the adjustment collaborator first?
    pub fn wants_adjustment(&self, policy: &RetryPolicy) -> bool {
        self.adjustment_counter >= policy.adjustment_threshold
            && !self.adjuster_consulted
            && self.adjusted_prompt.is_none()
    }

    pub fn used_adjustment(&self) -> bool {
        self.adjusted_prompt.is_some()
    }

    /// New chain link: retries reset, adjustment bookkeeping carries over.
    pub fn reset_for_link(&mut self) {
        self.retries_used = 0;
    }
}
