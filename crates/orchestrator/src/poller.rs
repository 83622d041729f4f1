//! Status poller: drives one job to a terminal state.
//!
//! A fixed-cadence loop keyed by the arena generation it was started
//! with. Cancellation is by identity: when the subject is re-claimed the
//! loop notices on its next tick and stops without mutating anything.

use crate::descriptor::{Generation, JobArena, SubjectKey};
use crate::registry::TaskRegistry;
use crate::retry::AttemptFailure;
use crate::watchdog::{WatchdogLimits, WatchdogVerdict};
use chrono::Utc;
use parking_lot::Mutex;
use providers::{JobState, MediaProvider};
use std::time::Duration;

/// Observed provider cadence; every status query is 3s apart.
pub const POLL_CADENCE: Duration = Duration::from_secs(3);

/// How one poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded { output_url: String },
    Failed(AttemptFailure),
    /// The subject's active job changed; nothing was mutated after that.
    Superseded,
}

/// Poll `job_id` until terminal status, watchdog trip, or supersession.
///
/// Transient transport errors skip the tick without counting as a
/// provider failure. Every observed transition is mirrored into the
/// registry entry with the same id.
pub async fn poll_to_terminal(
    provider: &dyn MediaProvider,
    job_id: &str,
    arena: &Mutex<JobArena>,
    key: &SubjectKey,
    generation: Generation,
    registry: &TaskRegistry,
    limits: &WatchdogLimits,
    cadence: Duration,
) -> PollOutcome {
    loop {
        // Watchdog first, on the state as of this tick.
        let view = arena
            .lock()
            .with_current(key, generation, |d| (d.attempt_started, d.poll_count));
        let Some((attempt_started, poll_count)) = view else {
            return PollOutcome::Superseded;
        };

        match limits.check(attempt_started.elapsed(), poll_count) {
            WatchdogVerdict::WallClockExceeded => {
                let failure = AttemptFailure::WallClockTimeout;
                mark_failed(arena, key, generation, registry, job_id, &failure);
                return PollOutcome::Failed(failure);
            }
            WatchdogVerdict::PollCountExceeded => {
                let failure = AttemptFailure::PollCountStall;
                mark_failed(arena, key, generation, registry, job_id, &failure);
                return PollOutcome::Failed(failure);
            }
            WatchdogVerdict::Healthy => {}
        }

        match provider.status(job_id).await {
            Err(err) if err.is_transient() => {
                // Skipped ticks do not count toward the stall ceiling.
                log::debug!("status query for {} skipped: {}", job_id, err);
            }
            Err(err) => {
                let failure = AttemptFailure::Reported(err.to_string());
                mark_failed(arena, key, generation, registry, job_id, &failure);
                return PollOutcome::Failed(failure);
            }
            Ok(snapshot) => {
                // Count only answered queries.
                if arena
                    .lock()
                    .with_current(key, generation, |d| d.record_poll())
                    .is_none()
                {
                    return PollOutcome::Superseded;
                }
                match snapshot.state {
                    None => {
                        let failure = AttemptFailure::NullStatus;
                        mark_failed(arena, key, generation, registry, job_id, &failure);
                        return PollOutcome::Failed(failure);
                    }
                    Some(JobState::Succeeded) => match snapshot.output_url {
                        Some(output_url) => {
                            let applied = arena
                                .lock()
                                .with_current(key, generation, |d| d.complete(output_url.clone()));
                            if applied.is_none() {
                                return PollOutcome::Superseded;
                            }
                            registry.update(job_id, |task| {
                                task.state = JobState::Succeeded;
                                task.completed_at = Some(Utc::now());
                            });
                            return PollOutcome::Succeeded { output_url };
                        }
                        None => {
                            let failure = AttemptFailure::Reported(
                                "provider reported success without an output url".to_string(),
                            );
                            mark_failed(arena, key, generation, registry, job_id, &failure);
                            return PollOutcome::Failed(failure);
                        }
                    },
                    Some(JobState::Failed) => {
                        let failure = AttemptFailure::Reported(
                            snapshot
                                .error_detail
                                .unwrap_or_else(|| "generation failed".to_string()),
                        );
                        mark_failed(arena, key, generation, registry, job_id, &failure);
                        return PollOutcome::Failed(failure);
                    }
                    Some(state) => {
                        let applied = arena
                            .lock()
                            .with_current(key, generation, |d| d.state = state);
                        if applied.is_none() {
                            return PollOutcome::Superseded;
                        }
                        registry.update(job_id, |task| task.state = state);
                    }
                }
            }
        }

        tokio::time::sleep(cadence).await;
    }
}

fn mark_failed(
    arena: &Mutex<JobArena>,
    key: &SubjectKey,
    generation: Generation,
    registry: &TaskRegistry,
    job_id: &str,
    failure: &AttemptFailure,
) {
    let applied = arena
        .lock()
        .with_current(key, generation, |d| d.fail(failure.detail()));
    if applied.is_some() {
        registry.update(job_id, |task| task.state = JobState::Failed);
    }
}
