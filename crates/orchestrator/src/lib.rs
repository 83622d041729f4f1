//! Generation-job orchestration for show assets.
//!
//! The engine launches long-running jobs on external media providers and
//! babysits them to completion: fixed-cadence polling, watchdog limits,
//! classified retries with backoff, one-shot prompt adjustment, a
//! provider fallback chain for trailers, and a shared registry that any
//! screen can observe. Restarting a generation for a subject displaces
//! the previous job rather than racing it.

pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod pointer;
pub mod poller;
pub mod registry;
pub mod retry;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use descriptor::{Generation, JobArena, JobDescriptor, SubjectKey, Superseded};
pub use engine::{EngineConfig, GenerationOutcome, GenerationRequest, Orchestrator};
pub use error::OrchestratorError;
pub use fallback::{ChainLink, LinkFailure, TrailerChain};
pub use pointer::{FilePointerStore, MemoryPointerStore, PointerStore, TrailerPointer};
pub use poller::{poll_to_terminal, PollOutcome, POLL_CADENCE};
pub use registry::{BackgroundTask, TaskEvent, TaskRegistry};
pub use retry::{AttemptFailure, FailureClass, RetryPolicy, RetryState};
pub use watchdog::{WatchdogLimits, WatchdogVerdict};

pub use providers::{JobKind, JobState};
