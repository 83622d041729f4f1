//! Engine error type.
//!
//! Everything short of exhaustion is recovered inside the engine and
//! never surfaces mid-flight; the caller only ever sees `Exhausted`,
//! with enough detail to offer an informed manual retry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Every retry and chain option was used up.
    #[error("{detail}")]
    Exhausted {
        /// Total attempts made (1 initial + retries, across chain links).
        attempts: u32,
        /// Whether a collaborator-adjusted prompt was in play.
        used_adjustment: bool,
        detail: String,
    },
}

impl OrchestratorError {
    pub fn exhausted(attempts: u32, used_adjustment: bool, detail: String) -> Self {
        Self::Exhausted {
            attempts,
            used_adjustment,
            detail,
        }
    }
}
