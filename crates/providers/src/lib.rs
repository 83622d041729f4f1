//! Media-generation provider clients for the showrunner pipeline.
//!
//! Provides a unified interface over the external generation services:
//! - Replicate predictions API (portraits, posters, character video)
//! - fal.ai queue API (trailers, alternate video models)
//! - the prompt-adjustment collaborator (LLM rewrite endpoint)

pub mod adjust;
pub mod fal;
pub mod replicate;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use adjust::{AdjustmentOutcome, AdjustmentRequest, HttpPromptAdjuster, PromptAdjuster};
pub use fal::FalProvider;
pub use replicate::ReplicateProvider;

/// What kind of artifact a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Portrait,
    Video,
    Trailer,
    Poster,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Portrait => write!(f, "portrait"),
            Self::Video => write!(f, "video"),
            Self::Trailer => write!(f, "trailer"),
            Self::Poster => write!(f, "poster"),
        }
    }
}

/// Provider-reported job state.
///
/// This is Replicate's prediction-status vocabulary; the fal client maps
/// its queue states onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Starting,
    Processing,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A generation launch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub kind: JobKind,
    pub prompt: String,
    /// Supporting reference image (character sheet, composite grid).
    pub reference_image_url: Option<String>,
    /// Caller-generated id used to track the job before the provider
    /// has issued a real one.
    pub correlation_id: String,
}

/// Provider acknowledgement of a launched job.
#[derive(Debug, Clone)]
pub struct LaunchTicket {
    /// The provider-issued job id. Polling and cancellation key off this.
    pub job_id: String,
}

/// One observation from a provider's status endpoint.
///
/// `state: None` models a provider returning no status at all for a job
/// it should know about; callers treat it as an unrecoverable failure of
/// that attempt.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: Option<JobState>,
    pub output_url: Option<String>,
    pub error_detail: Option<String>,
}

/// Provider client errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure; safe to retry the same call.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("{provider} API error: {status} - {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl ProviderError {
    /// Transient errors are skipped by the poller without bookkeeping.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Unified interface over the external media-generation services.
#[async_trait::async_trait]
pub trait MediaProvider: Send + Sync {
    /// Provider name, used in chain reports and logs.
    fn name(&self) -> &str;

    /// Model/variant identifier recorded on finished jobs.
    fn model(&self) -> &str;

    /// Check the provider is reachable and credentials work.
    async fn is_available(&self) -> Result<bool, ProviderError>;

    /// Start a generation job.
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchTicket, ProviderError>;

    /// Query job status. Idempotent and safely repeatable.
    async fn status(&self, job_id: &str) -> Result<StatusSnapshot, ProviderError>;

    /// Best-effort cancellation of a superseded job.
    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError>;
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API endpoint URL.
    pub api_url: String,

    /// API key or token.
    pub api_key: Option<String>,

    /// Model or version identifier to generate with.
    pub model: String,

    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            model: model.into(),
            timeout_secs: Some(60),
        }
    }

    /// With API key
    pub fn with_api_key(mut self, key: String) -> Self {
        self.api_key = Some(key);
        self
    }

    /// With request timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_builder() {
        let config = ProviderConfig::new("https://api.replicate.com", "flux-1.1-pro")
            .with_api_key("test-key-123".to_string())
            .with_timeout(120);

        assert_eq!(config.api_url, "https://api.replicate.com");
        assert_eq!(config.api_key, Some("test-key-123".to_string()));
        assert_eq!(config.timeout_secs, Some(120));
    }

    #[test]
    fn test_job_kind_display() {
        assert_eq!(JobKind::Portrait.to_string(), "portrait");
        assert_eq!(JobKind::Video.to_string(), "video");
        assert_eq!(JobKind::Trailer.to_string(), "trailer");
        assert_eq!(JobKind::Poster.to_string(), "poster");
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Starting.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }
}
