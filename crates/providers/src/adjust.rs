//! Prompt-adjustment collaborator client.
//!
//! When moderation-driven failures recur, the retry controller asks this
//! service to rewrite the prompt. The service may decline; a refusal means
//! the current prompt is kept for the remaining attempts.

use super::{JobKind, ProviderError};
use serde::{Deserialize, Serialize};

/// Request for a prompt rewrite.
#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentRequest {
    pub original_prompt: String,
    pub generation_kind: JobKind,
    pub last_error_text: String,
    pub attempt_number: u32,
}

/// Collaborator response.
#[derive(Debug, Clone, Deserialize)]
pub struct AdjustmentOutcome {
    pub success: bool,
    pub adjusted_prompt: Option<String>,
    pub adjustment_reason: Option<String>,
    pub refusal: Option<String>,
}

impl AdjustmentOutcome {
    /// An outcome only counts as usable when it actually carries a prompt.
    pub fn adjusted(&self) -> Option<(&str, Option<&str>)> {
        if !self.success {
            return None;
        }
        self.adjusted_prompt
            .as_deref()
            .map(|p| (p, self.adjustment_reason.as_deref()))
    }
}

/// Prompt-adjustment collaborator trait
#[async_trait::async_trait]
pub trait PromptAdjuster: Send + Sync {
    /// Collaborator name for logs.
    fn name(&self) -> &str;

    /// Ask for a rewritten prompt.
    async fn adjust(&self, request: &AdjustmentRequest) -> Result<AdjustmentOutcome, ProviderError>;
}

/// HTTP prompt-adjustment client
pub struct HttpPromptAdjuster {
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpPromptAdjuster {
    /// Create new HTTP adjuster
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self {
            api_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl PromptAdjuster for HttpPromptAdjuster {
    fn name(&self) -> &str {
        "prompt-adjuster"
    }

    async fn adjust(&self, request: &AdjustmentRequest) -> Result<AdjustmentOutcome, ProviderError> {
        let mut builder = self.client.post(&self.api_url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: "prompt-adjuster".to_string(),
                status,
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_requires_success_and_prompt() {
        let outcome = AdjustmentOutcome {
            success: true,
            adjusted_prompt: Some("a tasteful portrait".to_string()),
            adjustment_reason: Some("softened violent imagery".to_string()),
            refusal: None,
        };
        let (prompt, reason) = outcome.adjusted().unwrap();
        assert_eq!(prompt, "a tasteful portrait");
        assert_eq!(reason, Some("softened violent imagery"));

        let refused = AdjustmentOutcome {
            success: false,
            adjusted_prompt: None,
            adjustment_reason: None,
            refusal: Some("cannot rewrite this request".to_string()),
        };
        assert!(refused.adjusted().is_none());

        // success flag without a prompt is still unusable
        let empty = AdjustmentOutcome {
            success: true,
            adjusted_prompt: None,
            adjustment_reason: None,
            refusal: None,
        };
        assert!(empty.adjusted().is_none());
    }

    #[test]
    fn test_request_serialization() {
        let request = AdjustmentRequest {
            original_prompt: "gritty alley fight".to_string(),
            generation_kind: JobKind::Trailer,
            last_error_text: "flagged by content policy".to_string(),
            attempt_number: 2,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"generation_kind\":\"trailer\""));
        assert!(json.contains("\"attempt_number\":2"));
    }
}
