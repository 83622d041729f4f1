//! fal.ai queue API client.
//!
//! Used for trailer generation and as the fallback video model. The queue
//! exposes `IN_QUEUE / IN_PROGRESS / COMPLETED` states which are mapped
//! onto the shared [`JobState`] vocabulary; completed requests need a
//! second fetch to read the result payload.

use super::{
    JobState, LaunchRequest, LaunchTicket, MediaProvider, ProviderConfig, ProviderError,
    StatusSnapshot,
};
use serde::{Deserialize, Serialize};

/// fal.ai queue provider
pub struct FalProvider {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl FalProvider {
    /// Create new fal provider from config
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .ok_or_else(|| anyhow::anyhow!("fal provider requires api_key"))?;

        Ok(Self {
            api_url: config.api_url,
            api_key,
            model: config.model,
            client: reqwest::Client::new(),
        })
    }

    fn request_url(&self, job_id: &str) -> String {
        format!("{}/{}/requests/{}", self.api_url, self.model, job_id)
    }

    async fn api_error(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ProviderError::Api {
            provider: "fal".to_string(),
            status,
            body,
        }
    }

    /// Fetch the result payload of a completed request.
    async fn fetch_result(&self, job_id: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .client
            .get(self.request_url(job_id))
            .header("Authorization", format!("Key {}", self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let payload: serde_json::Value = response.json().await?;
        Ok(extract_output_url(&payload))
    }
}

#[async_trait::async_trait]
impl MediaProvider for FalProvider {
    fn name(&self) -> &str {
        "fal"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> Result<bool, ProviderError> {
        match self
            .client
            .get(format!("{}/{}/health", self.api_url, self.model))
            .header("Authorization", format!("Key {}", self.api_key))
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchTicket, ProviderError> {
        let body = QueueSubmit {
            prompt: request.prompt.clone(),
            image_url: request.reference_image_url.clone(),
        };

        let response = self
            .client
            .post(format!("{}/{}", self.api_url, self.model))
            .header("Authorization", format!("Key {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let result: QueueSubmitResponse = response.json().await?;
        Ok(LaunchTicket {
            job_id: result.request_id,
        })
    }

    async fn status(&self, job_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let response = self
            .client
            .get(format!("{}/status", self.request_url(job_id)))
            .header("Authorization", format!("Key {}", self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let status: QueueStatus = response.json().await?;

        let state = match status.status.as_deref() {
            Some("IN_QUEUE") => Some(JobState::Starting),
            Some("IN_PROGRESS") => Some(JobState::Processing),
            Some("COMPLETED") => Some(JobState::Succeeded),
            Some("FAILED") | Some("ERROR") => Some(JobState::Failed),
            _ => None,
        };

        let output_url = if state == Some(JobState::Succeeded) {
            self.fetch_result(job_id).await?
        } else {
            None
        };

        Ok(StatusSnapshot {
            state,
            output_url,
            error_detail: status.error,
        })
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        self.client
            .put(format!("{}/cancel", self.request_url(job_id)))
            .header("Authorization", format!("Key {}", self.api_key))
            .send()
            .await?;

        Ok(())
    }
}

/// Result payloads vary per model; look for the common shapes.
fn extract_output_url(payload: &serde_json::Value) -> Option<String> {
    if let Some(url) = payload.pointer("/video/url").and_then(|v| v.as_str()) {
        return Some(url.to_string());
    }
    if let Some(url) = payload.pointer("/images/0/url").and_then(|v| v.as_str()) {
        return Some(url.to_string());
    }
    payload
        .get("url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[derive(Debug, Serialize)]
struct QueueSubmit {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueSubmitResponse {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    status: Option<String>,
    error: Option<String>,
}
