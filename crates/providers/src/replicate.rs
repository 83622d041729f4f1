//! Replicate predictions API client.
//!
//! Used for character portraits, key-art posters, and character video.
//! Prediction statuses map one-to-one onto [`JobState`].

use super::{
    JobState, LaunchRequest, LaunchTicket, MediaProvider, ProviderConfig, ProviderError,
    StatusSnapshot,
};
use serde::{Deserialize, Serialize};

/// Replicate API provider
pub struct ReplicateProvider {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ReplicateProvider {
    /// Create new Replicate provider from config
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .ok_or_else(|| anyhow::anyhow!("Replicate provider requires api_key"))?;

        Ok(Self {
            api_url: config.api_url,
            api_key,
            model: config.model,
            client: reqwest::Client::new(),
        })
    }

    async fn api_error(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ProviderError::Api {
            provider: "replicate".to_string(),
            status,
            body,
        }
    }
}

#[async_trait::async_trait]
impl MediaProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> Result<bool, ProviderError> {
        match self
            .client
            .get(format!("{}/v1/account", self.api_url))
            .header("Authorization", format!("Token {}", self.api_key))
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchTicket, ProviderError> {
        let body = PredictionRequest {
            version: self.model.clone(),
            input: PredictionInput {
                prompt: request.prompt.clone(),
                image: request.reference_image_url.clone(),
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/predictions", self.api_url))
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let result: PredictionResponse = response.json().await?;
        Ok(LaunchTicket { job_id: result.id })
    }

    async fn status(&self, job_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{}", self.api_url, job_id))
            .header("Authorization", format!("Token {}", self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let prediction: PredictionResponse = response.json().await?;
        Ok(snapshot_from_prediction(prediction))
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        self.client
            .post(format!("{}/v1/predictions/{}/cancel", self.api_url, job_id))
            .header("Authorization", format!("Token {}", self.api_key))
            .send()
            .await?;

        Ok(())
    }
}

fn snapshot_from_prediction(prediction: PredictionResponse) -> StatusSnapshot {
    let state = match prediction.status.as_deref() {
        Some("starting") => Some(JobState::Starting),
        Some("processing") => Some(JobState::Processing),
        Some("succeeded") => Some(JobState::Succeeded),
        Some("failed") | Some("canceled") => Some(JobState::Failed),
        _ => None,
    };

    let output_url = prediction.output.as_ref().and_then(first_output_url);

    StatusSnapshot {
        state,
        output_url,
        error_detail: prediction.error,
    }
}

/// Predictions return output as a bare URL string or an array of them.
fn first_output_url(output: &serde_json::Value) -> Option<String> {
    match output {
        serde_json::Value::String(url) => Some(url.clone()),
        serde_json::Value::Array(items) => items
            .first()
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Prediction request for Replicate
#[derive(Debug, Serialize)]
struct PredictionRequest {
    version: String,
    input: PredictionInput,
}

#[derive(Debug, Serialize)]
struct PredictionInput {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

/// Prediction response from Replicate
#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,
    status: Option<String>,
    output: Option<serde_json::Value>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(status: Option<&str>, output: Option<serde_json::Value>) -> PredictionResponse {
        PredictionResponse {
            id: "pred-1".to_string(),
            status: status.map(|s| s.to_string()),
            output,
            error: None,
        }
    }

    #[test]
    fn test_status_mapping() {
        let snap = snapshot_from_prediction(prediction(Some("starting"), None));
        assert_eq!(snap.state, Some(JobState::Starting));

        let snap = snapshot_from_prediction(prediction(Some("processing"), None));
        assert_eq!(snap.state, Some(JobState::Processing));

        let snap = snapshot_from_prediction(prediction(Some("canceled"), None));
        assert_eq!(snap.state, Some(JobState::Failed));

        // Missing status is reported as no state at all
        let snap = snapshot_from_prediction(prediction(None, None));
        assert_eq!(snap.state, None);
    }

    #[test]
    fn test_output_url_extraction() {
        let snap = snapshot_from_prediction(prediction(
            Some("succeeded"),
            Some(serde_json::json!(["https://cdn.example.com/out.png", "extra"])),
        ));
        assert_eq!(
            snap.output_url.as_deref(),
            Some("https://cdn.example.com/out.png")
        );

        let snap = snapshot_from_prediction(prediction(
            Some("succeeded"),
            Some(serde_json::json!("https://cdn.example.com/out.mp4")),
        ));
        assert_eq!(
            snap.output_url.as_deref(),
            Some("https://cdn.example.com/out.mp4")
        );
    }

    #[test]
    fn test_launch_input_serialization() {
        let body = PredictionRequest {
            version: "flux-1.1-pro".to_string(),
            input: PredictionInput {
                prompt: "noir detective portrait".to_string(),
                image: None,
            },
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("noir detective"));
        assert!(!json.contains("image"));
    }
}
