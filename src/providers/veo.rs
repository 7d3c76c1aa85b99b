use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::media::detect_mime_type;
use crate::poll::{poll_until, PollOutcome};
use crate::providers::gemini::user_message;
use crate::utils::http::get_http_client;
use crate::utils::logging::redact_secret;
use crate::utils::timing::log_provider_timing;

const VEO_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Deserialize)]
struct OperationHandle {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    #[serde(default)]
    done: bool,
    response: Option<OperationResult>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OperationResult {
    #[serde(rename = "generateVideoResponse")]
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
struct GenerateVideoResponse {
    #[serde(rename = "generatedSamples", default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: VideoUri,
}

#[derive(Debug, Deserialize)]
struct VideoUri {
    uri: String,
}

/// Outcome of a full VEO generation run. Timing out after the poll limit is
/// a distinct outcome so the caller can apply its fallback policy.
#[derive(Debug)]
pub enum VeoResult {
    Video(Vec<u8>),
    TimedOut,
}

/// Long-running video generation on the primary provider. Shares its
/// credential with the Gemini client.
#[derive(Debug, Clone)]
pub struct VeoClient {
    api_key: String,
}

impl VeoClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        VeoClient { api_key: api_key.into() }
    }

    async fn start_generation(&self, prompt: &str, image: &[u8]) -> Result<String> {
        let client = get_http_client();
        let model = &CONFIG.veo_model;
        let url = format!("{VEO_BASE_URL}/models/{model}:predictLongRunning");
        let mime_type = detect_mime_type(image).unwrap_or_else(|| "image/jpeg".to_string());

        let payload = json!({
            "instances": [{
                "prompt": prompt,
                "image": {
                    "bytesBase64Encoded": general_purpose::STANDARD.encode(image),
                    "mimeType": mime_type
                }
            }],
            "parameters": {
                "aspectRatio": CONFIG.video_aspect_ratio,
                "durationSeconds": CONFIG.video_duration_secs,
                "numberOfVideos": 1
            }
        });

        let response = client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(60))
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                let err_text = redact_secret(&err.to_string(), &self.api_key);
                anyhow!("{}", user_message(None, &err_text))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("VEO start failed: status={status}, body={}", redact_secret(&body, &self.api_key));
            return Err(anyhow!("{}", user_message(Some(status), &body)));
        }

        let handle = response.json::<OperationHandle>().await?;
        info!("VEO operation started: {}", handle.name);
        Ok(handle.name)
    }

    /// Single status check; `Ok(Some(uri))` once the operation is done.
    async fn check_operation(&self, operation_name: &str) -> Result<Option<String>> {
        let client = get_http_client();
        let url = format!("{VEO_BASE_URL}/{operation_name}");
        let response = client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|err| {
                let err_text = redact_secret(&err.to_string(), &self.api_key);
                anyhow!("{}", user_message(None, &err_text))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{}", user_message(Some(status), &body)));
        }

        let status = response.json::<OperationStatus>().await?;
        if !status.done {
            return Ok(None);
        }
        if let Some(error) = status.error {
            let detail = error
                .pointer("/message")
                .and_then(|v| v.as_str())
                .unwrap_or("operation failed");
            return Err(anyhow!("{}", user_message(None, detail)));
        }
        let uri = status
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .map(|sample| sample.video.uri)
            .ok_or_else(|| anyhow!("VEO operation completed without a video"))?;
        Ok(Some(uri))
    }

    /// Authenticated fetch of the completed operation's media.
    async fn download_video(&self, uri: &str) -> Result<Vec<u8>> {
        let client = get_http_client();
        let response = client
            .get(uri)
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|err| {
                let err_text = redact_secret(&err.to_string(), &self.api_key);
                anyhow!("{}", user_message(None, &err_text))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!("{}", user_message(Some(status), "video download failed")));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Full run: start the operation, poll on the fixed interval up to the
    /// attempt limit, then download the result.
    pub async fn generate_video(&self, prompt: &str, image: &[u8]) -> Result<VeoResult> {
        let model = CONFIG.veo_model.clone();
        log_provider_timing("veo", &model, "generate_video", || async {
            let operation = self.start_generation(prompt, image).await?;
            let operation_name = operation.as_str();
            let outcome = poll_until(
                Duration::from_secs(CONFIG.veo_poll_interval_secs),
                CONFIG.veo_poll_max_attempts,
                move || self.check_operation(operation_name),
            )
            .await;

            match outcome {
                PollOutcome::Completed(uri) => {
                    let bytes = self.download_video(&uri).await?;
                    Ok(VeoResult::Video(bytes))
                }
                PollOutcome::TimedOut => {
                    warn!(
                        "VEO operation {} not done after {} polls",
                        operation, CONFIG.veo_poll_max_attempts
                    );
                    Ok(VeoResult::TimedOut)
                }
                PollOutcome::Failed(err) => Err(err),
            }
        })
        .await
    }
}
