use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::media::{detect_mime_type, to_data_url};
use crate::poll::{poll_until, PollOutcome};
use crate::providers::download_url;
use crate::utils::http::get_http_client;
use crate::utils::logging::redact_secret;
use crate::utils::timing::log_provider_timing;

const REPLICATE_BASE_URL: &str = "https://api.replicate.com/v1";
const PREDICTION_POLL_INTERVAL: Duration = Duration::from_secs(5);
const PREDICTION_POLL_MAX_ATTEMPTS: usize = 60;

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}

/// Picks the result URL out of a prediction `output`, which the API returns
/// either as a bare string or as an array of strings.
fn extract_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|item| item.as_str().map(str::to_string)),
        _ => None,
    }
}

fn user_message(status: Option<StatusCode>, detail: &str) -> String {
    match status {
        Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => {
            "Your Replicate API token was rejected. Please check it and try again.".to_string()
        }
        Some(StatusCode::PAYMENT_REQUIRED) | Some(StatusCode::TOO_MANY_REQUESTS) => {
            "Replicate quota exceeded. Please wait a moment and try again.".to_string()
        }
        Some(status) if status.is_server_error() => {
            "Replicate is temporarily unavailable. Please try again shortly.".to_string()
        }
        Some(_) => format!("Replicate request failed: {detail}"),
        None => "Could not reach Replicate. Please check your network connection.".to_string(),
    }
}

/// Immutable client for the alternate provider's model-prediction endpoints.
#[derive(Debug, Clone)]
pub struct ReplicateClient {
    api_token: String,
}

impl ReplicateClient {
    pub fn new(api_token: impl Into<String>) -> Self {
        ReplicateClient { api_token: api_token.into() }
    }

    /// Creates a prediction against `owner/name`, asking the API to hold the
    /// connection open until the prediction settles.
    async fn create_prediction(&self, model: &str, input: Value) -> Result<Prediction> {
        let client = get_http_client();
        let url = format!("{REPLICATE_BASE_URL}/models/{model}/predictions");
        let response = client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .timeout(Duration::from_secs(120))
            .json(&json!({ "input": input }))
            .send()
            .await
            .map_err(|err| {
                let err_text = redact_secret(&err.to_string(), &self.api_token);
                warn!("Replicate request failed to send: {err_text}");
                anyhow!("{}", user_message(None, &err_text))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Replicate API error: status={status}, body={}", redact_secret(&body, &self.api_token));
            return Err(anyhow!("{}", user_message(Some(status), &body)));
        }

        Ok(response.json::<Prediction>().await?)
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction> {
        let client = get_http_client();
        let url = format!("{REPLICATE_BASE_URL}/predictions/{id}");
        let response = client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| {
                let err_text = redact_secret(&err.to_string(), &self.api_token);
                anyhow!("{}", user_message(None, &err_text))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{}", user_message(Some(status), &body)));
        }
        Ok(response.json::<Prediction>().await?)
    }

    /// Single poll check used when the synchronous-wait header did not
    /// settle the prediction.
    async fn check_settled(&self, id: &str) -> Result<Option<Prediction>> {
        let latest = self.get_prediction(id).await?;
        Ok(latest.is_terminal().then_some(latest))
    }

    /// Waits out a prediction the synchronous-wait header did not settle.
    async fn settle(&self, prediction: Prediction) -> Result<Prediction> {
        if prediction.is_terminal() {
            return Ok(prediction);
        }
        debug!("Prediction {} still {}, polling", prediction.id, prediction.status);
        let id = prediction.id.clone();
        let prediction_id = id.as_str();
        let outcome = poll_until(PREDICTION_POLL_INTERVAL, PREDICTION_POLL_MAX_ATTEMPTS, move || {
            self.check_settled(prediction_id)
        })
        .await;
        match outcome {
            PollOutcome::Completed(latest) => Ok(latest),
            PollOutcome::TimedOut => Err(anyhow!(
                "Replicate prediction {id} did not settle in time. Please try again."
            )),
            PollOutcome::Failed(err) => Err(err),
        }
    }

    fn take_output_url(prediction: Prediction) -> Result<String> {
        if prediction.status != "succeeded" {
            let detail = prediction
                .error
                .as_ref()
                .and_then(|e| e.as_str())
                .unwrap_or("no further detail");
            return Err(anyhow!(
                "Replicate prediction {}: {detail}",
                prediction.status
            ));
        }
        prediction
            .output
            .as_ref()
            .and_then(extract_output_url)
            .ok_or_else(|| anyhow!("Replicate prediction succeeded without an output URL"))
    }

    /// Alternate-provider image enhancement.
    pub async fn enhance_image(&self, image: &[u8], instruction: &str) -> Result<Vec<u8>> {
        let model = CONFIG.replicate_image_model.clone();
        let mime = detect_mime_type(image).unwrap_or_else(|| "image/jpeg".to_string());
        let input = json!({
            "prompt": instruction,
            "image_input": [to_data_url(&mime, image)],
            "output_format": "jpg"
        });

        log_provider_timing("replicate", &model, "enhance_image", || async {
            let prediction = self.create_prediction(&model, input.clone()).await?;
            let prediction = self.settle(prediction).await?;
            let url = Self::take_output_url(prediction)?;
            download_url(&url).await
        })
        .await
    }

    /// Alternate-provider video synthesis: fixed short clip, fixed low
    /// resolution, fixed aspect ratio.
    pub async fn generate_video(&self, image: &[u8], prompt: &str) -> Result<Vec<u8>> {
        let model = CONFIG.replicate_video_model.clone();
        let mime = detect_mime_type(image).unwrap_or_else(|| "image/jpeg".to_string());
        let input = json!({
            "image": to_data_url(&mime, image),
            "prompt": prompt,
            "duration": CONFIG.video_duration_secs,
            "resolution": CONFIG.video_resolution,
            "aspect_ratio": CONFIG.video_aspect_ratio
        });

        log_provider_timing("replicate", &model, "generate_video", || async {
            let prediction = self.create_prediction(&model, input.clone()).await?;
            let prediction = self.settle(prediction).await?;
            let url = Self::take_output_url(prediction)?;
            download_url(&url).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_url_from_string_and_array() {
        assert_eq!(
            extract_output_url(&json!("https://example.test/a.mp4")).as_deref(),
            Some("https://example.test/a.mp4")
        );
        assert_eq!(
            extract_output_url(&json!(["https://example.test/b.mp4", "x"])).as_deref(),
            Some("https://example.test/b.mp4")
        );
        assert!(extract_output_url(&json!({"not": "a url"})).is_none());
    }

    #[test]
    fn terminal_statuses_are_recognized() {
        for (status, terminal) in [
            ("starting", false),
            ("processing", false),
            ("succeeded", true),
            ("failed", true),
            ("canceled", true),
        ] {
            let prediction = Prediction {
                id: "p1".to_string(),
                status: status.to_string(),
                output: None,
                error: None,
            };
            assert_eq!(prediction.is_terminal(), terminal, "status={status}");
        }
    }

    #[test]
    fn failed_prediction_surfaces_its_error() {
        let prediction = Prediction {
            id: "p1".to_string(),
            status: "failed".to_string(),
            output: None,
            error: Some(json!("NSFW content detected")),
        };
        let err = ReplicateClient::take_output_url(prediction).unwrap_err();
        assert!(err.to_string().contains("NSFW content detected"));
    }

    #[test]
    fn maps_auth_failures_to_the_token_message() {
        assert!(user_message(Some(StatusCode::UNAUTHORIZED), "bad token").contains("token"));
    }
}
