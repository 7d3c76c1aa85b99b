use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{CONFIG, ENHANCE_INSTRUCTION};
use crate::media::detect_mime_type;
use crate::utils::http::get_http_client;
use crate::utils::logging::redact_secret;
use crate::utils::timing::log_provider_timing;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;
const GEMINI_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

/// Result of the multimodal enhance call. The provider sometimes answers
/// with text only; that is a degraded result, not a failure.
#[derive(Debug)]
pub enum EnhanceOutcome {
    Enhanced { image: Vec<u8>, caption: Option<String> },
    NoImage { caption: Option<String> },
}

/// Immutable Gemini client. Constructed with its credential; there is no
/// `init` step and no stored mutable state.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

/// Maps a provider failure to one of the fixed user-facing messages.
pub fn user_message(status: Option<StatusCode>, detail: &str) -> String {
    let lowered = detail.to_lowercase();
    if lowered.contains("safety") || lowered.contains("blocked") {
        return "The AI provider declined to process this photo. Please try a different one."
            .to_string();
    }
    match status {
        Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => {
            "Your Gemini API key was rejected. Please check it and try again.".to_string()
        }
        Some(StatusCode::TOO_MANY_REQUESTS) => {
            "Gemini quota exceeded. Please wait a moment and try again.".to_string()
        }
        Some(status) if status.is_server_error() => {
            "Gemini is temporarily unavailable. Please try again shortly.".to_string()
        }
        Some(_) => format!("Gemini request failed: {}", truncate_for_log(detail, 200)),
        None => "Could not reach Gemini. Please check your network connection.".to_string(),
    }
}

fn extract_text(response: &GeminiResponse) -> Option<String> {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        if let Some(parts) = candidate.content.as_ref().and_then(|c| c.parts.as_ref()) {
            for part in parts {
                if let GeminiPart::Text { text } = part {
                    if !text.trim().is_empty() {
                        text_parts.push(text.trim().to_string());
                    }
                }
            }
        }
    }
    if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join("\n"))
    }
}

fn extract_first_image(response: &GeminiResponse) -> Option<Vec<u8>> {
    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        if let Some(parts) = candidate.content.as_ref().and_then(|c| c.parts.as_ref()) {
            for part in parts {
                if let GeminiPart::InlineData { inline_data } = part {
                    if inline_data.mime_type.starts_with("image/") {
                        if let Ok(bytes) = general_purpose::STANDARD.decode(&inline_data.data) {
                            return Some(bytes);
                        }
                    }
                }
            }
        }
    }
    None
}

fn inline_image_part(image: &[u8]) -> Value {
    let mime_type = detect_mime_type(image).unwrap_or_else(|| "image/jpeg".to_string());
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": general_purpose::STANDARD.encode(image)
        }
    })
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        GeminiClient { api_key: api_key.into() }
    }

    async fn call_api(&self, model: &str, payload: &Value) -> Result<GeminiResponse> {
        let client = get_http_client();
        let url = format!("{GEMINI_BASE_URL}/models/{model}:generateContent");

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .timeout(GEMINI_REQUEST_TIMEOUT)
                .json(payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let err_text = redact_secret(&err.to_string(), &self.api_key);
                    let should_retry = should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                        err_text,
                        err.is_timeout(),
                        err.is_connect(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!("{}", user_message(None, &err_text)));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                let should_retry = should_retry_status(status) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                warn!(
                    "Gemini API error: status={}, body={}, retrying={}",
                    status, body_summary, should_retry
                );
                if should_retry {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    continue;
                }
                let detail = message.unwrap_or(body_summary);
                return Err(anyhow!("{}", user_message(Some(status), &detail)));
            }

            return Ok(response.json::<GeminiResponse>().await?);
        }
    }

    /// Multimodal enhancement: inline image plus instruction, image+text
    /// response modalities. A text-only answer is reported as `NoImage`.
    pub async fn enhance_image(&self, image: &[u8]) -> Result<EnhanceOutcome> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [inline_image_part(image), { "text": ENHANCE_INSTRUCTION }]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"]
            }
        });

        let model = &CONFIG.gemini_image_model;
        log_provider_timing("gemini", model, "enhance_image", || async {
            let response = self.call_api(model, &payload).await?;
            let caption = extract_text(&response);
            match extract_first_image(&response) {
                Some(bytes) => Ok(EnhanceOutcome::Enhanced { image: bytes, caption }),
                None => {
                    debug!("Gemini returned no image payload for enhancement");
                    Ok(EnhanceOutcome::NoImage { caption })
                }
            }
        })
        .await
    }

    /// Plain text generation with an optional inline image for context.
    pub async fn generate_text(
        &self,
        system_prompt: &str,
        user_content: &str,
        image: Option<&[u8]>,
    ) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(image) = image {
            parts.push(inline_image_part(image));
        }
        parts.push(json!({ "text": user_content }));

        let payload = json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": CONFIG.gemini_temperature,
                "maxOutputTokens": CONFIG.gemini_max_output_tokens,
            }
        });

        let model = &CONFIG.gemini_model;
        log_provider_timing("gemini", model, "generate_text", || async {
            let response = self.call_api(model, &payload).await?;
            extract_text(&response).ok_or_else(|| anyhow!("Gemini returned an empty response"))
        })
        .await
    }

    /// Streaming variant of `generate_text`. The endpoint emits
    /// newline-delimited JSON (optionally with an SSE `data: ` prefix); each
    /// text fragment is handed to `on_chunk` as it arrives and the full text
    /// is returned at the end.
    pub async fn generate_text_streaming(
        &self,
        system_prompt: &str,
        user_content: &str,
        image: Option<&[u8]>,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(image) = image {
            parts.push(inline_image_part(image));
        }
        parts.push(json!({ "text": user_content }));

        let payload = json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": CONFIG.gemini_temperature,
                "maxOutputTokens": CONFIG.gemini_max_output_tokens,
            }
        });

        let model = &CONFIG.gemini_model;
        let url = format!("{GEMINI_BASE_URL}/models/{model}:streamGenerateContent");
        let client = get_http_client();

        let response = client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(GEMINI_REQUEST_TIMEOUT)
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
            let (message, body_summary) = summarize_error_body(&body);
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!("{}", user_message(Some(status), &detail)));
        }

        let mut collected = String::new();
        let mut buf = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|err| anyhow!("Gemini stream error: {err}"))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));
            let mut start = 0usize;
            for (i, ch) in buf.char_indices() {
                if ch != '\n' {
                    continue;
                }
                let line = buf[start..i].trim();
                let line = line.strip_prefix("data: ").unwrap_or(line);
                let line = line.trim_start_matches(['[', ',']).trim_end_matches(']');
                if !line.is_empty() {
                    if let Ok(parsed) = serde_json::from_str::<GeminiResponse>(line) {
                        if let Some(text) = extract_text(&parsed) {
                            on_chunk(&text);
                            collected.push_str(&text);
                        }
                    }
                }
                start = i + 1;
            }
            if start > 0 {
                buf = buf[start..].to_string();
            }
        }
        // Trailing line without a newline terminator.
        let line = buf.trim();
        let line = line.strip_prefix("data: ").unwrap_or(line);
        let line = line.trim_start_matches(['[', ',']).trim_end_matches(']');
        if !line.is_empty() {
            if let Ok(parsed) = serde_json::from_str::<GeminiResponse>(line) {
                if let Some(text) = extract_text(&parsed) {
                    on_chunk(&text);
                    collected.push_str(&text);
                }
            }
        }

        if collected.trim().is_empty() {
            return Err(anyhow!("Gemini returned an empty response"));
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_and_image_parts() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "A sunny afternoon." },
                        { "inlineData": { "mimeType": "image/png", "data": general_purpose::STANDARD.encode([1u8, 2, 3]) } }
                    ]
                }
            }]
        });
        let response: GeminiResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(extract_text(&response).as_deref(), Some("A sunny afternoon."));
        assert_eq!(extract_first_image(&response), Some(vec![1, 2, 3]));
    }

    #[test]
    fn text_only_response_has_no_image() {
        let raw = json!({
            "candidates": [{ "content": { "parts": [{ "text": "no picture today" }] } }]
        });
        let response: GeminiResponse = serde_json::from_value(raw).unwrap();
        assert!(extract_first_image(&response).is_none());
    }

    #[test]
    fn maps_auth_failures_to_the_credential_message() {
        let message = user_message(Some(StatusCode::UNAUTHORIZED), "API key not valid");
        assert!(message.contains("API key"));
    }

    #[test]
    fn maps_quota_and_safety_failures() {
        assert!(user_message(Some(StatusCode::TOO_MANY_REQUESTS), "rate limited").contains("quota"));
        assert!(user_message(Some(StatusCode::BAD_REQUEST), "Blocked by SAFETY settings")
            .contains("declined"));
    }

    #[test]
    fn maps_transport_failures_to_the_network_message() {
        assert!(user_message(None, "connection refused").contains("network"));
    }

    #[test]
    fn error_body_summary_prefers_the_provider_message() {
        let (message, _) =
            summarize_error_body(r#"{"error": {"message": "quota exhausted", "code": 429}}"#);
        assert_eq!(message.as_deref(), Some("quota exhausted"));
    }
}
