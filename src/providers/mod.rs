pub mod gemini;
pub mod replicate;
pub mod veo;

use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use tracing::warn;

use crate::media::from_data_url;
use crate::utils::http::get_http_client;

pub use gemini::{EnhanceOutcome, GeminiClient};
pub use replicate::ReplicateClient;
pub use veo::{VeoClient, VeoResult};

const DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const DOWNLOAD_BASE_DELAY_MS: u64 = 400;

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Fetches a provider result URL, retrying transient failures with a short
/// exponential backoff.
pub async fn download_url(url: &str) -> Result<Vec<u8>> {
    // Some models return the artifact inline instead of a hosted file.
    if url.starts_with("data:") {
        let (_, bytes) = from_data_url(url)?;
        return Ok(bytes);
    }

    let client = get_http_client();
    let mut last_error = None;
    for attempt in 0..DOWNLOAD_MAX_ATTEMPTS {
        let response = match client
            .get(url)
            .timeout(Duration::from_secs(120))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch {url}: {err} (attempt={}/{})",
                    attempt + 1,
                    DOWNLOAD_MAX_ATTEMPTS
                );
                let retryable = should_retry_error(&err);
                last_error = Some(anyhow!("Failed to fetch result: {err}"));
                if !retryable || attempt + 1 == DOWNLOAD_MAX_ATTEMPTS {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(DOWNLOAD_BASE_DELAY_MS << attempt)).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(
                "Result download failed for {url} with status {status} (attempt={}/{})",
                attempt + 1,
                DOWNLOAD_MAX_ATTEMPTS
            );
            last_error = Some(anyhow!("Result download failed with status {status}"));
            if !should_retry_status(status) || attempt + 1 == DOWNLOAD_MAX_ATTEMPTS {
                break;
            }
            tokio::time::sleep(Duration::from_millis(DOWNLOAD_BASE_DELAY_MS << attempt)).await;
            continue;
        }

        return Ok(response.bytes().await?.to_vec());
    }

    Err(last_error.unwrap_or_else(|| anyhow!("Result download failed")))
}
