//! Forwarding of masked chat payloads to the completion provider
//!
//! This is a pure transport boundary: it sees only masked payloads and
//! returns raw completion text or a classified error.

use crate::config::UpstreamConfig;
use crate::error::{json_error_summary, GatewayError, Result};
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Sends `payload` and returns the first choice's message content.
    async fn forward(&self, payload: &Value) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// OpenAI-compatible chat completion client.
#[derive(Clone)]
pub struct HttpUpstreamClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpUpstreamClient {
    pub fn new(config: &UpstreamConfig, api_key: impl Into<String>) -> AnyResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn forward(&self, payload: &Value) -> Result<String> {
        let start = Instant::now();
        debug!("Forwarding masked request to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                warn!(timeout = e.is_timeout(), "Upstream request failed: {}", e);
                GatewayError::transport(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!("Failed to read upstream response body: {}", e);
            GatewayError::transport(e)
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("provider returned status {}", status));
            warn!(status = status.as_u16(), "Upstream API error");
            return Err(GatewayError::UpstreamApi {
                status: Some(status.as_u16()),
                message,
            });
        }

        let completion = parse_completion(&body)?;
        debug!(
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Upstream completion received"
        );
        Ok(completion)
    }
}

/// Extracts `choices[0].message.content` from a 2xx body, surfacing an
/// embedded `error` object as an API error.
fn parse_completion(body: &str) -> Result<String> {
    let response: CompletionResponse = serde_json::from_str(body).map_err(|e| {
        GatewayError::UpstreamApi {
            status: None,
            message: format!("unparseable completion response: {}", json_error_summary(&e)),
        }
    })?;

    if let Some(error) = response.error {
        return Err(GatewayError::UpstreamApi {
            status: None,
            message: error.message,
        });
    }

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GatewayError::UpstreamApi {
            status: None,
            message: "completion response has no message content".to_string(),
        })
}
