//! Ollama LLM integration for named entity recognition
//!
//! Asks a local Ollama model to list PII values in the text, then locates
//! every occurrence of each value to produce character spans.

use crate::config::{DetectedEntity, LlmConfig};
use crate::detection::{char_offset, sort_entities, EntityDetector};
use crate::error::{json_error_summary, GatewayError, Result};
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const NER_PROMPT: &str = include_str!("templates/ner_prompt.md");

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub entities: Vec<LlmDetectedEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmDetectedEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.8
}

#[derive(Clone)]
pub struct OllamaDetector {
    client: Client,
    config: LlmConfig,
}

impl OllamaDetector {
    pub fn new(config: LlmConfig) -> AnyResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    fn format_prompt(&self, text: &str, locale: &str) -> String {
        NER_PROMPT
            .replace("{locale}", locale)
            .replace("{text}", &text.replace('"', r#"\""#))
    }

    async fn call_ollama(&self, prompt: String) -> Result<String> {
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: 0.0, // deterministic JSON output
                top_p: 0.1,
                num_predict: 500,
            },
        };

        debug!("Making request to Ollama: {}/api/generate", self.config.endpoint);

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Detection(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("Ollama request failed with status {}", status);
            return Err(GatewayError::Detection(format!("Ollama returned status {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Detection(format!("Failed to read Ollama response: {}", e)))?;
        let ollama_response: OllamaResponse = serde_json::from_str(&body).map_err(|e| {
            GatewayError::Detection(format!("Invalid Ollama response: {}", json_error_summary(&e)))
        })?;

        if !ollama_response.done {
            warn!("Received incomplete response from Ollama");
        }

        debug!("Received response from Ollama: {} characters", ollama_response.response.len());
        Ok(ollama_response.response)
    }

    fn parse_llm_response(&self, response: &str, original_text: &str) -> Result<Vec<DetectedEntity>> {
        let json_str = extract_json_from_response(response).ok_or_else(|| {
            GatewayError::Detection("No valid JSON object in Ollama response".to_string())
        })?;

        let llm_response: LlmResponse = serde_json::from_str(&json_str)
            .map_err(|e| {
                GatewayError::Detection(format!(
                    "Failed to parse LLM JSON response: {}",
                    json_error_summary(&e)
                ))
            })?;

        let mut entities = Vec::new();

        for llm_entity in llm_response.entities {
            let entity_type = llm_entity.entity_type.trim().to_uppercase();
            if entity_type.is_empty() || llm_entity.value.is_empty() {
                continue;
            }
            let score = llm_entity.confidence.clamp(0.0, 1.0);

            let before = entities.len();
            for (byte_start, value) in original_text.match_indices(llm_entity.value.as_str()) {
                entities.push(DetectedEntity {
                    entity_type: entity_type.clone(),
                    start: char_offset(original_text, byte_start),
                    end: char_offset(original_text, byte_start + value.len()),
                    score,
                });
            }
            if entities.len() == before {
                warn!("LLM reported a {} value that does not occur in the text", entity_type);
            }
        }

        sort_entities(&mut entities);
        info!("Ollama extracted {} entities", entities.len());
        Ok(entities)
    }

    pub async fn health_check(&self) -> AnyResult<bool> {
        debug!("Performing Ollama health check");

        let response = self
            .client
            .get(format!("{}/api/tags", self.config.endpoint))
            .send()
            .await?;

        let is_healthy = response.status().is_success();

        if is_healthy {
            info!("Ollama health check passed");
        } else {
            warn!("Ollama health check failed: {}", response.status());
        }

        Ok(is_healthy)
    }
}

#[async_trait]
impl EntityDetector for OllamaDetector {
    async fn detect(&self, text: &str, locale: &str) -> Result<Vec<DetectedEntity>> {
        debug!("Sending text to Ollama for LLM detection: {} characters", text.chars().count());

        let prompt = self.format_prompt(text, locale);
        let response = self.call_ollama(prompt).await?;

        self.parse_llm_response(&response, text)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

/// Returns the first complete JSON object in a model reply.
fn extract_json_from_response(response: &str) -> Option<String> {
    first_json_object(response).or_else(|| {
        // Ollama sometimes echoes the template's doubled braces
        let fixed_response = response.replace("{{", "{").replace("}}", "}");
        first_json_object(&fixed_response)
    })
}

fn first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..=start + i];
                    return serde_json::from_str::<serde_json::Value>(candidate)
                        .ok()
                        .map(|_| candidate.to_string());
                }
            }
            _ => {}
        }
    }

    None
}
