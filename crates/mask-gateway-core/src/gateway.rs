//! Per-request orchestration of detect → mask → forward → restore

use crate::anonymizer::anonymize;
use crate::config::{Config, DetectionMode};
use crate::deanonymizer::deanonymize;
use crate::detection::{EntityDetector, HybridDetector, RegexDetectionEngine};
use crate::error::{ErrorKind, GatewayError, Result};
use crate::ollama::OllamaDetector;
use crate::upstream::{HttpUpstreamClient, UpstreamClient};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Detecting,
    Masking,
    Forwarding,
    Restoring,
    Completed,
    Failed(ErrorKind),
}

/// Tracks one request through the pipeline. Only forward transitions are
/// taken; `Failed` is terminal.
#[derive(Debug)]
struct Pipeline {
    stage: PipelineStage,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            stage: PipelineStage::Received,
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        debug!(from = ?self.stage, to = ?next, "Pipeline transition");
        self.stage = next;
    }

    fn fail(&mut self, err: GatewayError) -> GatewayError {
        warn!(stage = ?self.stage, kind = %err.kind(), "Pipeline failed: {}", err);
        self.stage = PipelineStage::Failed(err.kind());
        err
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
}

/// Shared, immutable per-process handler. Each call to [`handle`] builds its
/// own mapping and masked text; nothing crosses request boundaries.
///
/// [`handle`]: GatewayHandler::handle
pub struct GatewayHandler {
    detector: Arc<dyn EntityDetector>,
    upstream: Arc<dyn UpstreamClient>,
    locale: String,
    default_model: Option<String>,
}

impl GatewayHandler {
    pub fn new(
        detector: Arc<dyn EntityDetector>,
        upstream: Arc<dyn UpstreamClient>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            upstream,
            locale: locale.into(),
            default_model: None,
        }
    }

    /// Builds the detector stack and the HTTP upstream client from
    /// configuration. Called once at start-up.
    pub fn from_config(config: &Config, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let detector = build_detector(config)?;
        let upstream = Arc::new(HttpUpstreamClient::new(&config.upstream, api_key)?);

        info!("Detector: {}", detector.name());
        info!("Locale: {}", config.detection.locale);
        info!("Upstream endpoint: {}", upstream.endpoint());

        Ok(Self::new(detector, upstream, config.detection.locale.clone())
            .with_default_model(config.upstream.default_model.clone()))
    }

    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model;
        self
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Runs the full pipeline for one chat request body.
    pub async fn handle(&self, body: Value) -> Result<ChatAnswer> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("gateway_request", %request_id);
        self.run(body).instrument(span).await
    }

    async fn run(&self, mut body: Value) -> Result<ChatAnswer> {
        let mut pipeline = Pipeline::new();

        let text = match last_message_content(&body) {
            Ok(text) => text.to_string(),
            Err(e) => return Err(pipeline.fail(e)),
        };

        pipeline.advance(PipelineStage::Detecting);
        let entities = match self.detector.detect(&text, &self.locale).await {
            Ok(entities) => entities,
            Err(e) => return Err(pipeline.fail(e)),
        };
        debug!(detector = self.detector.name(), count = entities.len(), "Entities detected");

        pipeline.advance(PipelineStage::Masking);
        let anonymized = match anonymize(&text, &entities) {
            Ok(anonymized) => anonymized,
            Err(e) => return Err(pipeline.fail(e)),
        };
        if !anonymized.mapping.is_empty() {
            info!(
                masked = anonymized.mapping.len(),
                dropped = anonymized.dropped,
                types = ?anonymized.mapping.counts_by_type(),
                "PII masked in last message"
            );
        }

        set_last_message_content(&mut body, anonymized.masked_text);
        if let Some(model) = &self.default_model {
            if let Some(obj) = body.as_object_mut() {
                obj.entry("model").or_insert_with(|| Value::String(model.clone()));
            }
        }

        pipeline.advance(PipelineStage::Forwarding);
        let completion = match self.upstream.forward(&body).await {
            Ok(completion) => completion,
            Err(e) => return Err(pipeline.fail(e)),
        };

        pipeline.advance(PipelineStage::Restoring);
        let restoration = deanonymize(&completion, &anonymized.mapping);
        if restoration.has_anomalies() {
            warn!(
                unmatched = restoration.unmatched,
                "Restoration anomaly: response contains placeholders with no mapping entry"
            );
        }

        pipeline.advance(PipelineStage::Completed);
        debug!(restored = restoration.restored, "Request completed");

        Ok(ChatAnswer {
            answer: restoration.text,
        })
    }
}

/// Detector for the configured mode.
pub fn build_detector(config: &Config) -> anyhow::Result<Arc<dyn EntityDetector>> {
    let llm = || {
        config
            .llm
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Detection mode {:?} requires an [llm] section", config.detection.mode))
    };

    let detector: Arc<dyn EntityDetector> = match config.detection.mode {
        DetectionMode::Regex => Arc::new(RegexDetectionEngine::new(&config.detection)?),
        DetectionMode::Llm => Arc::new(OllamaDetector::new(llm()?)?),
        DetectionMode::RegexLlm => Arc::new(HybridDetector::new(
            Arc::new(RegexDetectionEngine::new(&config.detection)?),
            Arc::new(OllamaDetector::new(llm()?)?),
        )),
    };
    Ok(detector)
}

fn last_message_content(body: &Value) -> Result<&str> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::InvalidRequest("body must contain a 'messages' array".to_string()))?;

    let last = messages
        .last()
        .ok_or_else(|| GatewayError::InvalidRequest("'messages' must not be empty".to_string()))?;

    last.get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::InvalidRequest("last message must have a string 'content'".to_string())
        })
}

fn set_last_message_content(body: &mut Value, content: String) {
    if let Some(last) = body
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .and_then(|messages| messages.last_mut())
    {
        last["content"] = Value::String(content);
    }
}
