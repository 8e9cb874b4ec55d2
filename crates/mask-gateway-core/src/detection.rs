//! PII entity detection: the detector contract and the built-in engines

use crate::config::{DetectedEntity, DetectionConfig};
use crate::error::Result;
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Contract for entity detectors.
///
/// Implementations are built once at start-up and shared read-only across
/// concurrent requests. Results are ordered by ascending `start`, ties by
/// descending `score`, with character offsets.
#[async_trait]
pub trait EntityDetector: Send + Sync {
    async fn detect(&self, text: &str, locale: &str) -> Result<Vec<DetectedEntity>>;

    fn name(&self) -> &str;
}

/// Sorts entities into the detector output order.
pub fn sort_entities(entities: &mut [DetectedEntity]) {
    entities.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| b.score.total_cmp(&a.score))
    });
}

/// Converts a byte offset on a char boundary into a character offset.
pub(crate) fn char_offset(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].chars().count()
}

#[derive(Clone)]
pub struct RegexDetectionEngine {
    patterns: Vec<(String, Regex)>,
    confidence_threshold: f64,
}

impl RegexDetectionEngine {
    pub fn new(config: &DetectionConfig) -> AnyResult<Self> {
        let mut patterns = Vec::with_capacity(config.patterns.len());

        for (name, pattern_str) in &config.patterns {
            match Regex::new(pattern_str) {
                Ok(regex) => {
                    debug!("Loaded regex pattern for '{}'", name);
                    patterns.push((name.clone(), regex));
                }
                Err(e) => {
                    warn!("Invalid regex pattern for '{}': {}", name, e);
                    return Err(anyhow::anyhow!("Invalid regex pattern for '{}': {}", name, e));
                }
            }
        }
        // HashMap iteration order is random; keep detection deterministic
        patterns.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            patterns,
            confidence_threshold: config.confidence_threshold,
        })
    }

    pub fn detect_in_text(&self, text: &str) -> Vec<DetectedEntity> {
        let mut entities = Vec::new();

        for (entity_type, regex) in &self.patterns {
            for mat in regex.find_iter(text) {
                if mat.start() == mat.end() {
                    continue;
                }
                let score = calculate_confidence(entity_type, mat.as_str());
                if score < self.confidence_threshold {
                    continue;
                }
                entities.push(DetectedEntity {
                    entity_type: entity_type.clone(),
                    start: char_offset(text, mat.start()),
                    end: char_offset(text, mat.end()),
                    score,
                });
            }
        }

        sort_entities(&mut entities);
        entities
    }
}

// Simple per-type heuristics; an NER model is the better source for names.
fn calculate_confidence(entity_type: &str, text: &str) -> f64 {
    let digit_count = text.chars().filter(|c| c.is_ascii_digit()).count();
    match entity_type {
        "EMAIL_ADDRESS" => {
            if text.contains('@') && text.contains('.') {
                0.95
            } else {
                0.7
            }
        }
        "PHONE_NUMBER" => {
            if digit_count >= 10 {
                0.9
            } else {
                0.6
            }
        }
        "CREDIT_CARD" => {
            if digit_count == 16 {
                0.85
            } else {
                0.7
            }
        }
        "IP_ADDRESS" => {
            let parts: Vec<&str> = text.split('.').collect();
            if parts.len() == 4 && parts.iter().all(|&p| p.parse::<u8>().is_ok()) {
                0.95
            } else {
                0.7
            }
        }
        "URL" => {
            if text.starts_with("http://") || text.starts_with("https://") {
                0.9
            } else {
                0.7
            }
        }
        _ => 0.8,
    }
}

#[async_trait]
impl EntityDetector for RegexDetectionEngine {
    async fn detect(&self, text: &str, locale: &str) -> Result<Vec<DetectedEntity>> {
        let entities = self.detect_in_text(text);
        debug!(locale, count = entities.len(), "Regex detection finished");
        Ok(entities)
    }

    fn name(&self) -> &str {
        "regex"
    }
}

/// Runs two detectors and merges their results. Overlaps are left in place
/// for the anonymizer to resolve. A failure on either side fails detection.
pub struct HybridDetector {
    primary: Arc<dyn EntityDetector>,
    secondary: Arc<dyn EntityDetector>,
}

impl HybridDetector {
    pub fn new(primary: Arc<dyn EntityDetector>, secondary: Arc<dyn EntityDetector>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl EntityDetector for HybridDetector {
    async fn detect(&self, text: &str, locale: &str) -> Result<Vec<DetectedEntity>> {
        let mut entities = self.primary.detect(text, locale).await?;
        let secondary = self.secondary.detect(text, locale).await?;
        debug!(
            primary = entities.len(),
            secondary = secondary.len(),
            "Merging detector results"
        );

        for entity in secondary {
            if !entities.contains(&entity) {
                entities.push(entity);
            }
        }

        sort_entities(&mut entities);
        Ok(entities)
    }

    fn name(&self) -> &str {
        "regex_llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionMode;
    use crate::error::GatewayError;
    use std::collections::HashMap;

    fn create_test_config() -> DetectionConfig {
        let mut patterns = HashMap::new();
        patterns.insert("EMAIL_ADDRESS".to_string(), r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b".to_string());
        patterns.insert("PHONE_NUMBER".to_string(), r"0[0-9]{1,4}-[0-9]{1,4}-[0-9]{4}|[0-9]{3}-[0-9]{3}-[0-9]{4}".to_string());
        patterns.insert("IP_ADDRESS".to_string(), r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b".to_string());

        DetectionConfig {
            mode: DetectionMode::Regex,
            locale: "ja".to_string(),
            patterns,
            confidence_threshold: 0.8,
        }
    }

    struct FixedDetector(Vec<DetectedEntity>);

    #[async_trait]
    impl EntityDetector for FixedDetector {
        async fn detect(&self, _text: &str, _locale: &str) -> Result<Vec<DetectedEntity>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingDetector;

    #[async_trait]
    impl EntityDetector for FailingDetector {
        async fn detect(&self, _text: &str, _locale: &str) -> Result<Vec<DetectedEntity>> {
            Err(GatewayError::Detection("model unavailable".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_engine_creation() {
        let config = create_test_config();
        let engine = RegexDetectionEngine::new(&config).unwrap();

        assert_eq!(engine.patterns.len(), 3);
        assert_eq!(engine.confidence_threshold, 0.8);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut config = create_test_config();
        config.patterns.insert("BROKEN".to_string(), "(".to_string());
        assert!(RegexDetectionEngine::new(&config).is_err());
    }

    #[test]
    fn test_email_detection() {
        let engine = RegexDetectionEngine::new(&create_test_config()).unwrap();

        let text = "Contact John at john.doe@example.com for more info";
        let entities = engine.detect_in_text(text);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "EMAIL_ADDRESS");
        assert_eq!(entities[0].start, 16);
        assert_eq!(entities[0].end, 36);
        assert!(entities[0].score >= 0.8);
    }

    #[test]
    fn test_japanese_phone_detection() {
        let engine = RegexDetectionEngine::new(&create_test_config()).unwrap();

        let text = "Tanaka's phone number is 090-1234-5678";
        let entities = engine.detect_in_text(text);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "PHONE_NUMBER");
        assert_eq!((entities[0].start, entities[0].end), (25, 38));
    }

    #[test]
    fn test_offsets_are_character_offsets() {
        let engine = RegexDetectionEngine::new(&create_test_config()).unwrap();

        let text = "田中の電話番号は090-1234-5678です";
        let entities = engine.detect_in_text(text);

        assert_eq!(entities.len(), 1);
        assert_eq!((entities[0].start, entities[0].end), (8, 21));
        let value: String = text.chars().skip(8).take(13).collect();
        assert_eq!(value, "090-1234-5678");
    }

    #[test]
    fn test_multiple_entities_sorted() {
        let engine = RegexDetectionEngine::new(&create_test_config()).unwrap();

        let text = "Email: john@test.com, Phone: 555-123-4567, host 192.168.1.1";
        let entities = engine.detect_in_text(text);

        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].entity_type, "EMAIL_ADDRESS");
        assert_eq!(entities[1].entity_type, "PHONE_NUMBER");
        assert_eq!(entities[2].entity_type, "IP_ADDRESS");
        assert!(entities.windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[test]
    fn test_confidence_threshold_filtering() {
        let mut config = create_test_config();
        config.confidence_threshold = 0.92;

        let engine = RegexDetectionEngine::new(&config).unwrap();
        let entities = engine.detect_in_text("Email: john@test.com, Phone: 555-123-4567");

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "EMAIL_ADDRESS");
    }

    #[test]
    fn test_sort_entities_ties_by_descending_score() {
        let mut entities = vec![
            DetectedEntity::new("A", 5, 8, 0.4),
            DetectedEntity::new("B", 0, 3, 0.5),
            DetectedEntity::new("C", 5, 7, 0.9),
        ];
        sort_entities(&mut entities);

        let order: Vec<_> = entities.iter().map(|e| e.entity_type.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_regex_engine_as_detector() {
        let engine = RegexDetectionEngine::new(&create_test_config()).unwrap();

        tokio_test::block_on(async {
            let entities = engine.detect("mail me: a@b.io", "en").await.unwrap();
            assert_eq!(entities.len(), 1);
        });
        assert_eq!(engine.name(), "regex");
    }

    #[tokio::test]
    async fn test_hybrid_merges_and_dedupes() {
        let shared = DetectedEntity::new("PHONE_NUMBER", 25, 38, 0.9);
        let primary = Arc::new(FixedDetector(vec![shared.clone()]));
        let secondary = Arc::new(FixedDetector(vec![
            DetectedEntity::new("PERSON", 0, 6, 0.85),
            shared,
        ]));

        let hybrid = HybridDetector::new(primary, secondary);
        let entities = hybrid.detect("Tanaka's phone number is 090-1234-5678", "ja").await.unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].entity_type, "PERSON");
        assert_eq!(entities[1].entity_type, "PHONE_NUMBER");
    }

    #[tokio::test]
    async fn test_hybrid_fails_when_either_side_fails() {
        let hybrid = HybridDetector::new(
            Arc::new(FixedDetector(vec![])),
            Arc::new(FailingDetector),
        );
        let err = hybrid.detect("anything", "ja").await.unwrap_err();
        assert!(matches!(err, GatewayError::Detection(_)));
    }
}
