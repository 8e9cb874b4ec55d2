//! Configuration management for mask-gateway

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub upstream: UpstreamConfig,
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub mode: DetectionMode,
    pub locale: String,
    pub patterns: HashMap<String, String>,
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Regex,
    Llm,
    #[serde(rename = "regex_llm")]
    RegexLlm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(
            "EMAIL_ADDRESS".to_string(),
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b".to_string(),
        );
        patterns.insert(
            "PHONE_NUMBER".to_string(),
            r"0[0-9]{1,4}-[0-9]{1,4}-[0-9]{4}|[0-9]{3}-[0-9]{3}-[0-9]{4}".to_string(),
        );
        patterns.insert(
            "IP_ADDRESS".to_string(),
            r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b".to_string(),
        );

        Self {
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
            },
            detection: DetectionConfig {
                mode: DetectionMode::Regex,
                locale: "ja".to_string(),
                patterns,
                confidence_threshold: 0.5,
            },
            upstream: UpstreamConfig {
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                timeout_seconds: 60,
                default_model: None,
            },
            llm: None,
        }
    }
}

impl Config {
    pub fn get_app_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "mask-gateway", "mask-gateway")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine application directories"))
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        let project_dirs = Self::get_app_dirs()?;
        let config_dir = project_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.join("mask-gateway.toml"))
    }

    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reads the upstream credential from the environment variable named in
    /// `upstream.api_key_env`.
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.upstream.api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Upstream credential variable '{}' is not set",
                self.upstream.api_key_env
            )
        })
    }

    pub fn validate(&self) -> Result<()> {
        for (name, pattern) in &self.detection.patterns {
            regex::Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("Invalid regex pattern for '{}': {}", name, e))?;
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow::anyhow!("Confidence threshold must be between 0.0 and 1.0"));
        }

        if self.detection.locale.trim().is_empty() {
            return Err(anyhow::anyhow!("Detection locale must not be empty"));
        }

        if !is_http_url(&self.upstream.endpoint) {
            return Err(anyhow::anyhow!(
                "Upstream endpoint must be an http(s) URL: {}",
                self.upstream.endpoint
            ));
        }

        if self.upstream.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Upstream timeout must be greater than zero"));
        }

        match (&self.detection.mode, &self.llm) {
            (DetectionMode::Llm | DetectionMode::RegexLlm, None) => {
                return Err(anyhow::anyhow!(
                    "Detection mode {:?} requires an [llm] section",
                    self.detection.mode
                ));
            }
            (_, Some(llm)) if !is_http_url(&llm.endpoint) => {
                return Err(anyhow::anyhow!("LLM endpoint must be an http(s) URL: {}", llm.endpoint));
            }
            _ => {}
        }

        Ok(())
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// A PII span reported by a detector. Offsets are character offsets into
/// the analyzed text, `end` exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

impl DetectedEntity {
    pub fn new(entity_type: impl Into<String>, start: usize, end: usize, score: f64) -> Self {
        Self {
            entity_type: entity_type.into(),
            start,
            end,
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.detection.mode, DetectionMode::Regex);
        assert_eq!(config.detection.locale, "ja");
        assert!(config.detection.patterns.contains_key("EMAIL_ADDRESS"));
        assert!(config.detection.patterns.contains_key("PHONE_NUMBER"));
        assert_eq!(config.upstream.api_key_env, "OPENAI_API_KEY");
        assert!(config.llm.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.validate().unwrap();

        config.detection.patterns.insert("invalid".to_string(), "[".to_string());
        assert!(config.validate().is_err());

        config = Config::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        config = Config::default();
        config.upstream.endpoint = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.upstream.timeout_seconds = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.detection.locale = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_llm_mode_requires_llm_section() {
        let mut config = Config::default();
        config.detection.mode = DetectionMode::RegexLlm;
        assert!(config.validate().is_err());

        config.llm = Some(LlmConfig {
            model: "llama3.2:3b".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            timeout_seconds: 30,
        });
        config.validate().unwrap();
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = Config::default();
        config.upstream.default_model = Some("gpt-4o-mini".to_string());
        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        config.to_file(temp_path).unwrap();

        let loaded_config = Config::from_file(temp_path).unwrap();
        assert_eq!(config.detection.locale, loaded_config.detection.locale);
        assert_eq!(config.detection.mode, loaded_config.detection.mode);
        assert_eq!(config.upstream.endpoint, loaded_config.upstream.endpoint);
        assert_eq!(loaded_config.upstream.default_model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.server.bind, loaded_config.server.bind);
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let mut config = Config::default();
        config.upstream.api_key_env = "MASK_GATEWAY_TEST_UNSET_KEY_VAR".to_string();
        assert!(config.resolve_api_key().is_err());
    }

    #[test]
    fn test_detected_entity() {
        let entity = DetectedEntity::new("PERSON", 0, 6, 0.85);

        assert_eq!(entity.entity_type, "PERSON");
        assert_eq!(entity.start, 0);
        assert_eq!(entity.end, 6);
        assert_eq!(entity.score, 0.85);
    }
}
