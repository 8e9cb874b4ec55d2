pub mod anonymizer;
pub mod config;
pub mod deanonymizer;
pub mod detection;
pub mod error;
pub mod gateway;
pub mod mapping;
pub mod ollama;
pub mod server;
pub mod upstream;


pub use anonymizer::{anonymize, resolve_overlaps, Anonymized};
pub use config::{Config, DetectedEntity, DetectionConfig, DetectionMode, LlmConfig, ServerConfig, UpstreamConfig};
pub use deanonymizer::{deanonymize, Restoration};
pub use detection::{EntityDetector, HybridDetector, RegexDetectionEngine};
pub use error::{ErrorKind, GatewayError, Result};
pub use gateway::{build_detector, ChatAnswer, GatewayHandler, PipelineStage};
pub use mapping::{MappingEntry, PlaceholderMapping};
pub use ollama::OllamaDetector;
pub use server::{router, serve};
pub use upstream::{HttpUpstreamClient, UpstreamClient};
