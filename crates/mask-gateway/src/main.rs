//! mask-gateway command-line interface

use anyhow::Result;
use clap::Parser;
use mask_gateway_core::{Config, GatewayHandler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    pub log_level: String,

    #[arg(long, help = "Address to listen on (overrides server.bind)")]
    pub bind: Option<String>,

    #[arg(long, help = "Locale passed to the entity detector (overrides detection.locale)")]
    pub locale: Option<String>,
}

impl Args {
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref bind) = self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(ref locale) = self.locale {
            config.detection.locale = locale.clone();
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    match args.config.as_ref() {
        Some(config_path) => {
            info!("Loading configuration from: {}", config_path.display());
            Config::from_file(config_path)
        }
        None => match Config::get_default_config_path() {
            Ok(default_path) if default_path.exists() => {
                info!("Loading configuration from default location: {}", default_path.display());
                Config::from_file(&default_path)
            }
            Ok(default_path) => {
                info!("Creating default configuration at: {}", default_path.display());
                let config = Config::default();
                config.to_file(&default_path)?;
                Ok(config)
            }
            Err(_) => {
                info!("Using default configuration (could not determine config directory)");
                Ok(Config::default())
            }
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse::<tracing::Level>()
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', defaulting to 'info'", args.log_level);
            tracing::Level::INFO
        });

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting mask-gateway");

    let mut config = load_config(&args)?;
    args.apply_overrides(&mut config);
    config.validate()?;
    info!("Configuration validated successfully");

    let api_key = config.resolve_api_key()?;
    let addr: SocketAddr = config.server.bind.parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", config.server.bind, e))?;

    if let Some(llm) = config.llm.clone() {
        let probe = mask_gateway_core::OllamaDetector::new(llm)?;
        if !probe.health_check().await.unwrap_or(false) {
            tracing::warn!("Ollama is not reachable; LLM-backed detection will fail requests");
        }
    }

    let handler = Arc::new(GatewayHandler::from_config(&config, api_key)?);
    mask_gateway_core::serve(addr, handler).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_args() -> Args {
        Args {
            config: None,
            log_level: "info".to_string(),
            bind: None,
            locale: None,
        }
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let args = create_test_args();
        let mut config = Config::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.detection.locale, "ja");
    }

    #[test]
    fn test_overrides_applied() {
        let mut args = create_test_args();
        args.bind = Some("0.0.0.0:9000".to_string());
        args.locale = Some("en".to_string());

        let mut config = Config::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.detection.locale, "en");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["mask-gateway", "--log-level", "debug", "--locale", "en"]);
        assert_eq!(args.log_level, "debug");
        assert_eq!(args.locale.as_deref(), Some("en"));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_load_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        let mut config = Config::default();
        config.detection.locale = "en".to_string();
        config.to_file(&path).unwrap();

        let mut args = create_test_args();
        args.config = Some(path);
        let loaded = load_config(&args).unwrap();

        assert_eq!(loaded.detection.locale, "en");
    }
}
