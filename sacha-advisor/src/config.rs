//! Configuration for sacha-advisor
//!
//! Bootstrap settings come from an optional TOML file (see
//! [`sacha_common::config::resolve_config_path`]); every field has a built-in default.
//! Command-line flags and environment variables are applied on top in `main`.

use sacha_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable holding the OpenAI API key
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Config file name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "sacha-advisor.toml";

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub server: ServerConfig,
    /// SQLite database path; defaults to the platform data dir
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub openai: OpenAiConfig,
    pub cache: CacheConfig,
    pub upload: UploadConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body limit for uploads, in MB
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
            max_upload_mb: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 100,
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_mb: u64,
    pub max_pages: usize,
    /// Lower-case extensions including the leading dot
    pub allowed_extensions: Vec<String>,
    /// Minimum extracted characters for a document to count as readable
    pub min_text_chars: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            max_pages: 50,
            allowed_extensions: [".pdf", ".docx", ".txt"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            min_text_chars: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum classifier confidence for a document to be accepted
    pub confidence_threshold: f64,
    /// Disconnect monitor polling cadence
    pub monitor_interval_ms: u64,
    /// Size of the artificial increments used when replaying a cached explanation
    pub stream_chunk_chars: usize,
    pub stream_chunk_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            monitor_interval_ms: 1000,
            stream_chunk_chars: 48,
            stream_chunk_delay_ms: 15,
        }
    }
}

impl PipelineConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn stream_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.stream_chunk_delay_ms)
    }
}

impl AdvisorConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(Error::Config("cache.max_size must be positive".to_string()));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(Error::Config("cache.ttl_seconds must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.pipeline.confidence_threshold) {
            return Err(Error::Config(format!(
                "pipeline.confidence_threshold must be within 0.0..=1.0 (got {})",
                self.pipeline.confidence_threshold
            )));
        }
        if self.pipeline.monitor_interval_ms == 0 {
            return Err(Error::Config(
                "pipeline.monitor_interval_ms must be positive".to_string(),
            ));
        }
        if self.pipeline.stream_chunk_chars == 0 {
            return Err(Error::Config(
                "pipeline.stream_chunk_chars must be positive".to_string(),
            ));
        }
        if self.upload.allowed_extensions.is_empty() {
            return Err(Error::Config(
                "upload.allowed_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Database path, falling back to `<data_local_dir>/sacha/sacha_advisor.db`
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| sacha_common::config::default_data_dir().join("sacha_advisor.db"))
    }
}

/// Resolve the OpenAI API key
///
/// **Priority:** ENV → TOML
pub fn resolve_openai_api_key(config: &OpenAiConfig) -> Result<String> {
    let env_key = std::env::var(OPENAI_API_KEY_ENV)
        .ok()
        .filter(|key| is_valid_key(key));
    let toml_key = config.api_key.as_ref().filter(|key| is_valid_key(key));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            "OpenAI API key found in environment and TOML. Using environment (highest priority)."
        );
    }

    if let Some(key) = env_key {
        info!("OpenAI API key loaded from environment variable");
        return Ok(key);
    }

    if let Some(key) = toml_key {
        info!("OpenAI API key loaded from TOML config");
        return Ok(key.clone());
    }

    Err(Error::Config(format!(
        "OpenAI API key not configured. Please configure using one of:\n\
         1. Environment: {}=your-key-here\n\
         2. TOML config: [openai] api_key = \"your-key\"",
        OPENAI_API_KEY_ENV
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
