// src/config.rs
// Process-wide configuration: .env, optional YAML file, then environment overrides.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::PipelineError;

const ENV_CONFIG_PATH: &str = "POSTCHAT_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Which persona vocabulary the model is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaxonomyMode {
    /// The model names its own archetypes.
    #[default]
    Open,
    /// System Alterer / Financial Sponsor / Social Player only.
    Closed,
}

impl FromStr for TaxonomyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" | "open-set" => Ok(TaxonomyMode::Open),
            "closed" | "closed-set" => Ok(TaxonomyMode::Closed),
            other => Err(format!("unknown taxonomy mode '{}'", other)),
        }
    }
}

impl fmt::Display for TaxonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxonomyMode::Open => write!(f, "open"),
            TaxonomyMode::Closed => write!(f, "closed"),
        }
    }
}

/// Connection settings for the completion endpoint.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
        }
    }
}

/// Knobs for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Messages per model call.
    pub batch_size: usize,
    /// Personas requested per batch and kept after aggregation.
    pub max_personas: usize,
    pub taxonomy: TaxonomyMode,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Upper bound on batches in flight against the model provider.
    pub max_concurrency: usize,
    /// Extra attempts for a batch whose model call failed transiently.
    pub batch_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_personas: 3,
            taxonomy: TaxonomyMode::Open,
            temperature: 0.6,
            max_output_tokens: 3000,
            max_concurrency: 4,
            batch_retries: 1,
            retry_backoff_ms: 500,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(PipelineError::Configuration(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewaySettings,
    pub pipeline: PipelineSettings,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            pipeline: PipelineSettings::default(),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from the config file, then apply environment overrides
    pub fn from_env() -> Self {
        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let file = Self::load_config_file(&config_path).unwrap_or_default();

        let mut config = Config {
            pipeline: file.pipeline,
            ..Config::default()
        };
        if let Some(model) = file.model {
            config.gateway.model = model;
        }
        if let Some(base_url) = file.base_url {
            config.gateway.base_url = base_url;
        }

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.gateway.api_key = key;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            self.gateway.model = model;
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.gateway.base_url = url;
        }
        if let Some(timeout) = env_parse("OPENAI_TIMEOUT_SECS") {
            self.gateway.timeout_secs = timeout;
        }

        let pipeline = &mut self.pipeline;
        if let Some(taxonomy) = env_parse("PERSONA_TAXONOMY") {
            pipeline.taxonomy = taxonomy;
        }
        if let Some(size) = env_parse("BATCH_SIZE") {
            pipeline.batch_size = size;
        }
        if let Some(count) = env_parse("PERSONA_COUNT") {
            pipeline.max_personas = count;
        }
        if let Some(temperature) = env_parse("MODEL_TEMPERATURE") {
            pipeline.temperature = temperature;
        }
        if let Some(tokens) = env_parse("MAX_OUTPUT_TOKENS") {
            pipeline.max_output_tokens = tokens;
        }
        if let Some(concurrency) = env_parse("BATCH_CONCURRENCY") {
            pipeline.max_concurrency = concurrency;
        }
        if let Some(retries) = env_parse("BATCH_RETRIES") {
            pipeline.batch_retries = retries;
        }

        if let Ok(host) = std::env::var("HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse("PORT") {
            self.port = port;
        }
    }

    /// Load configuration from YAML file
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => {
                let contents = contents.trim();
                if contents.is_empty() {
                    tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
                    return Some(ConfigFile::default());
                }

                match serde_yaml::from_str(contents) {
                    Ok(config) => {
                        tracing::info!(path = %path.display(), "Loaded configuration from file");
                        Some(config)
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                None
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key = key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
