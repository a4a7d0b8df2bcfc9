use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::credential::Credential;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub credential: CredentialConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialConfig {
    /// Inline key. Takes precedence over `env`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is absent.
    #[serde(default = "default_credential_env")]
    pub env: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            env: default_credential_env(),
        }
    }
}

fn default_credential_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl CredentialConfig {
    /// Resolve the configured credential, if any. Absence is not an error:
    /// it disables job submission and querying.
    pub fn resolve(&self) -> Option<Credential> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.env).ok())
            .and_then(Credential::new)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    #[serde(default = "default_unit_price")]
    pub unit_price_per_million: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            unit_price_per_million: default_unit_price(),
        }
    }
}

fn default_unit_price() -> f64 {
    0.15
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound of the weight-threshold control.
    #[serde(default = "default_max_threshold")]
    pub max_threshold: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_threshold: default_max_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_max_threshold() -> f64 {
    50.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_source_preview_chars")]
    pub source_preview_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            source_preview_chars: default_source_preview_chars(),
        }
    }
}

fn default_source_preview_chars() -> usize {
    300
}

impl Config {
    /// All defaults; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    let url = config.backend.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("backend.url must start with http:// or https://");
    }
    if config.backend.timeout_secs == 0 {
        anyhow::bail!("backend.timeout_secs must be > 0");
    }

    if config.jobs.poll_interval_ms == 0 {
        anyhow::bail!("jobs.poll_interval_ms must be > 0");
    }
    if config.jobs.request_timeout_secs == 0 {
        anyhow::bail!("jobs.request_timeout_secs must be > 0");
    }

    let price = config.pricing.unit_price_per_million;
    if !price.is_finite() || price < 0.0 {
        anyhow::bail!("pricing.unit_price_per_million must be a non-negative number");
    }

    if config.graph.top_k == 0 {
        anyhow::bail!("graph.top_k must be >= 1");
    }
    if !config.graph.max_threshold.is_finite() || config.graph.max_threshold < 0.0 {
        anyhow::bail!("graph.max_threshold must be >= 0");
    }

    if config.chat.source_preview_chars == 0 {
        anyhow::bail!("chat.source_preview_chars must be > 0");
    }

    Ok(())
}
