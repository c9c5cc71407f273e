use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{CoreResult, RelayError};
use crate::retry;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Providers {
    pub openai: Option<ProviderCfg>,
    pub xai: Option<ProviderCfg>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderCfg {
    /// Name of the environment variable that contains the API key.
    pub api_key_env: String,
    /// Override of the provider's default API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// File whose contents replace the system prompt; re-read on every request.
    #[serde(default)]
    pub system_prompt_file: Option<String>,
    /// Model id for this provider. Missing → the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    /// Extra organization header (OpenAI only).
    #[serde(default)]
    pub organization: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 600000ms; streams can be long)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    600_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetryCfg {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay; `None` disables the cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: Option<u64>,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

fn default_max_retries() -> u32 {
    retry::DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    retry::DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> Option<u64> {
    Some(retry::DEFAULT_MAX_DELAY_MS)
}
fn default_jitter_ratio() -> f64 {
    retry::DEFAULT_JITTER_RATIO
}
fn default_retry_statuses() -> Vec<u16> {
    retry::DEFAULT_RETRY_STATUSES.to_vec()
}

/// Override of the masked-error phrase list. `None` keeps the built-in list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ContentErrorsCfg {
    #[serde(default)]
    pub phrases: Option<Vec<String>>,
}

/// Generation parameters sent with every request. Parameters a backend does not
/// support are dropped when the request is built.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct GenerationCfg {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    /// `low`, `medium` or `high`; only sent to reasoning models.
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct LoggingCfg {
    /// Directory for per-request JSON logs. Unset disables file logging.
    #[serde(default)]
    pub request_log_dir: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TrackerCfg {
    #[serde(default = "default_true")]
    pub mirror_global: bool,
}

impl Default for TrackerCfg {
    fn default() -> Self {
        Self {
            mirror_global: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    /// Provider used when the caller does not name one.
    #[serde(default)]
    pub default_provider: Option<String>,
    pub providers: Providers,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub retry: RetryCfg,
    #[serde(default)]
    pub content_errors: ContentErrorsCfg,
    #[serde(default)]
    pub generation: GenerationCfg,
    #[serde(default)]
    pub logging: LoggingCfg,
    #[serde(default)]
    pub tracker: TrackerCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(RelayError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| RelayError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| RelayError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| RelayError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| RelayError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| RelayError::Other(e.into())))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> CoreResult<()> {
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(RelayError::Validation(format!(
                "retry.jitter_ratio must be within 0..=1, got {}",
                self.retry.jitter_ratio
            )));
        }
        if let Some(name) = &self.default_provider
            && !matches!(name.as_str(), "openai" | "xai" | "null")
        {
            return Err(RelayError::Validation(format!(
                "unknown default_provider: {name}"
            )));
        }
        Ok(())
    }
}
