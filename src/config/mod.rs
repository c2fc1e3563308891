pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// How an upstream or transport failure is shown in the in-progress reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorDisplay {
    /// Discard streamed content and show only the diagnostic.
    #[default]
    Replace,
    /// Keep streamed content and append the diagnostic after it.
    Append,
}

/// Agent service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Seconds. For the streaming call this is the longest silence allowed
    /// between body reads; a stream that keeps sending has no total limit.
    /// For the JSON calls it bounds the whole request.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default)]
    pub http_use_env_proxy: bool,
}

fn default_api_prefix() -> String {
    "/api".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_http_pool_max_idle_per_host() -> usize {
    4
}

impl ServerConfig {
    /// Config pointing at `base_url` with every other field defaulted.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: default_api_prefix(),
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_use_env_proxy: false,
        }
    }
}

/// Conversation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub error_display: ErrorDisplay,
}

fn default_agent() -> String {
    "default".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_agent: default_agent(),
            provider_name: None,
            model_name: None,
            error_display: ErrorDisplay::default(),
        }
    }
}

/// Wire framing of the streaming response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_done_sentinel")]
    pub done_sentinel: String,
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,
    #[serde(default = "default_true")]
    pub skip_sse_fields: bool,
}

fn default_done_sentinel() -> String {
    "[DONE]".to_string()
}
fn default_data_prefix() -> String {
    "data:".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            done_sentinel: default_done_sentinel(),
            data_prefix: default_data_prefix(),
            skip_sse_fields: true,
        }
    }
}

/// Where the host keeps durable identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_store_path")]
    pub store_path: String,
}

fn default_store_path() -> String {
    ".agent-chat/identity.json".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Config for `base_url` with defaults everywhere else.
    #[must_use]
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::with_base_url(base_url),
            chat: ChatConfig::default(),
            stream: StreamConfig::default(),
            identity: IdentityConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
