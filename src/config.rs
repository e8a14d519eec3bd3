use crate::error::{ProxyError, Result};
use crate::providers::infer_provider_name;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide settings, built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub provider: ProviderConfig,
    /// Inbound model name -> upstream model id. Unmapped names use `provider.model`.
    pub models: HashMap<String, String>,
    pub timeouts: TimeoutConfig,
    /// Largest accepted `/v1/messages` body; base64 images make these big.
    pub max_request_bytes: usize,
    /// Verbose logging.
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Display name; inferred from `base_url` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_output_tokens: u64,
    #[serde(skip_serializing)]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub first_byte_secs: u64,
    pub stream_idle_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7187,
            provider: ProviderConfig::default(),
            models: HashMap::new(),
            timeouts: TimeoutConfig::default(),
            max_request_bytes: 50 * 1024 * 1024,
            debug: false,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "moonshotai/kimi-k2-instruct".to_string(),
            max_output_tokens: 16_384,
            api_key: String::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            first_byte_secs: 120,
            stream_idle_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn first_byte(&self) -> Duration {
        Duration::from_secs(self.first_byte_secs)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_secs(self.stream_idle_secs)
    }
}

impl ProxyConfig {
    /// Defaults pointed at `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.provider.base_url = base_url.into();
        config.provider.api_key = api_key.into();
        config
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to defaults.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::debug!("No config file found, using defaults and environment");
        Ok(Self::default())
    }

    /// Override fields from environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("API_KEY") {
            self.provider.api_key = v;
        }
        if let Some(v) = get("BASE_URL") {
            self.provider.base_url = v;
        }
        if let Some(v) = get("MODEL_NAME") {
            self.provider.model = v;
        }
        if let Some(v) = get("PROVIDER_NAME") {
            self.provider.name = Some(v);
        }
        if let Some(v) = get("PROXY_HOST") {
            self.host = v;
        }
        if let Some(v) = get("MAX_OUTPUT_TOKENS") {
            self.provider.max_output_tokens = parse_number("MAX_OUTPUT_TOKENS", &v)?;
        }
        if let Some(v) = get("PROXY_PORT") {
            self.port = parse_number("PROXY_PORT", &v)?;
        }
        if let Some(v) = get("CONNECT_TIMEOUT_SECS") {
            self.timeouts.connect_secs = parse_number("CONNECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("FIRST_BYTE_TIMEOUT_SECS") {
            self.timeouts.first_byte_secs = parse_number("FIRST_BYTE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("STREAM_IDLE_TIMEOUT_SECS") {
            self.timeouts.stream_idle_secs = parse_number("STREAM_IDLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("MAX_REQUEST_BYTES") {
            self.max_request_bytes = parse_number("MAX_REQUEST_BYTES", &v)?;
        }
        if let Some(v) = get("DEBUG") {
            self.debug = matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes");
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.api_key.trim().is_empty() {
            return Err(ProxyError::config(
                "API key is required. Set the API_KEY environment variable.",
            ));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(ProxyError::config(
                "Base URL is required. Set the BASE_URL environment variable.",
            ));
        }
        if self.provider.max_output_tokens == 0 {
            return Err(ProxyError::config("MAX_OUTPUT_TOKENS must be greater than zero"));
        }
        if self.max_request_bytes == 0 {
            return Err(ProxyError::config("MAX_REQUEST_BYTES must be greater than zero"));
        }
        Ok(())
    }

    /// Configured display name, or one inferred from the base URL.
    pub fn provider_name(&self) -> String {
        self.provider
            .name
            .clone()
            .unwrap_or_else(|| infer_provider_name(&self.provider.base_url).to_string())
    }

    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.provider.base_url.trim_end_matches('/')
        )
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ProxyError::config(format!("{key} must be a number, got '{value}'")))
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("messages-proxy.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("messages-proxy").join("config.toml"));
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("messages-proxy").join("config.toml"));
        paths.push(home.join(".messages-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
