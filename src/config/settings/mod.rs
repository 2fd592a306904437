#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::retry::RetryPolicy;

pub const CONFIG_DIR_ENV: &str = "RAG_CHAT_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "rag-chat";

pub const MAX_TEMPERATURE: f32 = 2.0;
pub const MAX_TOP_K: u32 = 50;
pub const MAX_OUTPUT_TOKENS: u32 = 8192;
pub const MAX_CONTEXT_DOCUMENTS: u32 = 50;
pub const MAX_ATTEMPTS: u32 = 10;
pub const MAX_REQUEST_TIMEOUT_SECONDS: f64 = 3600.0;
pub const MAX_RETRY_BACKOFF_SECONDS: f64 = 300.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub chroma: ChromaConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Remote model settings shared by the embedding and generation clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeminiConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub api_base_url: String,
    pub embedding_model: String,
    pub request_timeout_seconds: f64,
    /// Total embedding attempts, including the first one
    pub max_attempts: u32,
    pub retry_backoff_seconds: f64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            request_timeout_seconds: 60.0,
            max_attempts: 3,
            retry_backoff_seconds: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChromaConfig {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub collection_name: String,
    pub tenant: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            ssl: false,
            collection_name: "documents".to_string(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub temperature: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub max_context_documents: u32,
    pub allowed_metadata_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.2,
            top_k: 5,
            max_output_tokens: 1024,
            max_context_documents: 5,
            allowed_metadata_keys: vec!["scope".to_string(), "category".to_string()],
            system_prompt_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    DirectoryError,
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnvValue { name: String, value: String },
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid collection name: {0:?} (cannot be empty)")]
    InvalidCollection(String),
    #[error("Invalid request timeout: {0} (must be greater than 0 and at most 3600 seconds)")]
    InvalidTimeout(f64),
    #[error("Invalid max attempts: {0} (must be between 1 and 10)")]
    InvalidMaxAttempts(u32),
    #[error("Invalid retry backoff: {0} (must be between 0 and 300 seconds)")]
    InvalidBackoff(f64),
    #[error("Invalid temperature: {0} (must be between 0 and 2)")]
    InvalidTemperature(f32),
    #[error("Invalid top_k: {0} (must be between 1 and 50)")]
    InvalidTopK(u32),
    #[error("Invalid max output tokens: {0} (must be between 1 and 8192)")]
    InvalidMaxOutputTokens(u32),
    #[error("Invalid max context documents: {0} (must be between 1 and 50)")]
    InvalidMaxContextDocuments(u32),
    #[error("Invalid metadata key: {0:?} (cannot be blank)")]
    InvalidMetadataKey(String),
    #[error("Missing Gemini API key. Set GOOGLE_API_KEY or gemini.api_key in config.toml")]
    MissingApiKey,
}

impl Config {
    /// Resolve the configuration directory, honouring `RAG_CHAT_CONFIG_DIR`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from the given directory and validate it.
    ///
    /// A missing file yields the defaults.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config = Self::read_file(config_dir.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Build the process configuration: file, then environment overrides, then validation
    #[inline]
    pub fn resolve() -> Result<Self, ConfigError> {
        let mut config = Self::read_file(&Self::config_dir()?)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;

        let mut config: Self = toml::from_str(&content)?;
        config.base_dir = config_dir.to_path_buf();
        Ok(config)
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE_NAME)
    }

    /// Apply overrides from a variable lookup (normally the process environment)
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gemini = &mut self.gemini;
        set_string(&lookup, "GOOGLE_API_KEY", &mut gemini.api_key);
        set_string(&lookup, "GEMINI_API_BASE_URL", &mut gemini.api_base_url);
        set_string(&lookup, "EMBEDDING_MODEL", &mut gemini.embedding_model);
        set_parsed(&lookup, "GEMINI_REQUEST_TIMEOUT", &mut gemini.request_timeout_seconds)?;
        set_parsed(&lookup, "GEMINI_MAX_ATTEMPTS", &mut gemini.max_attempts)?;
        set_parsed(&lookup, "GEMINI_RETRY_BACKOFF_SECONDS", &mut gemini.retry_backoff_seconds)?;

        let chroma = &mut self.chroma;
        set_string(&lookup, "CHROMA_HOST", &mut chroma.host);
        set_parsed(&lookup, "CHROMA_PORT", &mut chroma.port)?;
        if let Some(value) = lookup("CHROMA_SSL") {
            chroma.ssl = parse_bool("CHROMA_SSL", &value)?;
        }
        set_string(&lookup, "CHROMA_COLLECTION", &mut chroma.collection_name);
        set_string(&lookup, "CHROMA_TENANT", &mut chroma.tenant);
        set_string(&lookup, "CHROMA_DATABASE", &mut chroma.database);
        if let Some(token) = lookup("CHROMA_AUTH_TOKEN") {
            chroma.auth_token = (!token.trim().is_empty()).then_some(token);
        }

        let chat = &mut self.chat;
        set_string(&lookup, "CHAT_MODEL", &mut chat.model);
        set_parsed(&lookup, "CHAT_TEMPERATURE", &mut chat.temperature)?;
        set_parsed(&lookup, "CHAT_TOP_K", &mut chat.top_k)?;
        set_parsed(&lookup, "CHAT_MAX_OUTPUT_TOKENS", &mut chat.max_output_tokens)?;
        set_parsed(
            &lookup,
            "CHAT_MAX_CONTEXT_DOCUMENTS",
            &mut chat.max_context_documents,
        )?;
        if let Some(raw) = lookup("CHAT_ALLOWED_METADATA_KEYS") {
            chat.allowed_metadata_keys = parse_metadata_keys(&raw)?;
        }
        if let Some(path) = lookup("CHAT_SYSTEM_PROMPT_PATH") {
            chat.system_prompt_path = (!path.trim().is_empty()).then(|| PathBuf::from(path));
        }

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gemini.validate()?;
        self.chroma.validate()?;
        self.chat.validate()?;
        Ok(())
    }
}

impl GeminiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_url()?;

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        let timeout = self.request_timeout_seconds;
        if timeout <= 0.0 || !(0.0..=MAX_REQUEST_TIMEOUT_SECONDS).contains(&timeout) {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_seconds));
        }

        if !(1..=MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(ConfigError::InvalidMaxAttempts(self.max_attempts));
        }

        if !(0.0..=MAX_RETRY_BACKOFF_SECONDS).contains(&self.retry_backoff_seconds) {
            return Err(ConfigError::InvalidBackoff(self.retry_backoff_seconds));
        }

        Ok(())
    }

    pub fn api_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.api_base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.api_base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.api_base_url.clone()));
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        seconds_to_duration(self.request_timeout_seconds, MAX_REQUEST_TIMEOUT_SECONDS)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            seconds_to_duration(self.retry_backoff_seconds, MAX_RETRY_BACKOFF_SECONDS),
        )
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(key)
    }
}

impl ChromaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.collection_name.trim().is_empty() {
            return Err(ConfigError::InvalidCollection(self.collection_name.clone()));
        }

        self.base_url()?;
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let protocol = if self.ssl { "https" } else { "http" };
        let url_str = format!("{}://{}:{}", protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !self.temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !(1..=MAX_OUTPUT_TOKENS).contains(&self.max_output_tokens) {
            return Err(ConfigError::InvalidMaxOutputTokens(self.max_output_tokens));
        }

        if !(1..=MAX_CONTEXT_DOCUMENTS).contains(&self.max_context_documents) {
            return Err(ConfigError::InvalidMaxContextDocuments(
                self.max_context_documents,
            ));
        }

        if let Some(key) = self
            .allowed_metadata_keys
            .iter()
            .find(|key| key.trim().is_empty())
        {
            return Err(ConfigError::InvalidMetadataKey(key.clone()));
        }

        Ok(())
    }

    /// System prompt path with a leading `~` expanded to the home directory
    pub fn expanded_system_prompt_path(&self) -> Option<PathBuf> {
        let path = self.system_prompt_path.as_ref()?;
        match path.strip_prefix("~") {
            Ok(rest) => dirs::home_dir().map(|home| home.join(rest)),
            Err(_) => Some(path.clone()),
        }
    }
}

/// Parse an allow-list given as a comma-separated string or a JSON array.
///
/// A blank value means no keys are allowed.
#[inline]
pub fn parse_metadata_keys(raw: &str) -> Result<Vec<String>, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let keys: Vec<String> =
            serde_json::from_str(trimmed).map_err(|_| ConfigError::InvalidEnvValue {
                name: "CHAT_ALLOWED_METADATA_KEYS".to_string(),
                value: raw.to_string(),
            })?;
        return Ok(keys
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect());
    }

    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect())
}

fn set_string<F>(lookup: &F, name: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name) {
        *target = value;
    }
}

fn set_parsed<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvValue {
                name: name.to_string(),
                value,
            })?;
    }
    Ok(())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Convert seconds to a `Duration`, clamped into `[0, max]`; NaN maps to zero
fn seconds_to_duration(seconds: f64, max: f64) -> Duration {
    Duration::from_secs_f64(seconds.max(0.0).min(max))
}
