// Configuration management module
// TOML file plus environment overrides, resolved once and shared read-only

pub mod settings;


use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

pub use settings::{
    ChatConfig, ChromaConfig, Config, ConfigError, GeminiConfig, parse_metadata_keys,
};

static CURRENT: RwLock<Option<Arc<Config>>> = RwLock::new(None);

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Process-wide configuration, built from file and environment on first use
#[inline]
pub fn current() -> Result<Arc<Config>, ConfigError> {
    let cached = CURRENT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(config) = cached {
        return Ok(config);
    }

    let mut slot = CURRENT.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(config) = slot.as_ref() {
        return Ok(Arc::clone(config));
    }

    debug!("Resolving configuration");
    let config = Arc::new(Config::resolve()?);
    *slot = Some(Arc::clone(&config));
    Ok(config)
}

/// Drop the memoized configuration so the next `current()` rebuilds it
#[inline]
pub fn invalidate() {
    debug!("Invalidating cached configuration");
    *CURRENT.write().unwrap_or_else(PoisonError::into_inner) = None;
}
