//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::engine::EngineConfig;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for persisted derived state.
    pub store_root: PathBuf,
    /// Combined entry budget of the title and backlink caches.
    pub cache_max_size: usize,
    /// Absolute lifetime of a cache entry.
    pub cache_max_age: Duration,
    /// Interval of the periodic cache cleanup pass.
    pub cache_cleanup_interval: Duration,
    /// Debounce window for reaction flushes.
    pub reaction_debounce: Duration,
    /// Write reaction records and cache snapshots under `store_root`.
    pub persist: bool,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT is not set")?);
        let defaults = EngineConfig::default();
        let cache_max_size = env_number("CACHE_MAX_SIZE").unwrap_or(defaults.cache_max_size);
        let cache_max_age = env_number("CACHE_MAX_AGE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_max_age);
        let cache_cleanup_interval = env_number("CACHE_CLEANUP_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_cleanup_interval);
        let reaction_debounce = env_number("REACTION_DEBOUNCE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.reaction_debounce);
        let persist = env::var("PERSIST").unwrap_or_else(|_| "1".into()) == "1";
        Ok(Self {
            store_root,
            cache_max_size,
            cache_max_age,
            cache_cleanup_interval,
            reaction_debounce,
            persist,
        })
    }

    /// Engine tunables carried by these settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache_max_size: self.cache_max_size,
            cache_max_age: self.cache_max_age,
            cache_cleanup_interval: self.cache_cleanup_interval,
            reaction_debounce: self.reaction_debounce,
            strict_ids: false,
        }
    }
}

/// Parse a numeric variable, treating missing or invalid values as unset.
fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
