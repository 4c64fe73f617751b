//! Executor tunables: defaults, validated updates and persistence.
//!
//! Only the numeric fields (`timeout`, `maxRetries`, `retryDelay`) can be
//! overridden. `allowedMethods` and the rate-limit shape always come from
//! [`RelayConfig::default`].

mod storage;
mod watch;

pub use storage::{MemoryStorage, SettingsStorage, TomlFileStorage};
pub use watch::spawn_config_watcher;

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::protocol::Method;

/// Inclusive `[min, max]` bounds for the persisted numeric settings.
pub mod limits {
    pub const TIMEOUT_MS: (u64, u64) = (1_000, 30_000);
    pub const MAX_RETRIES: (u32, u32) = (0, 10);
    pub const RETRY_DELAY_MS: (u64, u64) = (100, 5_000);
}

/// Sliding-window admission shape (per origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub window_ms: u64,
    /// Maximum admitted requests per window.
    pub max: u32,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max: 100,
        }
    }
}

/// Effective executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Per-attempt timeout in milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Base delay for linear backoff, in milliseconds.
    #[serde(rename = "retryDelay")]
    pub retry_delay_ms: u64,
    pub allowed_methods: Vec<Method>,
    pub rate_limit: RateLimitConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            allowed_methods: Method::ALL.to_vec(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn allows(&self, method: Method) -> bool {
        self.allowed_methods.contains(&method)
    }

    /// Overlay the numeric fields present in `patch`. No validation.
    fn overlay(&self, patch: &ConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(t) = patch.timeout {
            next.timeout_ms = t;
        }
        if let Some(r) = patch.max_retries {
            next.max_retries = r;
        }
        if let Some(d) = patch.retry_delay {
            next.retry_delay_ms = d;
        }
        next
    }
}

/// Partial update of the numeric settings. Also the persisted form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none() && self.max_retries.is_none() && self.retry_delay.is_none()
    }

    /// Check every present field against [`limits`]. The first violation wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(v) = self.timeout {
            let (min, max) = limits::TIMEOUT_MS;
            if !(min..=max).contains(&v) {
                return Err(ConfigError::Timeout { value: v, min, max });
            }
        }
        if let Some(v) = self.max_retries {
            let (min, max) = limits::MAX_RETRIES;
            if !(min..=max).contains(&v) {
                return Err(ConfigError::MaxRetries { value: v, min, max });
            }
        }
        if let Some(v) = self.retry_delay {
            let (min, max) = limits::RETRY_DELAY_MS;
            if !(min..=max).contains(&v) {
                return Err(ConfigError::RetryDelay { value: v, min, max });
            }
        }
        Ok(())
    }
}

impl From<&RelayConfig> for ConfigPatch {
    fn from(cfg: &RelayConfig) -> Self {
        Self {
            timeout: Some(cfg.timeout_ms),
            max_retries: Some(cfg.max_retries),
            retry_delay: Some(cfg.retry_delay_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("timeout must be between {min} and {max} ms (got {value})")]
    Timeout { value: u64, min: u64, max: u64 },
    #[error("max retries must be between {min} and {max} (got {value})")]
    MaxRetries { value: u32, min: u32, max: u32 },
    #[error("retry delay must be between {min} and {max} ms (got {value})")]
    RetryDelay { value: u64, min: u64, max: u64 },
    #[error("failed to persist settings: {0:#}")]
    Storage(anyhow::Error),
}

/// Owns the in-memory config and its backing storage.
///
/// Readers always get a snapshot of the latest value; writers replace it
/// wholesale, so concurrent updates are last-write-wins.
pub struct ConfigStore {
    current: RwLock<RelayConfig>,
    storage: Box<dyn SettingsStorage>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("current", &self.get())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Defaults only; `storage` is used for subsequent saves.
    pub fn new(storage: impl SettingsStorage + 'static) -> Self {
        Self {
            current: RwLock::new(RelayConfig::default()),
            storage: Box::new(storage),
        }
    }

    /// Defaults overlaid with whatever `storage` holds. Unreadable or invalid
    /// stored settings are logged and the defaults are kept.
    pub fn load(storage: impl SettingsStorage + 'static) -> Self {
        let store = Self::new(storage);
        match store.storage.load() {
            Ok(Some(patch)) => {
                if let Err(e) = patch.validate() {
                    tracing::warn!("ignoring stored settings: {}", e);
                } else {
                    store.replace(RelayConfig::default().overlay(&patch));
                    tracing::debug!(?patch, "loaded stored settings");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("could not load stored settings: {:#}", e),
        }
        store
    }

    /// Store with no persistence beyond the process.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::default())
    }

    /// Snapshot of the current config.
    pub fn get(&self) -> RelayConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and persist `patch`, then apply it.
    ///
    /// Any out-of-range field rejects the whole call; nothing is stored or
    /// applied in that case, and the same holds when the storage write fails.
    pub fn save(&self, patch: &ConfigPatch) -> Result<RelayConfig, ConfigError> {
        patch.validate()?;
        let next = self.get().overlay(patch);
        self.storage
            .store(&ConfigPatch::from(&next))
            .map_err(ConfigError::Storage)?;
        self.replace(next.clone());
        tracing::info!(
            timeout_ms = next.timeout_ms,
            max_retries = next.max_retries,
            retry_delay_ms = next.retry_delay_ms,
            "settings saved"
        );
        Ok(next)
    }

    /// Apply settings changed outside this process (best-effort).
    ///
    /// Valid patches replace the in-memory values without writing back;
    /// invalid ones are logged and dropped. Returns whether anything changed.
    pub fn apply_external(&self, patch: &ConfigPatch) -> bool {
        if let Err(e) = patch.validate() {
            tracing::warn!("ignoring external settings change: {}", e);
            return false;
        }
        let current = self.get();
        let next = current.overlay(patch);
        if next == current {
            return false;
        }
        tracing::info!(?patch, "applied external settings change");
        self.replace(next);
        true
    }

    fn replace(&self, next: RelayConfig) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
    }
}
