//! Backing stores for persisted settings.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::ConfigPatch;

/// Where the numeric settings live between runs.
pub trait SettingsStorage: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<ConfigPatch>>;
    fn store(&self, patch: &ConfigPatch) -> Result<()>;
}

/// Process-local storage; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<ConfigPatch>>>,
}

impl SettingsStorage for MemoryStorage {
    fn load(&self) -> Result<Option<ConfigPatch>> {
        Ok(*self.slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn store(&self, patch: &ConfigPatch) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(*patch);
        Ok(())
    }
}

/// TOML file, by default `~/.config/xreq/config.toml`.
#[derive(Debug, Clone)]
pub struct TomlFileStorage {
    path: PathBuf,
}

impl TomlFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at the XDG default location.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn default_path() -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("xreq")?;
        Ok(xdg_dirs.place_config_file("config.toml")?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the given settings if no file exists yet.
    pub fn init_if_missing(&self, initial: &ConfigPatch) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.store(initial)?;
        tracing::info!("created default config at {}", self.path.display());
        Ok(())
    }
}

impl SettingsStorage for TomlFileStorage {
    fn load(&self) -> Result<Option<ConfigPatch>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read config: {}", self.path.display()))
            }
        };
        let patch: ConfigPatch = toml::from_str(&data)
            .with_context(|| format!("parse config: {}", self.path.display()))?;
        Ok(Some(patch))
    }

    fn store(&self, patch: &ConfigPatch) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let toml = toml::to_string_pretty(patch).context("serialize config")?;
        fs::write(&self.path, toml)
            .with_context(|| format!("write config: {}", self.path.display()))?;
        Ok(())
    }
}
