//! Poll the settings file and re-apply edits made by other processes.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::{ConfigStore, SettingsStorage, TomlFileStorage};

/// Spawns a task that checks `storage`'s modification time every `interval`
/// and pushes changed contents through [`ConfigStore::apply_external`].
/// Read and parse failures are logged; the task never exits on its own.
pub fn spawn_config_watcher(
    store: Arc<ConfigStore>,
    storage: TomlFileStorage,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen = modified(&storage).await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = modified(&storage).await;
            if now == last_seen {
                continue;
            }
            last_seen = now;
            let reader = storage.clone();
            match tokio::task::spawn_blocking(move || reader.load()).await {
                Ok(Ok(Some(patch))) => {
                    store.apply_external(&patch);
                }
                Ok(Ok(None)) => tracing::debug!("settings file removed; keeping current config"),
                Ok(Err(e)) => tracing::warn!("settings file change not applied: {:#}", e),
                Err(e) => tracing::warn!("settings reader failed: {}", e),
            }
        }
    })
}

async fn modified(storage: &TomlFileStorage) -> Option<SystemTime> {
    tokio::fs::metadata(storage.path())
        .await
        .and_then(|m| m.modified())
        .ok()
}
