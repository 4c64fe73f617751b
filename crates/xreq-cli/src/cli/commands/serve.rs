//! `xreq serve` – relay channel on a Unix socket with the curl executor.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use xreq_core::config::{spawn_config_watcher, ConfigStore, TomlFileStorage};
use xreq_core::executor::Executor;
use xreq_core::http::CurlClient;
use xreq_core::relay::RelayChannel;
use xreq_core::transport::{default_socket_path, UnixRelayListener};

/// How often the settings file is checked for edits made elsewhere.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run_serve(storage: TomlFileStorage, socket: Option<PathBuf>) -> Result<()> {
    let config = Arc::new(ConfigStore::load(storage.clone()));
    let watcher = spawn_config_watcher(Arc::clone(&config), storage, CONFIG_POLL_INTERVAL);

    let path = match socket {
        Some(p) => p,
        None => default_socket_path()?,
    };
    let listener = UnixRelayListener::bind(&path)?;
    let relay = RelayChannel::new(Executor::with_defaults(config, CurlClient::new()));
    println!("relay listening on {}", path.display());

    tokio::select! {
        _ = relay.serve_unix(listener) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            tracing::info!("relay shutting down");
        }
    }
    watcher.abort();
    Ok(())
}
