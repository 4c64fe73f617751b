//! `xreq config show|set` – inspect and change the persisted settings.

use anyhow::{bail, Result};
use std::path::Path;
use xreq_core::config::{ConfigPatch, ConfigStore};

pub fn run_config_show(store: &ConfigStore, path: &Path) -> Result<()> {
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&store.get())?);
    Ok(())
}

pub fn run_config_set(store: &ConfigStore, patch: ConfigPatch) -> Result<()> {
    if patch.is_empty() {
        bail!("nothing to set; pass --timeout, --max-retries or --retry-delay");
    }
    let cfg = store.save(&patch)?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}
