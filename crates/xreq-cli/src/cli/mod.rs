//! CLI for the xreq relay.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xreq_core::config::{ConfigPatch, ConfigStore, RelayConfig, TomlFileStorage};

use commands::{run_config_set, run_config_show, run_fetch, run_serve, FetchArgs};

/// Top-level CLI for the xreq relay.
#[derive(Debug, Parser)]
#[command(name = "xreq")]
#[command(about = "xreq: relay cross-origin HTTP requests through a privileged executor", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the relay channel on a Unix socket until interrupted.
    Serve {
        /// Socket path (default: $XDG_STATE_HOME/xreq/relay.sock).
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Send one request through page client, bridge and relay; print the result as JSON.
    Fetch {
        /// HTTP/HTTPS URL to request.
        url: String,

        /// HTTP method (default GET, or POST when a body is given).
        #[arg(short = 'X', long)]
        method: Option<String>,

        /// Request header, repeatable.
        #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,

        /// Request body, sent as-is.
        #[arg(short = 'd', long)]
        data: Option<String>,

        /// Multipart file field, repeatable.
        #[arg(short = 'F', long = "form", value_name = "FIELD=@PATH")]
        files: Vec<String>,

        /// Requested timeout in milliseconds (capped by the relay's setting).
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Use a relay served by `xreq serve` instead of an in-process one.
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        /// Give up waiting for a result after this many seconds.
        #[arg(long, value_name = "SECS", default_value = "120")]
        wait: u64,
    },

    /// Show or change the persisted executor settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective settings.
    Show,

    /// Validate and store new values; untouched fields keep their value.
    Set {
        /// Per-attempt timeout in ms (1000..=30000).
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,
        /// Retries after the first attempt (0..=10).
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
        /// Linear backoff base in ms (100..=5000).
        #[arg(long, value_name = "MS")]
        retry_delay: Option<u64>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let storage = TomlFileStorage::open_default()?;
        storage.init_if_missing(&ConfigPatch::from(&RelayConfig::default()))?;
        tracing::debug!(path = %storage.path().display(), "using settings file");

        match cli.command {
            CliCommand::Serve { socket } => run_serve(storage, socket).await?,
            CliCommand::Fetch {
                url,
                method,
                headers,
                data,
                files,
                timeout,
                socket,
                wait,
            } => {
                let args = FetchArgs {
                    url,
                    method,
                    headers,
                    data,
                    files,
                    timeout,
                    socket,
                    wait,
                };
                run_fetch(storage, args).await?;
            }
            CliCommand::Config { action } => {
                let path = storage.path().to_path_buf();
                let store = ConfigStore::load(storage);
                match action {
                    ConfigAction::Show => run_config_show(&store, &path)?,
                    ConfigAction::Set {
                        timeout,
                        max_retries,
                        retry_delay,
                    } => run_config_set(
                        &store,
                        ConfigPatch {
                            timeout,
                            max_retries,
                            retry_delay,
                        },
                    )?,
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
