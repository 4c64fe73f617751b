//! CLI command handlers, one file per command.

mod config;
mod fetch;
mod serve;

pub use config::{run_config_set, run_config_show};
pub use fetch::{run_fetch, FetchArgs};
pub use serve::run_serve;
