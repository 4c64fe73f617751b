pub mod config;
pub mod logging;

pub mod bridge;
pub mod client;
pub mod executor;
pub mod header_rules;
pub mod http;
pub mod page;
pub mod protocol;
pub mod rate_limit;
pub mod relay;
pub mod transport;
