//! Server configuration from command-line flags and environment

use clap::Parser;
use eventstore_core::EngineConfig;
use std::net::SocketAddr;

/// CLI arguments for the event store server
#[derive(Debug, Parser)]
#[command(name = "eventstore")]
#[command(about = "Append-only event store with a JSON query API")]
#[command(version)]
pub struct CliArgs {
    /// HTTP listen address
    #[arg(long, env = "EVENTSTORE_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Storage location, e.g. lsm://.db or memory://
    #[arg(long, env = "EVENTSTORE_DB", default_value = "lsm://.db")]
    pub db: String,

    /// Event ids reserved per sequence lease
    #[arg(long, env = "EVENTSTORE_SEQUENCE_BANDWIDTH", default_value_t = eventstore_core::config::SEQUENCE_BANDWIDTH)]
    pub sequence_bandwidth: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "EVENTSTORE_LOG_JSON")]
    pub log_json: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Storage URI handed to the engine
    pub db_uri: String,
    /// Engine settings
    pub engine: EngineConfig,
    /// JSON log output
    pub log_json: bool,
}

impl CliArgs {
    /// Convert CLI args to server configuration
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            http_addr: self.listen,
            db_uri: self.db.clone(),
            engine: EngineConfig {
                sequence_bandwidth: self.sequence_bandwidth,
                ..EngineConfig::default()
            },
            log_json: self.log_json,
        }
    }
}
