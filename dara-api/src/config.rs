//! Server configuration from the command line and environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::pairing::Timeouts;
use crate::session::SessionConfig;

/// Dara match server.
#[derive(Parser, Debug, Clone)]
#[command(name = "dara-server", about = "Dara match server")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "DARA_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Directory holding users.txt and the ranking files.
    #[arg(long, env = "DARA_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Time a joiner has to open its update stream.
    #[arg(long, env = "DARA_JOIN_TIMEOUT_MS", default_value_t = 5000)]
    pub join_timeout_ms: u64,

    /// Time a searcher waits for an opponent.
    #[arg(long, env = "DARA_SEARCH_TIMEOUT_MS", default_value_t = 60000)]
    pub search_timeout_ms: u64,

    /// Thinking time per player, in seconds.
    #[arg(long, env = "DARA_CLOCK_SECS", default_value_t = 300)]
    pub clock_secs: u64,

    #[arg(long, env = "DARA_KEEPALIVE_SECS", default_value_t = 30)]
    pub keepalive_secs: u64,

    /// How long a finished match accepts reconnects.
    #[arg(long, env = "DARA_GRACE_SECS", default_value_t = 30)]
    pub grace_secs: u64,
}

impl Config {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            pairing: Timeouts {
                join: Duration::from_millis(self.join_timeout_ms),
                search: Duration::from_millis(self.search_timeout_ms),
            },
            clock: Duration::from_secs(self.clock_secs),
            keepalive: Duration::from_secs(self.keepalive_secs),
            grace: Duration::from_secs(self.grace_secs),
        }
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.txt")
    }
}
