//! Server configuration, parsed from a TOML file plus environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use deadhand_reconcile::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// General server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Ledger endpoint used for self-healing lookups
    #[serde(default)]
    pub ledger: LedgerSection,

    /// Store retry policy for confirmed-but-unmirrored events
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Data directory (SQLite index, outbox)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Outbox replay interval in seconds
    #[serde(default = "default_replay_interval")]
    pub replay_interval_secs: u64,

    /// Include internal error detail in HTTP responses
    #[serde(default)]
    pub debug: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            replay_interval_secs: default_replay_interval(),
            debug: false,
        }
    }
}

/// Ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// GraphQL endpoint
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,

    /// Seconds to wait for a ledger response before reporting it indeterminate
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            confirm_timeout_secs: default_confirm_timeout(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_replay_interval() -> u64 {
    60
}

fn default_graphql_url() -> String {
    "https://sui-testnet.mystenlabs.com/graphql".to_string()
}

fn default_confirm_timeout() -> u64 {
    30
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `DEADHAND_DATA_DIR`
    /// - `DEADHAND_LISTEN_ADDR`
    /// - `DEADHAND_LOG_LEVEL`
    /// - `DEADHAND_REPLAY_INTERVAL`
    /// - `DEADHAND_GRAPHQL_URL`
    /// - `DEADHAND_CONFIRM_TIMEOUT`
    /// - `DEADHAND_DEBUG`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DEADHAND_DATA_DIR") {
            self.server.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DEADHAND_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Ok(v) = std::env::var("DEADHAND_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("DEADHAND_REPLAY_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                self.server.replay_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("DEADHAND_GRAPHQL_URL") {
            self.ledger.graphql_url = v;
        }
        if let Ok(v) = std::env::var("DEADHAND_CONFIRM_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.ledger.confirm_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("DEADHAND_DEBUG") {
            self.server.debug = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.server.listen_addr))
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.confirm_timeout_secs)
    }

    pub fn index_path(&self) -> PathBuf {
        self.server.data_dir.join("index.sqlite")
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.server.data_dir.join("outbox.json")
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        anyhow::ensure!(
            !self.ledger.graphql_url.is_empty(),
            "ledger.graphql_url must not be empty"
        );
        anyhow::ensure!(
            self.ledger.confirm_timeout_secs > 0,
            "ledger.confirm_timeout_secs must be > 0"
        );

        // Replay at most every 5 seconds
        anyhow::ensure!(
            self.server.replay_interval_secs >= 5,
            "server.replay_interval_secs must be >= 5"
        );

        anyhow::ensure!(
            self.retry.max_attempts > 0,
            "retry.max_attempts must be > 0"
        );
        anyhow::ensure!(
            self.retry.base_delay_ms <= self.retry.max_delay_ms,
            "retry.base_delay_ms must not exceed retry.max_delay_ms"
        );

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
