//! Agent and server settings.
//!
//! Values come from (highest precedence first) command-line flags,
//! environment variables, a TOML file and the defaults below. This module
//! owns the file layer and the defaults; `pulsed` layers flags and env on
//! top and then calls `validate()`.
//!
//! ```toml
//! [agent]
//! address = "collector:8080"
//! rate_limit = 4
//!
//! [server]
//! store_interval_secs = 0
//! database_dsn = "postgres://pulse@db/pulse"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// Both sections of a config file; either may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub agent: AgentConfig,
    pub server: ServerConfig,
}

impl PulseConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: PulseConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

// ── Agent ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector `host:port`.
    pub address: String,
    pub report_interval_secs: u64,
    pub poll_interval_secs: u64,
    /// Shared secret for body signing; empty or absent disables it.
    pub key: Option<String>,
    /// Number of concurrent senders; 0 sends one batch per report tick.
    pub rate_limit: usize,
    /// Delivery attempt budget; 0 disables retrying.
    pub max_retries: u32,
    pub request_timeout_ms: u64,
    /// Gzip request bodies.
    pub gzip: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            report_interval_secs: 10,
            poll_interval_secs: 2,
            key: None,
            rate_limit: 0,
            max_retries: 3,
            request_timeout_ms: 500,
            gzip: false,
        }
    }
}

impl AgentConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        parse_address(&self.address)?;
        if self.report_interval_secs == 0 {
            bail!("report interval must be greater than zero");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll interval must be greater than zero");
        }
        if self.request_timeout_ms == 0 {
            bail!("request timeout must be greater than zero");
        }
        Ok(())
    }
}

// ── Server ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen `host:port`.
    pub address: String,
    /// Snapshot interval; 0 writes the file after every update.
    pub store_interval_secs: u64,
    /// Snapshot file; empty disables file persistence.
    pub file_storage_path: String,
    /// Load the snapshot file at startup.
    pub restore: bool,
    /// Postgres DSN; absent disables the relational backing store.
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub max_retries: u32,
    pub db_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            store_interval_secs: 300,
            file_storage_path: "tmp/metrics-db.json".to_string(),
            restore: false,
            database_dsn: None,
            key: None,
            max_retries: 3,
            db_timeout_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        let path = self.file_storage_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    pub fn database_dsn(&self) -> Option<&str> {
        self.database_dsn.as_deref().filter(|dsn| !dsn.trim().is_empty())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        parse_address(&self.address)?;
        if self.db_timeout_ms == 0 {
            bail!("database timeout must be greater than zero");
        }
        Ok(())
    }
}

/// Split a `host:port` address. The host may be empty (all interfaces).
pub fn parse_address(address: &str) -> anyhow::Result<(&str, u16)> {
    let Some((host, port)) = address.rsplit_once(':') else {
        bail!("invalid address {address:?}: expected host:port");
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in address {address:?}"))?;
    Ok((host, port))
}
