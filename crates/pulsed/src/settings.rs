//! Command-line and environment layer over the config file.
//!
//! Every flag is optional; a flag (or its environment variable) that is
//! present replaces the corresponding file or default value.

use clap::Args;
use pulse_core::config::{AgentConfig, ServerConfig};

#[derive(Debug, Default, Args)]
pub struct AgentArgs {
    /// Collector address, `host:port`.
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between reports.
    #[arg(short = 'r', long, env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Seconds between samples.
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Signing key.
    #[arg(short = 'k', long, env = "KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Concurrent senders; 0 sends one batch per report.
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Gzip request bodies.
    #[arg(long, env = "GZIP", num_args = 0..=1, default_missing_value = "true")]
    pub gzip: Option<bool>,
}

impl AgentArgs {
    pub fn apply(self, mut config: AgentConfig) -> AgentConfig {
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(secs) = self.report_interval {
            config.report_interval_secs = secs;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
        if let Some(key) = self.key {
            config.key = Some(key);
        }
        if let Some(limit) = self.rate_limit {
            config.rate_limit = limit;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout_ms = ms;
        }
        if let Some(gzip) = self.gzip {
            config.gzip = gzip;
        }
        config
    }
}

#[derive(Debug, Default, Args)]
pub struct ServerArgs {
    /// Listen address, `host:port`; an empty host listens on all interfaces.
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between snapshot writes; 0 writes after every update.
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Snapshot file; empty disables it.
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<String>,

    /// Load the snapshot file at startup.
    #[arg(short = 'r', long, env = "RESTORE", num_args = 0..=1, default_missing_value = "true")]
    pub restore: Option<bool>,

    /// Postgres DSN.
    #[arg(short = 'd', long, env = "DATABASE_DSN", hide_env_values = true)]
    pub database_dsn: Option<String>,

    /// Signing key.
    #[arg(short = 'k', long, env = "KEY", hide_env_values = true)]
    pub key: Option<String>,

    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "DB_TIMEOUT_MS")]
    pub db_timeout_ms: Option<u64>,
}

impl ServerArgs {
    pub fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(secs) = self.store_interval {
            config.store_interval_secs = secs;
        }
        if let Some(path) = self.file_storage_path {
            config.file_storage_path = path;
        }
        if let Some(restore) = self.restore {
            config.restore = restore;
        }
        if let Some(dsn) = self.database_dsn {
            config.database_dsn = Some(dsn);
        }
        if let Some(key) = self.key {
            config.key = Some(key);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(ms) = self.db_timeout_ms {
            config.db_timeout_ms = ms;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_flags_keep_file_values() {
        let file = AgentConfig {
            address: "collector:9090".to_string(),
            rate_limit: 4,
            ..AgentConfig::default()
        };
        let config = AgentArgs::default().apply(file.clone());
        assert_eq!(config, file);
    }

    #[test]
    fn agent_flags_override_file() {
        let args = AgentArgs {
            address: Some("other:1".to_string()),
            report_interval: Some(5),
            key: Some("secret".to_string()),
            gzip: Some(true),
            ..AgentArgs::default()
        };
        let config = args.apply(AgentConfig::default());
        assert_eq!(config.address, "other:1");
        assert_eq!(config.report_interval_secs, 5);
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.key.as_deref(), Some("secret"));
        assert!(config.gzip);
    }

    #[test]
    fn server_flags_override_file() {
        let file = ServerConfig {
            store_interval_secs: 60,
            restore: true,
            ..ServerConfig::default()
        };
        let args = ServerArgs {
            address: Some(":9000".to_string()),
            store_interval: Some(0),
            restore: Some(false),
            database_dsn: Some("postgres://localhost/pulse".to_string()),
            ..ServerArgs::default()
        };
        let config = args.apply(file);
        assert_eq!(config.address, ":9000");
        assert_eq!(config.store_interval_secs, 0);
        assert!(!config.restore);
        assert_eq!(config.database_dsn(), Some("postgres://localhost/pulse"));
        assert_eq!(config.file_storage_path, "tmp/metrics-db.json");
    }
}
