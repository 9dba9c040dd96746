//! Server mode — the collector.
//!
//! 1. Builds the metric store with its persistence backends
//! 2. Restores the snapshot file when asked to
//! 3. Starts the snapshot flusher (interval mode only)
//! 4. Serves the HTTP API until a shutdown signal
//! 5. Stops the flusher, which writes a final snapshot

use std::net::SocketAddr;

use anyhow::Context;
use pulse_api::ApiState;
use pulse_core::config::{ServerConfig, parse_address};
use pulse_core::{RetryPolicy, Signer};
use pulse_state::{MetricStore, Persistence, PgBacking};
use tokio::sync::watch;
use tracing::{Instrument, info, warn};

use crate::shutdown;

pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let store = build_store(&config).await?;
    let addr = bind_address(&config.address).await?;

    // ── Background flusher ───────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flusher = tokio::spawn(store.clone().run_flusher(shutdown_rx).in_current_span());

    // ── API server ───────────────────────────────────────────────
    let signer = Signer::from_key(config.key.as_deref());
    let signed = signer.is_some();
    let state = ApiState::new(store.clone(), signer);
    let router = pulse_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, signed, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown::signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for the flusher's final write.
    if let Err(e) = flusher.await {
        warn!(error = %e, "snapshot flusher failed");
    }
    if store.persistence().flush_interval().is_none() {
        if let Err(e) = store.flush().await {
            warn!(error = %e, "final snapshot write failed");
        }
    }

    info!(metrics = store.len().await, "server stopped");
    Ok(())
}

/// Assemble the store from the configured backends.
pub async fn build_store(config: &ServerConfig) -> anyhow::Result<MetricStore> {
    let mut persistence = Persistence::in_memory().with_retry(RetryPolicy::new(config.max_retries));

    if let Some(path) = config.snapshot_path() {
        info!(
            path = %path.display(),
            interval_secs = config.store_interval_secs,
            "snapshot file enabled"
        );
        persistence = persistence.with_snapshot(path, config.store_interval());
    }

    if let Some(dsn) = config.database_dsn() {
        let backing = PgBacking::connect(dsn, config.db_timeout())
            .await
            .context("connecting to the metric database")?;
        info!("database backing store enabled");
        persistence = persistence.with_backing(backing);
    }

    let store = MetricStore::new(persistence);
    if config.restore {
        store.restore().await.context("restoring the snapshot file")?;
    }
    Ok(store)
}

/// Resolve `host:port`; an empty host binds every interface.
async fn bind_address(address: &str) -> anyhow::Result<SocketAddr> {
    let (host, port) = parse_address(address)?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {address}"))?
        .next()
        .with_context(|| format!("no address found for {address}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::Metric;

    #[tokio::test]
    async fn empty_host_binds_all_interfaces() {
        let addr = bind_address(":8080").await.unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 8080);
    }

    #[tokio::test]
    async fn numeric_host_is_kept() {
        let addr = bind_address("127.0.0.1:9000").await.unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn store_restores_snapshot_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let config = ServerConfig {
            file_storage_path: path.display().to_string(),
            store_interval_secs: 0,
            ..ServerConfig::default()
        };

        let first = build_store(&config).await.unwrap();
        first.update(Metric::counter("polls", 7)).await.unwrap();

        let restored = build_store(&ServerConfig {
            restore: true,
            ..config.clone()
        })
        .await
        .unwrap();
        let polls = restored.get(pulse_core::MetricKind::Counter, "polls").await.unwrap();
        assert_eq!(polls, Some(Metric::counter("polls", 7)));

        let fresh = build_store(&config).await.unwrap();
        assert!(fresh.is_empty().await);
    }
}
