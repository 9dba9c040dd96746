//! Agent mode — samples the process and reports to a collector until a
//! shutdown signal.

use pulse_agent::Agent;
use pulse_core::config::AgentConfig;
use tokio::sync::watch;
use tracing::{Instrument, info, warn};

use crate::shutdown;

pub async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    let agent = Agent::from_config(&config)?;
    info!(collector = %config.address, "agent starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx).in_current_span());

    shutdown::signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = handle.await {
        warn!(error = %e, "agent task failed");
    }
    Ok(())
}
