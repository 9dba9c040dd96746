//! pulsed — the Pulse daemon.
//!
//! One binary, two roles:
//! - `server`: the collector. Serves the HTTP API over a metric store
//!   persisted to a snapshot file and/or Postgres.
//! - `agent`: the producer. Samples runtime counters and reports them to
//!   a collector.
//!
//! # Usage
//!
//! ```text
//! pulsed server -a :8080 -i 0 -f /var/lib/pulse/metrics.json -r
//! pulsed agent -a collector:8080 -p 2 -r 10 -l 4 -k secret
//! pulsed --config pulse.toml --log-format json server
//! ```

mod agent_mode;
mod logging;
mod server_mode;
mod settings;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pulse_core::config::PulseConfig;
use tracing::{Instrument, info_span};

use crate::logging::LogFormat;
use crate::settings::{AgentArgs, ServerArgs};

#[derive(Parser)]
#[command(name = "pulsed", version, about = "Pulse telemetry daemon")]
struct Cli {
    /// TOML config file; flags and environment override it.
    #[arg(long, global = true, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the collector.
    Server(ServerArgs),
    /// Run the reporting agent.
    Agent(AgentArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let file = match &cli.config {
        Some(path) => PulseConfig::from_file(path)?,
        None => PulseConfig::default(),
    };

    match cli.command {
        Command::Server(args) => {
            let config = args.apply(file.server);
            config.validate()?;
            server_mode::run_server(config)
                .instrument(info_span!("server"))
                .await
        }
        Command::Agent(args) => {
            let config = args.apply(file.agent);
            config.validate()?;
            agent_mode::run_agent(config)
                .instrument(info_span!("agent"))
                .await
        }
    }
}
