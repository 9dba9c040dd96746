//! Agent — wires sampling, the metric table and the reporter together.
//!
//! Two timer loops share one [`MetricTable`]: the poll loop records a
//! fresh sample every poll interval, the reporter sends the table every
//! report interval. Both stop on the shutdown signal.

use std::time::Duration;

use pulse_core::config::AgentConfig;
use pulse_core::{RetryPolicy, Signer};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, warn};

use crate::delivery::{Delivery, DeliveryOptions};
use crate::reporter::{ReportMode, Reporter};
use crate::sample::SampleSource;
use crate::table::MetricTable;

/// A configured producer.
pub struct Agent {
    source: SampleSource,
    table: MetricTable,
    reporter: Reporter,
    poll_interval: Duration,
}

impl Agent {
    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let table = MetricTable::new();
        let delivery = Delivery::new(DeliveryOptions {
            address: config.address.clone(),
            signer: Signer::from_key(config.key.as_deref()),
            timeout: config.request_timeout(),
            gzip: config.gzip,
        });
        let reporter = Reporter::new(
            table.clone(),
            delivery,
            RetryPolicy::new(config.max_retries),
            config.report_interval(),
            ReportMode::from_rate_limit(config.rate_limit),
        );

        Ok(Self {
            source: SampleSource::new(),
            table,
            reporter,
            poll_interval: config.poll_interval(),
        })
    }

    pub fn table(&self) -> &MetricTable {
        &self.table
    }

    /// Run both loops until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            mode = ?self.reporter.mode(),
            signed = self.reporter.is_signed(),
            "agent started"
        );

        let poll = tokio::spawn(
            poll_loop(self.source, self.table.clone(), self.poll_interval, shutdown.clone())
                .in_current_span(),
        );
        let report = tokio::spawn(self.reporter.run(shutdown).in_current_span());

        for (name, handle) in [("poll", poll), ("report", report)] {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "agent task failed");
            }
        }
        info!("agent stopped");
    }
}

async fn poll_loop(
    source: SampleSource,
    table: MetricTable,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let sample = source.sample();
                debug!(metrics = sample.len(), "sampled");
                table.record_all(sample).await;
            }
            _ = shutdown.changed() => {
                debug!("poll loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::MetricValue;

    #[test]
    fn invalid_config_is_rejected() {
        let config = AgentConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(Agent::from_config(&config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_records_a_sample_per_tick() {
        let table = MetricTable::new();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            SampleSource::new(),
            table.clone(),
            Duration::from_secs(2),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(7)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let drained = table.drain().await;
        let poll = drained.iter().find(|m| m.name() == "PollCount").unwrap();
        assert_eq!(poll.value(), MetricValue::Counter(3));
    }
}
