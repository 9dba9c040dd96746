//! Reporter — turns the metric table into deliveries on a fixed interval.
//!
//! ```text
//!  unbounded (rate_limit = 0)
//!     tick ──▶ drain ──▶ POST /updates/ [batch]   (retried as one unit)
//!
//!  worker pool (rate_limit = N)
//!     tick ──▶ drain ──▶ bounded queue ──▶ worker 1 ──▶ POST /update/ {metric}
//!                        (cpus + 35)  ├──▶ worker 2 ──▶ ...
//!                                     └──▶ worker N
//! ```
//!
//! A failed delivery is logged and the loop carries on; the table keeps
//! its values so the next tick re-sends them.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{Metric, RetryError, RetryPolicy};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, warn};

use crate::delivery::{Delivery, DeliveryError};
use crate::table::MetricTable;

/// Queue slots added on top of the available parallelism.
pub const QUEUE_SLACK: usize = 35;

/// How the reporter fans deliveries out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// One bulk request per tick.
    Unbounded,
    /// One request per metric, `workers` at a time.
    WorkerPool { workers: usize },
}

impl ReportMode {
    /// `0` selects unbounded mode.
    pub fn from_rate_limit(rate_limit: usize) -> Self {
        match rate_limit {
            0 => ReportMode::Unbounded,
            workers => ReportMode::WorkerPool { workers },
        }
    }
}

/// Capacity of the worker-pool task queue.
pub fn queue_capacity() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get()) + QUEUE_SLACK
}

/// Periodic report loop over a [`MetricTable`].
pub struct Reporter {
    table: MetricTable,
    delivery: Arc<Delivery>,
    retry: RetryPolicy,
    interval: Duration,
    mode: ReportMode,
}

impl Reporter {
    pub fn new(
        table: MetricTable,
        delivery: Delivery,
        retry: RetryPolicy,
        interval: Duration,
        mode: ReportMode,
    ) -> Self {
        Self {
            table,
            delivery: Arc::new(delivery),
            retry,
            interval,
            mode,
        }
    }

    pub fn mode(&self) -> ReportMode {
        self.mode
    }

    pub fn is_signed(&self) -> bool {
        self.delivery.is_signed()
    }

    /// Send the current table contents as one batch. Returns how many
    /// metrics were delivered; an empty table sends nothing.
    pub async fn report_once(&self) -> Result<usize, RetryError<DeliveryError>> {
        let batch = self.table.drain().await;
        if batch.is_empty() {
            return Ok(0);
        }
        self.retry.run(|| self.delivery.send_batch(&batch)).await?;
        Ok(batch.len())
    }

    /// Run until shutdown. Stops without draining in-flight requests.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            mode = ?self.mode,
            collector = self.delivery.base(),
            "reporter started"
        );
        match self.mode {
            ReportMode::Unbounded => self.run_unbounded(shutdown).await,
            ReportMode::WorkerPool { workers } => self.run_pool(workers, shutdown).await,
        }
    }

    async fn run_unbounded(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.report_once().await {
                        Ok(sent) => debug!(metrics = sent, "report delivered"),
                        Err(e) => warn!(error = %e, "report failed, values kept for next tick"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("reporter shutting down");
                    break;
                }
            }
        }
    }

    async fn run_pool(self, workers: usize, mut shutdown: watch::Receiver<bool>) {
        let capacity = queue_capacity();
        let (tx, rx) = mpsc::channel::<Metric>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let worker = Worker {
                id,
                queue: Arc::clone(&rx),
                delivery: Arc::clone(&self.delivery),
                retry: self.retry,
            };
            pool.spawn(worker.run(shutdown.clone()).in_current_span());
        }
        info!(workers, queue_capacity = capacity, "worker pool started");

        'outer: loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    for metric in self.table.drain().await {
                        // Blocks while the queue is full.
                        tokio::select! {
                            sent = tx.send(metric) => {
                                if sent.is_err() {
                                    warn!("all report workers exited");
                                    break 'outer;
                                }
                            }
                            _ = shutdown.changed() => break 'outer,
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("reporter shutting down");
        drop(tx);
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "report worker panicked");
            }
        }
    }
}

/// One sender of the worker pool.
struct Worker {
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Metric>>>,
    delivery: Arc<Delivery>,
    retry: RetryPolicy,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                next = async { self.queue.lock().await.recv().await } => next,
                _ = shutdown.changed() => None,
            };
            let Some(metric) = next else {
                break;
            };

            let key = metric.key();
            match self.retry.run(|| self.delivery.send_one(&metric)).await {
                Ok(()) => debug!(worker = self.id, %key, "metric delivered"),
                Err(e) => warn!(worker = self.id, %key, error = %e, "metric delivery failed"),
            }
        }
        debug!(worker = self.id, "report worker stopped");
    }
}
