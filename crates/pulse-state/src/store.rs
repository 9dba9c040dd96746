//! MetricStore — the collector's concurrent metric table.
//!
//! One readers-writer lock guards the whole map: every mutation and every
//! snapshot read takes it, so updates to the same key are totally ordered
//! and a flush never observes a half-applied bulk write.
//!
//! The in-memory table is authoritative for reads. Writes are mirrored to
//! the configured persistence backends afterwards; a failing backing store
//! never rejects a single-metric update (it is logged), and a failing bulk
//! transaction is reported to the caller while memory keeps the values.
//! Only invalid input is refused: a bad name, a non-finite gauge or a
//! counter total that would overflow `i64`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use pulse_core::{Metric, MetricError, MetricKey, MetricKind};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::persistence::Persistence;

/// Shared handle to the metric table and its persistence.
#[derive(Clone)]
pub struct MetricStore {
    metrics: Arc<RwLock<HashMap<MetricKey, Metric>>>,
    persistence: Arc<Persistence>,
    /// Held from table copy to file write, so snapshots land in the order
    /// they were taken.
    flush_lock: Arc<Mutex<()>>,
}

impl MetricStore {
    pub fn new(persistence: Persistence) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
            persistence: Arc::new(persistence),
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    /// A store with no file and no database.
    pub fn in_memory() -> Self {
        Self::new(Persistence::in_memory())
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    // ── Writes ─────────────────────────────────────────────────────

    pub async fn set_gauge(&self, name: &str, value: f64) -> Result<Metric, MetricError> {
        self.update(Metric::gauge(name, value)).await
    }

    pub async fn set_counter(&self, name: &str, delta: i64) -> Result<Metric, MetricError> {
        self.update(Metric::counter(name, delta)).await
    }

    /// Merge one metric and return its new current value. Fails only on
    /// invalid input; backing-store and snapshot errors are logged.
    pub async fn update(&self, metric: Metric) -> Result<Metric, MetricError> {
        metric.validate()?;
        let current = {
            let mut metrics = self.metrics.write().await;
            merge_into(&mut metrics, metric.clone())?
        };

        if let Err(e) = self.persistence.upsert(&metric).await {
            warn!(key = %metric.key(), error = %e, "backing-store upsert failed, keeping in-memory value");
        }
        self.flush_if_synchronous().await;
        Ok(current)
    }

    /// Merge a batch. Memory takes the whole batch under one write lock;
    /// the backing store takes it in one transaction. An invalid metric
    /// rejects the whole batch before anything is applied; a backing-store
    /// failure is returned after memory has been updated.
    pub async fn merge_bulk(&self, batch: &[Metric]) -> StoreResult<()> {
        {
            let mut metrics = self.metrics.write().await;
            let staged = stage_batch(&metrics, batch)?;
            metrics.extend(staged);
        }
        debug!(metrics = batch.len(), "bulk merge applied in memory");

        let result = self.persistence.upsert_batch(batch).await;
        if let Err(e) = &result {
            warn!(metrics = batch.len(), error = %e, "bulk backing-store write failed");
        }
        self.flush_if_synchronous().await;
        result
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Point lookup: memory first, then the backing store if configured.
    pub async fn get(&self, kind: MetricKind, name: &str) -> StoreResult<Option<Metric>> {
        let key = MetricKey::new(kind, name);
        if let Some(metric) = self.metrics.read().await.get(&key) {
            return Ok(Some(metric.clone()));
        }
        self.persistence.fetch(&key).await
    }

    /// Every metric, ordered by kind then name.
    pub async fn get_all(&self) -> Vec<Metric> {
        let metrics = self.metrics.read().await;
        let mut all: Vec<Metric> = metrics.values().cloned().collect();
        drop(metrics);
        all.sort_by(|a, b| (a.kind(), a.name()).cmp(&(b.kind(), b.name())));
        all
    }

    pub async fn len(&self) -> usize {
        self.metrics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metrics.read().await.is_empty()
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.persistence.ping().await
    }

    // ── Snapshot file ──────────────────────────────────────────────

    /// Load the snapshot file into the (empty) table. Rows replace any
    /// entry with the same key rather than accumulating onto it.
    pub async fn restore(&self) -> StoreResult<usize> {
        let restored = self.persistence.read_snapshot().await?;
        let count = restored.len();
        let mut metrics = self.metrics.write().await;
        for metric in restored {
            metrics.insert(metric.key(), metric);
        }
        info!(metrics = count, "restored metrics from snapshot");
        Ok(count)
    }

    /// Write the whole table to the snapshot file. `Ok(false)` when no
    /// file is configured or the table is empty.
    pub async fn flush(&self) -> StoreResult<bool> {
        let _guard = self.flush_lock.lock().await;
        let all = self.get_all().await;
        self.persistence.write_snapshot(&all).await
    }

    async fn flush_if_synchronous(&self) {
        if self.persistence.is_synchronous() {
            if let Err(e) = self.flush().await {
                warn!(error = %e, "synchronous snapshot write failed");
            }
        }
    }

    /// Periodic flush loop. On shutdown it performs a final flush and
    /// returns; awaiting the task is the shutdown hand-off.
    pub async fn run_flusher(self, mut shutdown: watch::Receiver<bool>) {
        let Some(interval) = self.persistence.flush_interval() else {
            return;
        };
        info!(interval_secs = interval.as_secs(), "snapshot flusher started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.flush().await {
                        warn!(error = %e, "periodic snapshot write failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("snapshot flusher shutting down");
                    if let Err(e) = self.flush().await {
                        warn!(error = %e, "final snapshot write failed");
                    }
                    break;
                }
            }
        }
    }
}

fn merge_into(metrics: &mut HashMap<MetricKey, Metric>, incoming: Metric) -> Result<Metric, MetricError> {
    match metrics.entry(incoming.key()) {
        Entry::Occupied(mut entry) => {
            entry.get_mut().try_merge(incoming.value())?;
            Ok(entry.get().clone())
        }
        Entry::Vacant(entry) => Ok(entry.insert(incoming).clone()),
    }
}

/// Merge a batch into copies of the entries it touches. The copies are
/// only returned if every metric in the batch is accepted.
fn stage_batch(
    metrics: &HashMap<MetricKey, Metric>,
    batch: &[Metric],
) -> Result<HashMap<MetricKey, Metric>, MetricError> {
    let mut staged = HashMap::new();
    for incoming in batch {
        incoming.validate()?;
        let key = incoming.key();
        if !staged.contains_key(&key) {
            if let Some(current) = metrics.get(&key) {
                staged.insert(key, current.clone());
            }
        }
        merge_into(&mut staged, incoming.clone())?;
    }
    Ok(staged)
}
