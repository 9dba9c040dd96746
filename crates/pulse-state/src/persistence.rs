//! Persistence coordinator: routes store writes to the snapshot file
//! and/or the Postgres backing store.
//!
//! Both backends are optional and independent. Backing-store writes run
//! under the configured [`RetryPolicy`]; reads are single attempts.

use std::path::PathBuf;
use std::time::Duration;

use pulse_core::{Metric, MetricKey, RetryError, RetryPolicy};
use tracing::{debug, warn};

use crate::backing::PgBacking;
use crate::error::{StoreError, StoreResult};
use crate::snapshot::SnapshotFile;

/// Configured persistence backends.
#[derive(Default)]
pub struct Persistence {
    snapshot: Option<SnapshotFile>,
    /// Zero means the snapshot is rewritten after every write.
    snapshot_interval: Duration,
    backing: Option<PgBacking>,
    retry: RetryPolicy,
}

impl Persistence {
    /// No file, no database: a purely in-memory store.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, path: impl Into<PathBuf>, interval: Duration) -> Self {
        self.snapshot = Some(SnapshotFile::new(path));
        self.snapshot_interval = interval;
        self
    }

    pub fn with_backing(mut self, backing: PgBacking) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn snapshot(&self) -> Option<&SnapshotFile> {
        self.snapshot.as_ref()
    }

    pub fn has_backing(&self) -> bool {
        self.backing.is_some()
    }

    /// Whether the snapshot is rewritten after every write.
    pub fn is_synchronous(&self) -> bool {
        self.snapshot.is_some() && self.snapshot_interval.is_zero()
    }

    /// Interval for the background flusher, if one is needed.
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.snapshot.is_some() && !self.snapshot_interval.is_zero()).then_some(self.snapshot_interval)
    }

    /// Rewrite the snapshot file. `Ok(false)` when there is no file or
    /// nothing to write.
    pub async fn write_snapshot(&self, metrics: &[Metric]) -> StoreResult<bool> {
        match &self.snapshot {
            Some(file) => file.write(metrics).await,
            None => Ok(false),
        }
    }

    /// Load the snapshot file; empty when there is none.
    pub async fn read_snapshot(&self) -> StoreResult<Vec<Metric>> {
        match &self.snapshot {
            Some(file) => file.read().await,
            None => Ok(Vec::new()),
        }
    }

    /// Upsert a single metric into the backing store, if configured.
    pub async fn upsert(&self, metric: &Metric) -> StoreResult<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        self.retry
            .run(|| backing.upsert(metric))
            .await
            .map_err(give_up)?;
        debug!(key = %metric.key(), "metric upserted");
        Ok(())
    }

    /// Upsert a batch in one transaction, retrying the whole transaction.
    pub async fn upsert_batch(&self, metrics: &[Metric]) -> StoreResult<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        if metrics.is_empty() {
            return Ok(());
        }
        self.retry
            .run(|| backing.upsert_batch(metrics))
            .await
            .map_err(give_up)
    }

    /// Read-through lookup; `Ok(None)` without a backing store.
    pub async fn fetch(&self, key: &MetricKey) -> StoreResult<Option<Metric>> {
        match &self.backing {
            Some(backing) => backing.fetch(key).await,
            None => Ok(None),
        }
    }

    /// Health check. A missing backing store is reported as
    /// [`StoreError::Unavailable`].
    pub async fn ping(&self) -> StoreResult<()> {
        match &self.backing {
            Some(backing) => backing.ping().await,
            None => Err(StoreError::Unavailable),
        }
    }
}

fn give_up(err: RetryError<StoreError>) -> StoreError {
    if let RetryError::Exhausted { attempts, last } = &err {
        warn!(attempts, error = %last, "backing-store write abandoned: max attempts reached");
    }
    err.into_inner()
}
