//! Postgres backing store.
//!
//! Every call carries its own deadline. Kind ids are read once from
//! `metric_types` when the backing store is opened and cached for the
//! life of the process; a row whose kind id is not in the cache is
//! reported as a schema mismatch instead of being guessed at.

use std::future::Future;
use std::time::Duration;

use pulse_core::{Metric, MetricKey, MetricKind, MetricValue};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::schema;

const MAX_CONNECTIONS: u32 = 8;

// ── Kind cache ─────────────────────────────────────────────────────

/// Kind name → id mapping from the `metric_types` lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCache {
    gauge: i32,
    counter: i32,
}

impl KindCache {
    /// Build the cache from `(id, metric_type)` rows. Both kinds must be
    /// present.
    pub fn from_rows<I>(rows: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = (i32, String)>,
    {
        let mut gauge = None;
        let mut counter = None;
        for (id, name) in rows {
            match name.parse::<MetricKind>() {
                Ok(MetricKind::Gauge) => gauge = Some(id),
                Ok(MetricKind::Counter) => counter = Some(id),
                Err(_) => warn!(id, %name, "ignoring unknown metric type in lookup table"),
            }
        }
        match (gauge, counter) {
            (Some(gauge), Some(counter)) => Ok(Self { gauge, counter }),
            _ => Err(StoreError::SchemaMismatch(
                "metric_types must contain both 'gauge' and 'counter'".to_string(),
            )),
        }
    }

    pub fn id_of(&self, kind: MetricKind) -> i32 {
        match kind {
            MetricKind::Gauge => self.gauge,
            MetricKind::Counter => self.counter,
        }
    }

    pub fn kind_of(&self, id: i32) -> Option<MetricKind> {
        if id == self.gauge {
            Some(MetricKind::Gauge)
        } else if id == self.counter {
            Some(MetricKind::Counter)
        } else {
            None
        }
    }
}

// ── Rows ───────────────────────────────────────────────────────────

/// A row of the `metrics` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PersistedMetricRow {
    pub name: String,
    pub kind_id: i32,
    pub delta: Option<i64>,
    pub value: Option<f64>,
    /// Unix timestamp (seconds) of the last upsert.
    pub updated_at: i64,
}

impl PersistedMetricRow {
    /// Convert back into a [`Metric`], checking the kind id and that
    /// exactly the matching payload column is set.
    pub fn into_metric(self, kinds: &KindCache) -> StoreResult<Metric> {
        let kind = kinds.kind_of(self.kind_id).ok_or_else(|| {
            StoreError::SchemaMismatch(format!(
                "metric {:?} has unknown kind id {}",
                self.name, self.kind_id
            ))
        })?;
        let value = match (kind, self.delta, self.value) {
            (MetricKind::Counter, Some(delta), None) => MetricValue::Counter(delta),
            (MetricKind::Gauge, None, Some(value)) => MetricValue::Gauge(value),
            _ => {
                return Err(StoreError::SchemaMismatch(format!(
                    "{kind} metric {:?} has inconsistent payload columns",
                    self.name
                )));
            }
        };
        Metric::new(self.name, value).map_err(|e| StoreError::SchemaMismatch(e.to_string()))
    }
}

// ── Backing store ──────────────────────────────────────────────────

/// Connection pool plus cached kind ids.
#[derive(Clone)]
pub struct PgBacking {
    pool: PgPool,
    kinds: KindCache,
    timeout: Duration,
}

impl PgBacking {
    /// Connect, apply pending migrations and cache kind ids.
    pub async fn connect(dsn: &str, timeout: Duration) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(timeout)
            .connect(dsn)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        Self::open(pool, timeout).await
    }

    /// Initialize over an existing pool.
    pub async fn open(pool: PgPool, timeout: Duration) -> StoreResult<Self> {
        // A no-op when every migration is already applied.
        schema::MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migrate(e.to_string()))?;
        info!("database migrations applied");

        let rows: Vec<(i32, String)> = with_deadline(
            timeout,
            sqlx::query_as(schema::SELECT_KINDS).fetch_all(&pool),
        )
        .await?;
        let kinds = KindCache::from_rows(rows)?;
        info!(
            gauge_kind_id = kinds.id_of(MetricKind::Gauge),
            counter_kind_id = kinds.id_of(MetricKind::Counter),
            "cached metric kind ids"
        );

        Ok(Self {
            pool,
            kinds,
            timeout,
        })
    }

    pub fn kinds(&self) -> &KindCache {
        &self.kinds
    }

    pub async fn ping(&self) -> StoreResult<()> {
        with_deadline(self.timeout, sqlx::query(schema::PING).execute(&self.pool)).await?;
        Ok(())
    }

    /// Upsert one metric outside any transaction.
    pub async fn upsert(&self, metric: &Metric) -> StoreResult<()> {
        with_deadline(self.timeout, upsert_on(&self.pool, &self.kinds, metric)).await
    }

    /// Upsert a batch atomically: one transaction, rolled back on the
    /// first failing row.
    pub async fn upsert_batch(&self, metrics: &[Metric]) -> StoreResult<()> {
        with_deadline(self.timeout, async {
            let mut tx = self.pool.begin().await?;
            for metric in metrics {
                if let Err(e) = upsert_on(&mut *tx, &self.kinds, metric).await {
                    if let Err(rb) = tx.rollback().await {
                        warn!(error = %rb, "transaction rollback failed");
                    }
                    return Err(e);
                }
            }
            tx.commit().await?;
            debug!(rows = metrics.len(), "batch committed");
            Ok::<(), StoreError>(())
        })
        .await
    }

    /// Point read by `(name, kind)`.
    pub async fn fetch(&self, key: &MetricKey) -> StoreResult<Option<Metric>> {
        let row: Option<PersistedMetricRow> = with_deadline(
            self.timeout,
            sqlx::query_as(schema::SELECT_METRIC)
                .bind(&key.name)
                .bind(self.kinds.id_of(key.kind))
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(|r| r.into_metric(&self.kinds)).transpose()
    }
}

async fn upsert_on<'e, E>(executor: E, kinds: &KindCache, metric: &Metric) -> StoreResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let kind_id = kinds.id_of(metric.kind());
    let query = match metric.value() {
        MetricValue::Counter(delta) => sqlx::query(schema::UPSERT_COUNTER)
            .bind(metric.name())
            .bind(kind_id)
            .bind(delta),
        MetricValue::Gauge(value) => sqlx::query(schema::UPSERT_GAUGE)
            .bind(metric.name())
            .bind(kind_id)
            .bind(value),
    };
    query.execute(executor).await?;
    Ok(())
}

/// Run a backing-store call under a deadline, classifying its error.
async fn with_deadline<T, E, F>(timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<StoreError>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

#[cfg(test)]
impl PgBacking {
    pub(crate) fn from_parts(pool: PgPool, kinds: KindCache, timeout: Duration) -> Self {
        Self { pool, kinds, timeout }
    }

    /// A backing store whose pool points at a port nothing listens on.
    pub(crate) fn unreachable() -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(50))
            .connect_lazy("postgres://pulse@127.0.0.1:1/pulse")
            .unwrap();
        let kinds = KindCache::from_rows(vec![(1, "gauge".to_string()), (2, "counter".to_string())]).unwrap();
        Self::from_parts(pool, kinds, Duration::from_millis(100))
    }
}
