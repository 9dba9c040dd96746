//! pulse-state — the collector's metric store.
//!
//! # Architecture
//!
//! ```text
//! MetricStore (Clone, Arc<RwLock<HashMap<MetricKey, Metric>>>)
//!   ├── set_gauge / set_counter / update  ← single metric, fails only on bad input
//!   ├── merge_bulk                        ← whole batch or nothing, one lock, one txn
//!   ├── get / get_all                     ← memory, then Postgres read-through
//!   └── Persistence
//!         ├── SnapshotFile  ← pretty JSON, full overwrite, sync or on interval
//!         └── PgBacking     ← upsert keyed on (name, kind id), kind ids cached
//! ```
//!
//! Storage failures are classified by [`StoreError`] as retriable
//! (connection loss, timeouts) or fatal (constraint violations, schema
//! mismatch); writes to the backing store run under a
//! [`pulse_core::RetryPolicy`].

pub mod backing;
pub mod error;
pub mod persistence;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use backing::{KindCache, PersistedMetricRow, PgBacking};
pub use error::{StoreError, StoreResult};
pub use persistence::Persistence;
pub use snapshot::SnapshotFile;
pub use store::MetricStore;
