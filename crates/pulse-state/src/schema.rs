//! Postgres schema and statements for the backing store.
//!
//! Two tables: `metric_types` (kind name → id, seeded by the migration)
//! and `metrics`, keyed by `(id, metric_type_id)` where `id` is the
//! metric name.

use sqlx::migrate::Migrator;

/// Embedded migrations from `crates/pulse-state/migrations`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const SELECT_KINDS: &str = "SELECT id, metric_type FROM metric_types";

pub const UPSERT_COUNTER: &str = "\
INSERT INTO metrics (id, metric_type_id, delta, updated_at)
VALUES ($1, $2, $3, NOW())
ON CONFLICT (id, metric_type_id)
DO UPDATE SET delta = metrics.delta + EXCLUDED.delta, updated_at = NOW()";

pub const UPSERT_GAUGE: &str = "\
INSERT INTO metrics (id, metric_type_id, value, updated_at)
VALUES ($1, $2, $3, NOW())
ON CONFLICT (id, metric_type_id)
DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()";

pub const SELECT_METRIC: &str = "\
SELECT id AS name, metric_type_id AS kind_id, delta, value,
       EXTRACT(EPOCH FROM updated_at)::BIGINT AS updated_at
FROM metrics
WHERE id = $1 AND metric_type_id = $2
LIMIT 1";

pub const PING: &str = "SELECT 1";
