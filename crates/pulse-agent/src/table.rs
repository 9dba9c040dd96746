//! MetricTable — the agent's standing cache of latest values.
//!
//! Sampling records into the table; reporting drains a copy of it. The
//! table is never reset, so a failed delivery leaves every value in place
//! for the next report tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use pulse_core::{Metric, MetricKey};
use tokio::sync::RwLock;

/// Latest-value-per-metric table shared by the poll and report loops.
#[derive(Clone, Default)]
pub struct MetricTable {
    metrics: Arc<RwLock<BTreeMap<MetricKey, Metric>>>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the gauge's value.
    pub async fn record_gauge(&self, name: &str, value: f64) {
        self.record(Metric::gauge(name, value)).await;
    }

    /// Add `delta` to the counter, creating it at `delta` if absent.
    pub async fn record_counter(&self, name: &str, delta: i64) {
        self.record(Metric::counter(name, delta)).await;
    }

    pub async fn record(&self, metric: Metric) {
        let mut metrics = self.metrics.write().await;
        merge(&mut metrics, metric);
    }

    /// Record a whole sample atomically with respect to [`drain`](Self::drain).
    pub async fn record_all(&self, sample: Vec<Metric>) {
        let mut metrics = self.metrics.write().await;
        for metric in sample {
            merge(&mut metrics, metric);
        }
    }

    /// Point-in-time copy of every metric, ordered by kind then name.
    /// The table keeps its contents.
    pub async fn drain(&self) -> Vec<Metric> {
        self.metrics.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.metrics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metrics.read().await.is_empty()
    }
}

fn merge(metrics: &mut BTreeMap<MetricKey, Metric>, incoming: Metric) {
    match metrics.get_mut(&incoming.key()) {
        Some(current) => {
            current.merge(incoming.value());
        }
        None => {
            metrics.insert(incoming.key(), incoming);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::MetricValue;

    #[tokio::test]
    async fn counter_starts_at_first_delta_and_accumulates() {
        let table = MetricTable::new();
        table.record_counter("PollCount", 1).await;
        table.record_counter("PollCount", 1).await;
        table.record_counter("PollCount", 5).await;
        assert_eq!(table.drain().await, vec![Metric::counter("PollCount", 7)]);
    }

    #[tokio::test]
    async fn gauge_is_replaced() {
        let table = MetricTable::new();
        table.record_gauge("Alloc", 10.0).await;
        table.record_gauge("Alloc", 3.5).await;
        assert_eq!(table.drain().await, vec![Metric::gauge("Alloc", 3.5)]);
    }

    #[tokio::test]
    async fn drain_does_not_reset() {
        let table = MetricTable::new();
        table.record_counter("PollCount", 2).await;
        let first = table.drain().await;
        let second = table.drain().await;
        assert_eq!(first, second);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn record_all_merges_each_metric() {
        let table = MetricTable::new();
        table
            .record_all(vec![Metric::counter("c", 1), Metric::gauge("g", 1.0)])
            .await;
        table
            .record_all(vec![Metric::counter("c", 1), Metric::gauge("g", 2.0)])
            .await;

        let drained = table.drain().await;
        assert_eq!(drained, vec![Metric::gauge("g", 2.0), Metric::counter("c", 2)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_samples_and_drains_lose_nothing() {
        let table = MetricTable::new();
        let writers: Vec<_> = (0..50)
            .map(|_| {
                let table = table.clone();
                tokio::spawn(async move { table.record_counter("PollCount", 1).await })
            })
            .collect();
        let reader = {
            let table = table.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    table.drain().await;
                }
            })
        };
        for w in writers {
            w.await.unwrap();
        }
        reader.await.unwrap();

        let drained = table.drain().await;
        assert_eq!(drained[0].value(), MetricValue::Counter(50));
    }
}
