//! pulse-agent — the producer side of the Pulse pipeline.
//!
//! ```text
//!  SampleSource ──poll──▶ MetricTable ──report──▶ Reporter ──HTTP──▶ collector
//! ```
//!
//! - [`SampleSource`] reads process, host and runtime counters.
//! - [`MetricTable`] keeps the latest value per metric between reports.
//! - [`Reporter`] delivers the table in bulk, or per metric through a
//!   bounded worker pool, under the shared retry policy.
//! - [`Agent`] runs the poll and report loops until shutdown.

pub mod agent;
pub mod delivery;
pub mod reporter;
pub mod sample;
pub mod table;

pub use agent::Agent;
pub use delivery::{Delivery, DeliveryError, DeliveryOptions};
pub use reporter::{ReportMode, Reporter};
pub use sample::SampleSource;
pub use table::MetricTable;
