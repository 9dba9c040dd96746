//! pulse-core — shared building blocks for the Pulse telemetry pipeline.
//!
//! Both sides of the pipeline (the `pulse-agent` producer and the
//! `pulse-state`/`pulse-api` collector) speak in terms of the types
//! defined here:
//!
//! - [`Metric`] — a named gauge or counter with exactly one payload,
//!   plus its JSON wire codec.
//! - [`RetryPolicy`] — bounded, linearly growing backoff shared by
//!   delivery and storage writes.
//! - [`Signer`] — HMAC-SHA256 payload signing carried in the
//!   [`SIGNATURE_HEADER`] header.
//! - [`config`] — agent and server settings, loadable from TOML.

pub mod config;
pub mod error;
pub mod metric;
pub mod retry;
pub mod sign;

pub use error::MetricError;
pub use metric::{Metric, MetricKey, MetricKind, MetricQuery, MetricValue, WireMetric};
pub use retry::{Retriable, RetryError, RetryPolicy};
pub use sign::{SIGNATURE_HEADER, Signer};
