//! Validation errors for metric payloads.

use thiserror::Error;

use crate::metric::MetricKind;

/// A metric that cannot be accepted as-is. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("unknown metric type: {0:?}")]
    UnknownKind(String),

    #[error("invalid metric name: {0:?}")]
    InvalidName(String),

    #[error("{kind} metric {name:?} is missing its {field} field")]
    MissingPayload {
        name: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("{kind} metric {name:?} must not carry a {field} field")]
    UnexpectedPayload {
        name: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("cannot parse {raw:?} as a {kind} value")]
    ParseValue { kind: MetricKind, raw: String },

    #[error("gauge {0:?} has a non-finite value")]
    NonFinite(String),

    #[error("counter {0:?} would overflow")]
    CounterOverflow(String),
}
