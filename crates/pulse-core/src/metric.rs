//! The metric model and its JSON wire codec.
//!
//! A [`Metric`] is identified by `(kind, name)` and carries exactly one
//! payload: an `i64` delta for counters or an `f64` value for gauges.
//! The invariant is enforced by [`MetricValue`]; the loose JSON shape
//! ([`WireMetric`]) is only ever converted through validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetricError;

/// Longest accepted metric name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

// ── Kind ───────────────────────────────────────────────────────────

/// The two supported metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Gauge, MetricKind::Counter];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricError::UnknownKind(other.to_string())),
        }
    }
}

// ── Value ──────────────────────────────────────────────────────────

/// The payload of a metric. The variant *is* the kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a plain-text value (as found in `/update/{type}/{name}/{value}`).
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        let raw = raw.trim();
        let parse_err = || MetricError::ParseValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => {
                let v: f64 = raw.parse().map_err(|_| parse_err())?;
                if !v.is_finite() {
                    return Err(parse_err());
                }
                Ok(MetricValue::Gauge(v))
            }
            MetricKind::Counter => raw.parse().map(MetricValue::Counter).map_err(|_| parse_err()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

// ── Key ────────────────────────────────────────────────────────────

/// Identity of a metric: `(kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub kind: MetricKind,
    pub name: String,
}

impl MetricKey {
    pub fn new(kind: MetricKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Check a metric name: non-empty, bounded, no whitespace, control
/// characters or path separators.
pub fn validate_name(name: &str) -> Result<(), MetricError> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/');
    if ok {
        Ok(())
    } else {
        Err(MetricError::InvalidName(name.to_string()))
    }
}

// ── Metric ─────────────────────────────────────────────────────────

/// A single named observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct Metric {
    name: String,
    value: MetricValue,
}

impl Metric {
    /// Build a metric, validating its name and payload.
    pub fn new(name: impl Into<String>, value: MetricValue) -> Result<Self, MetricError> {
        let metric = Self {
            name: name.into(),
            value,
        };
        metric.validate()?;
        Ok(metric)
    }

    /// Check the invariants [`Metric::gauge`] and [`Metric::counter`] skip:
    /// a valid name and a finite gauge value.
    pub fn validate(&self) -> Result<(), MetricError> {
        validate_name(&self.name)?;
        if let MetricValue::Gauge(v) = self.value {
            if !v.is_finite() {
                return Err(MetricError::NonFinite(self.name.clone()));
            }
        }
        Ok(())
    }

    /// Build a gauge. Intended for names known to be valid (sample tables,
    /// tests); invalid input is still rejected by the collector.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    /// Build a counter delta. See [`Metric::gauge`].
    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.kind(), self.name.clone())
    }

    /// Fold an incoming observation of the same identity into this one:
    /// counters accumulate (clamped at the `i64` bounds), gauges are
    /// replaced. Returns `false` if the kinds differ and nothing changed.
    pub fn merge(&mut self, incoming: MetricValue) -> bool {
        match (&mut self.value, incoming) {
            (MetricValue::Counter(total), MetricValue::Counter(delta)) => {
                *total = total.saturating_add(delta);
                true
            }
            (MetricValue::Gauge(current), MetricValue::Gauge(next)) => {
                *current = next;
                true
            }
            _ => false,
        }
    }

    /// Like [`Metric::merge`], but a counter total that would leave the
    /// `i64` range is an error and leaves the metric unchanged.
    pub fn try_merge(&mut self, incoming: MetricValue) -> Result<bool, MetricError> {
        if let (MetricValue::Counter(total), MetricValue::Counter(delta)) = (self.value, incoming) {
            let sum = total
                .checked_add(delta)
                .ok_or_else(|| MetricError::CounterOverflow(self.name.clone()))?;
            self.value = MetricValue::Counter(sum);
            return Ok(true);
        }
        Ok(self.merge(incoming))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

// ── Wire format ────────────────────────────────────────────────────

/// The JSON object exchanged between agent and collector:
/// `{"id", "type", "delta"?, "value"?, "hash"?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Accepted for compatibility; integrity is checked over the whole
    /// body via the signature header instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl TryFrom<WireMetric> for Metric {
    type Error = MetricError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        let kind: MetricKind = wire.kind.parse()?;
        let name = wire.id;
        let value = match kind {
            MetricKind::Gauge => {
                if wire.delta.is_some() {
                    return Err(MetricError::UnexpectedPayload {
                        name,
                        kind,
                        field: "delta",
                    });
                }
                match wire.value {
                    Some(v) => MetricValue::Gauge(v),
                    None => {
                        return Err(MetricError::MissingPayload {
                            name,
                            kind,
                            field: "value",
                        });
                    }
                }
            }
            MetricKind::Counter => {
                if wire.value.is_some() {
                    return Err(MetricError::UnexpectedPayload {
                        name,
                        kind,
                        field: "value",
                    });
                }
                match wire.delta {
                    Some(d) => MetricValue::Counter(d),
                    None => {
                        return Err(MetricError::MissingPayload {
                            name,
                            kind,
                            field: "delta",
                        });
                    }
                }
            }
        };
        Metric::new(name, value)
    }
}

impl From<Metric> for WireMetric {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Counter(d) => (Some(d), None),
            MetricValue::Gauge(v) => (None, Some(v)),
        };
        WireMetric {
            id: metric.name,
            kind: metric.value.kind().as_str().to_string(),
            delta,
            value,
            hash: None,
        }
    }
}

/// Lookup request body for `POST /value/`: `{"id", "type"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MetricQuery {
    pub fn key(&self) -> Result<MetricKey, MetricError> {
        let kind: MetricKind = self.kind.parse()?;
        validate_name(&self.id)?;
        Ok(MetricKey::new(kind, self.id.clone()))
    }
}
