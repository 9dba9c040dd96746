//! Route handlers.
//!
//! Validation failures are 400, an absent metric is 404 and a storage
//! failure is 500. Single updates never fail on storage: the in-memory
//! store accepts anything valid, and a counter total that would overflow
//! is a validation failure.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use pulse_core::{Metric, MetricKind, MetricQuery, MetricValue, WireMetric};
use pulse_state::StoreError;
use tracing::{debug, warn};

use crate::ApiState;

fn plain(status: StatusCode, body: String) -> axum::response::Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

// ── Health ─────────────────────────────────────────────────────

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "ping failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// ── Path-encoded routes ────────────────────────────────────────

/// GET /value/{type}/{name}
pub async fn value_text(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let Ok(kind) = kind.trim().parse::<MetricKind>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.store.get(kind, name.trim()).await {
        Ok(Some(metric)) => plain(StatusCode::OK, metric.to_string()),
        Ok(None) => {
            debug!(%kind, %name, "metric not found");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            warn!(%kind, %name, error = %e, "metric lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /update/{type}/{name}/{value}
pub async fn update_path(
    State(state): State<ApiState>,
    Path((kind, name, raw)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let metric = match parse_path_update(&kind, &name, &raw) {
        Ok(metric) => metric,
        Err(e) => {
            debug!(%kind, %name, value = %raw, error = %e, "rejected update");
            return plain(StatusCode::BAD_REQUEST, String::new());
        }
    };
    match state.store.update(metric).await {
        Ok(current) => {
            debug!(key = %current.key(), value = %current, "metric updated");
            plain(StatusCode::OK, String::new())
        }
        Err(e) => {
            debug!(%kind, %name, value = %raw, error = %e, "rejected update");
            plain(StatusCode::BAD_REQUEST, String::new())
        }
    }
}

fn parse_path_update(kind: &str, name: &str, raw: &str) -> Result<Metric, pulse_core::MetricError> {
    let kind: MetricKind = kind.trim().parse()?;
    let value = MetricValue::parse(kind, raw)?;
    Metric::new(name.trim(), value)
}

// ── JSON routes ────────────────────────────────────────────────

/// POST /update/
///
/// Responds with the metric's value after the merge.
pub async fn update_json(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let wire: WireMetric = match serde_json::from_slice(&body) {
        Ok(wire) => wire,
        Err(e) => {
            debug!(error = %e, "malformed metric body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    if wire.id.trim().is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let metric = match Metric::try_from(wire) {
        Ok(metric) => metric,
        Err(e) => {
            debug!(error = %e, "invalid metric");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state.store.update(metric).await {
        Ok(current) => Json(current).into_response(),
        Err(e) => {
            debug!(error = %e, "rejected update");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

/// POST /value/
pub async fn value_json(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let query: MetricQuery = match serde_json::from_slice(&body) {
        Ok(query) => query,
        Err(e) => {
            debug!(error = %e, "malformed lookup body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    if query.id.trim().is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let key = match query.key() {
        Ok(key) => key,
        Err(e) => {
            debug!(error = %e, "invalid lookup");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state.store.get(key.kind, &key.name).await {
        Ok(Some(metric)) => Json(metric).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(%key, error = %e, "metric lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /updates/
///
/// The whole batch is validated before anything is applied.
pub async fn update_bulk(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let batch: Vec<Metric> = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            debug!(error = %e, "malformed batch");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state.store.merge_bulk(&batch).await {
        Ok(()) => {
            debug!(metrics = batch.len(), "batch merged");
            Json(serde_json::json!({})).into_response()
        }
        Err(StoreError::Invalid(e)) => {
            debug!(metrics = batch.len(), error = %e, "rejected batch");
            StatusCode::BAD_REQUEST.into_response()
        }
        Err(e) => {
            warn!(metrics = batch.len(), error = %e, "batch persistence failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
