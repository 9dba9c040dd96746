//! pulse-api — the collector's HTTP surface.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/ping` | Backing-store health (200/500) |
//! | GET | `/` | HTML listing of every metric |
//! | GET | `/value/{type}/{name}` | Current value as plain text (200/404) |
//! | POST | `/update/{type}/{name}/{value}` | Path-encoded single update (200/400) |
//! | POST | `/update/` | Single JSON metric update |
//! | POST | `/value/` | JSON metric lookup |
//! | POST | `/updates/` | Bulk JSON array update |
//!
//! # Middleware
//!
//! ```text
//!  request ─▶ log ─▶ gzip ─▶ [content-type gate ─▶ signature] ─▶ handler
//!                                  JSON routes only    /update/, /updates/
//! ```

pub mod handlers;
pub mod listing;
pub mod middleware;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use pulse_core::Signer;
use pulse_state::MetricStore;

/// Shared state for handlers and middleware.
#[derive(Clone)]
pub struct ApiState {
    pub store: MetricStore,
    /// Set when a shared key is configured; requests to the write
    /// endpoints must then be signed and responses are signed.
    pub signer: Option<Signer>,
}

impl ApiState {
    pub fn new(store: MetricStore, signer: Option<Signer>) -> Self {
        Self { store, signer }
    }
}

/// Build the complete collector router.
pub fn build_router(state: ApiState) -> Router {
    let signed = Router::new()
        .route("/update/", post(handlers::update_json))
        .route("/updates/", post(handlers::update_bulk))
        .route_layer(from_fn_with_state(state.clone(), middleware::verify_signature));

    let json = Router::new()
        .route("/value/", post(handlers::value_json))
        .merge(signed)
        .route_layer(from_fn(middleware::require_json));

    Router::new()
        .route("/", get(listing::index))
        .route("/ping", get(handlers::ping))
        .route("/value/{kind}/{name}", get(handlers::value_text))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_path))
        .merge(json)
        .layer(from_fn(middleware::gzip))
        .layer(from_fn(middleware::log_request))
        .with_state(state)
}
