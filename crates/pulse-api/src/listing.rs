//! `GET /` — HTML listing of every stored metric.

use askama::Template;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use pulse_core::Metric;
use tracing::error;

use crate::ApiState;

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    metrics: Vec<Metric>,
}

/// Render the listing for `metrics`.
pub fn render(metrics: Vec<Metric>) -> Result<String, askama::Error> {
    IndexTemplate { metrics }.render()
}

/// GET /
pub async fn index(State(state): State<ApiState>) -> impl IntoResponse {
    match render(state.store.get_all().await) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "listing template failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
