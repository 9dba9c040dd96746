//! Request middleware: access log, gzip transport, content-type gate and
//! payload signature check.

use std::io::{Read, Write};
use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use pulse_core::SIGNATURE_HEADER;
use tracing::{debug, info, warn};

use crate::ApiState;

/// Largest request or response body buffered by the middleware.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

// ── Access log ─────────────────────────────────────────────────

/// Log method, uri, status, elapsed time and response length.
pub async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let resp = next.run(req).await;

    let length = resp.body().size_hint().exact();
    info!(
        %method,
        %uri,
        status = resp.status().as_u16(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        length,
        "request handled"
    );
    resp
}

// ── gzip ───────────────────────────────────────────────────────

/// Inflate gzip request bodies and gzip JSON/HTML responses for clients
/// that accept it.
pub async fn gzip(req: Request, next: Next) -> Response {
    let accepts_gzip = header_contains(req.headers(), header::ACCEPT_ENCODING, "gzip");

    let req = if header_contains(req.headers(), header::CONTENT_ENCODING, "gzip") {
        match inflate_request(req).await {
            Ok(req) => req,
            Err(status) => return status.into_response(),
        }
    } else {
        req
    };

    let resp = next.run(req).await;
    if accepts_gzip && is_compressible(&resp) {
        deflate_response(resp).await
    } else {
        resp
    }
}

async fn inflate_request(req: Request) -> Result<Request, StatusCode> {
    let (mut parts, body) = req.into_parts();
    let compressed = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut inflated = Vec::new();
    GzDecoder::new(compressed.as_ref())
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| {
            debug!(error = %e, "malformed gzip body");
            StatusCode::BAD_REQUEST
        })?;
    if inflated.len() > MAX_BODY_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(Request::from_parts(parts, Body::from(inflated)))
}

fn is_compressible(resp: &Response) -> bool {
    if resp.headers().contains_key(header::CONTENT_ENCODING) {
        return false;
    }
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/html"))
}

async fn deflate_response(resp: Response) -> Response {
    let (mut parts, body) = resp.into_parts();
    let plain = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "cannot buffer response for compression");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let compressed = match encoder.write_all(&plain).and_then(|()| encoder.finish()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "response compression failed");
            return Response::from_parts(parts, Body::from(plain));
        }
    };

    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(compressed))
}

// ── Content-type gate ──────────────────────────────────────────

/// Reject anything but `application/json` with 400.
pub async fn require_json(req: Request, next: Next) -> Response {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        debug!(uri = %req.uri(), "rejected non-JSON content type");
        return StatusCode::BAD_REQUEST.into_response();
    }
    next.run(req).await
}

// ── Signature ──────────────────────────────────────────────────

/// With a key configured: require a valid `HashSHA256` over the request
/// body (400 otherwise) and sign the response body.
pub async fn verify_signature(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let Some(signer) = state.signer else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let Ok(body) = axum::body::to_bytes(body, MAX_BODY_BYTES).await else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let valid = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|sig| signer.verify(&body, sig));
    if !valid {
        warn!(uri = %parts.uri, "missing or invalid payload signature");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let resp = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (mut parts, body) = resp.into_parts();
    let body: Bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "cannot buffer response for signing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Ok(sig) = HeaderValue::from_str(&signer.sign(&body)) {
        parts.headers.insert(SIGNATURE_HEADER, sig);
    }
    Response::from_parts(parts, Body::from(body))
}

fn header_contains(headers: &HeaderMap, name: header::HeaderName, needle: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http;
    use axum::routing::post;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn echo(body: Bytes) -> impl IntoResponse {
        ([(header::CONTENT_TYPE, "application/json")], body)
    }

    fn gzip_app() -> Router {
        Router::new()
            .route("/echo", post(echo))
            .layer(axum::middleware::from_fn(gzip))
    }

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn gzip_request_is_inflated() {
        let req = http::Request::builder().method("POST").uri("/echo")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from(compress(b"{\"a\":1}")))
            .unwrap();
        let resp = gzip_app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"{\"a\":1}");
    }

    #[tokio::test]
    async fn malformed_gzip_is_bad_request() {
        let req = http::Request::builder().method("POST").uri("/echo")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from("definitely not gzip"))
            .unwrap();
        let resp = gzip_app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn response_is_gzipped_when_accepted() {
        let req = http::Request::builder().method("POST").uri("/echo")
            .header(header::ACCEPT_ENCODING, "gzip, deflate")
            .body(Body::from("{\"b\":2}"))
            .unwrap();
        let resp = gzip_app().oneshot(req).await.unwrap();
        assert_eq!(resp.headers()[header::CONTENT_ENCODING], "gzip");

        let compressed = resp.into_body().collect().await.unwrap().to_bytes();
        let mut plain = String::new();
        GzDecoder::new(compressed.as_ref()).read_to_string(&mut plain).unwrap();
        assert_eq!(plain, "{\"b\":2}");
    }

    #[tokio::test]
    async fn response_is_plain_without_accept_encoding() {
        let req = http::Request::builder().method("POST").uri("/echo").body(Body::from("{}")).unwrap();
        let resp = gzip_app().oneshot(req).await.unwrap();
        assert!(!resp.headers().contains_key(header::CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn content_type_gate_accepts_parameters() {
        let app = Router::new()
            .route("/echo", post(echo))
            .layer(axum::middleware::from_fn(require_json));

        let ok = http::Request::builder().method("POST").uri("/echo")
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(app.clone().oneshot(ok).await.unwrap().status(), StatusCode::OK);

        let missing = http::Request::builder().method("POST").uri("/echo").body(Body::from("{}")).unwrap();
        assert_eq!(app.oneshot(missing).await.unwrap().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn header_match_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("GZIP"));
        assert!(header_contains(&headers, header::ACCEPT_ENCODING, "gzip"));
        assert!(!header_contains(&headers, header::CONTENT_ENCODING, "gzip"));
    }
}
