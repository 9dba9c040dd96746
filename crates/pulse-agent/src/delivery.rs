//! HTTP delivery of metrics to the collector.
//!
//! Every request carries `Content-Type: application/json`, advertises
//! `Accept-Encoding: gzip`, and when a key is configured the hex
//! HMAC-SHA256 of the uncompressed JSON in the `HashSHA256` header. The
//! body is optionally gzip-compressed. Anything but `200 OK` is a
//! failure; transport errors, timeouts and bad statuses are retriable.

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use pulse_core::{Metric, Retriable, SIGNATURE_HEADER, Signer};
use thiserror::Error;
use tracing::debug;

/// Bulk endpoint (JSON array).
pub const UPDATES_PATH: &str = "/updates/";
/// Single-metric endpoint (JSON object).
pub const UPDATE_PATH: &str = "/update/";

/// Why a delivery failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("compress payload: {0}")]
    Compress(#[from] std::io::Error),

    #[error("build request: {0}")]
    Request(#[from] http::Error),

    #[error("transport: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("collector answered {0}")]
    Status(StatusCode),
}

impl Retriable for DeliveryError {
    fn is_retriable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Transport(_) | DeliveryError::Timeout(_) | DeliveryError::Status(_)
        )
    }
}

/// Delivery options.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Collector address, `host:port` or a full `http://` base URL.
    pub address: String,
    pub signer: Option<Signer>,
    /// Deadline for one request, connect included.
    pub timeout: Duration,
    pub gzip: bool,
}

/// A pooled HTTP client bound to one collector.
#[derive(Clone)]
pub struct Delivery {
    client: Client<HttpConnector, Full<Bytes>>,
    base: String,
    signer: Option<Signer>,
    timeout: Duration,
    gzip: bool,
}

impl Delivery {
    pub fn new(options: DeliveryOptions) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            base: base_url(&options.address),
            signer: options.signer,
            timeout: options.timeout,
            gzip: options.gzip,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    /// POST the whole batch to the bulk endpoint.
    pub async fn send_batch(&self, metrics: &[Metric]) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(metrics)?;
        self.post(UPDATES_PATH, body).await
    }

    /// POST a single metric to the single-metric endpoint.
    pub async fn send_one(&self, metric: &Metric) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(metric)?;
        self.post(UPDATE_PATH, body).await
    }

    async fn post(&self, path: &str, json: Vec<u8>) -> Result<(), DeliveryError> {
        let uri = format!("{}{path}", self.base);

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(&uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT_ENCODING, "gzip")
            .header(header::USER_AGENT, concat!("pulse-agent/", env!("CARGO_PKG_VERSION")));
        if let Some(signer) = &self.signer {
            builder = builder.header(SIGNATURE_HEADER, signer.sign(&json));
        }
        let body = if self.gzip {
            builder = builder.header(header::CONTENT_ENCODING, "gzip");
            gzip(&json)?
        } else {
            json
        };
        let req = builder.body(Full::new(Bytes::from(body)))?;

        let status = tokio::time::timeout(self.timeout, async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;
            let status = resp.status();
            // Drain so the connection can go back to the pool.
            resp.into_body()
                .collect()
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;
            Ok::<StatusCode, DeliveryError>(status)
        })
        .await
        .map_err(|_| DeliveryError::Timeout(self.timeout))??;

        if status != StatusCode::OK {
            return Err(DeliveryError::Status(status));
        }
        debug!(%uri, "delivered");
        Ok(())
    }
}

/// gzip-compress `data`.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}
