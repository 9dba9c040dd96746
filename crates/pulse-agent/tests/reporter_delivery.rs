//! Reporter behaviour against a stub collector on a real socket.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use flate2::read::GzDecoder;
use pulse_agent::{Delivery, DeliveryOptions, MetricTable, ReportMode, Reporter};
use pulse_core::{Metric, RetryPolicy, SIGNATURE_HEADER, Signer};
use tokio::sync::{Mutex, watch};

#[derive(Debug, Clone)]
struct Received {
    path: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

#[derive(Clone)]
struct Stub {
    received: Arc<Mutex<Vec<Received>>>,
    status: Arc<AtomicU16>,
    hits: Arc<AtomicUsize>,
}

impl Stub {
    fn new() -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(AtomicU16::new(200)),
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn received(&self) -> Vec<Received> {
        self.received.lock().await.clone()
    }
}

async fn record(State(stub): State<Stub>, uri: Uri, headers: HeaderMap, body: Bytes) -> StatusCode {
    stub.hits.fetch_add(1, Ordering::SeqCst);
    stub.received.lock().await.push(Received {
        path: uri.path().to_string(),
        headers,
        body: body.to_vec(),
    });
    StatusCode::from_u16(stub.status.load(Ordering::SeqCst)).unwrap()
}

async fn serve(stub: Stub) -> String {
    let app = Router::new()
        .route("/updates/", post(record))
        .route("/update/", post(record))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

fn delivery(address: &str, key: Option<&str>, gzip: bool) -> Delivery {
    Delivery::new(DeliveryOptions {
        address: address.to_string(),
        signer: Signer::from_key(key),
        timeout: Duration::from_secs(2),
        gzip,
    })
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts).with_unit(Duration::from_millis(1))
}

async fn seeded_table() -> MetricTable {
    let table = MetricTable::new();
    table.record_gauge("Alloc", 1024.0).await;
    table.record_counter("PollCount", 3).await;
    table
}

#[tokio::test]
async fn unbounded_report_posts_signed_batch() {
    let stub = Stub::new();
    let addr = serve(stub.clone()).await;
    let reporter = Reporter::new(
        seeded_table().await,
        delivery(&addr, Some("secret"), false),
        fast_retry(3),
        Duration::from_secs(10),
        ReportMode::Unbounded,
    );

    assert_eq!(reporter.report_once().await.unwrap(), 2);

    let received = stub.received().await;
    assert_eq!(received.len(), 1);
    let req = &received[0];
    assert_eq!(req.path, "/updates/");
    assert_eq!(req.headers["content-type"], "application/json");
    assert_eq!(req.headers["accept-encoding"], "gzip");

    let signature = req.headers[SIGNATURE_HEADER].to_str().unwrap();
    assert!(Signer::new("secret").unwrap().verify(&req.body, signature));

    let batch: Vec<Metric> = serde_json::from_slice(&req.body).unwrap();
    assert_eq!(batch, vec![Metric::gauge("Alloc", 1024.0), Metric::counter("PollCount", 3)]);
}

#[tokio::test]
async fn unsigned_report_has_no_signature_header() {
    let stub = Stub::new();
    let addr = serve(stub.clone()).await;
    let reporter = Reporter::new(
        seeded_table().await,
        delivery(&addr, None, false),
        fast_retry(3),
        Duration::from_secs(10),
        ReportMode::Unbounded,
    );

    reporter.report_once().await.unwrap();
    assert!(!stub.received().await[0].headers.contains_key(SIGNATURE_HEADER));
}

#[tokio::test]
async fn gzip_body_is_signed_before_compression() {
    let stub = Stub::new();
    let addr = serve(stub.clone()).await;
    let reporter = Reporter::new(
        seeded_table().await,
        delivery(&addr, Some("secret"), true),
        fast_retry(3),
        Duration::from_secs(10),
        ReportMode::Unbounded,
    );

    reporter.report_once().await.unwrap();

    let req = stub.received().await.remove(0);
    assert_eq!(req.headers["content-encoding"], "gzip");
    let mut json = Vec::new();
    GzDecoder::new(req.body.as_slice()).read_to_end(&mut json).unwrap();

    let signature = req.headers[SIGNATURE_HEADER].to_str().unwrap();
    assert!(Signer::new("secret").unwrap().verify(&json, signature));
    let batch: Vec<Metric> = serde_json::from_slice(&json).unwrap();
    assert_eq!(batch.len(), 2);
}

#[tokio::test]
async fn empty_table_sends_nothing() {
    let stub = Stub::new();
    let addr = serve(stub.clone()).await;
    let reporter = Reporter::new(
        MetricTable::new(),
        delivery(&addr, None, false),
        fast_retry(3),
        Duration::from_secs(10),
        ReportMode::Unbounded,
    );

    assert_eq!(reporter.report_once().await.unwrap(), 0);
    assert_eq!(stub.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_200_is_retried_until_budget_is_spent() {
    let stub = Stub::new();
    stub.status.store(500, Ordering::SeqCst);
    let addr = serve(stub.clone()).await;
    let table = seeded_table().await;
    let reporter = Reporter::new(
        table.clone(),
        delivery(&addr, None, false),
        fast_retry(3),
        Duration::from_secs(10),
        ReportMode::Unbounded,
    );

    let err = reporter.report_once().await.unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(stub.hits.load(Ordering::SeqCst), 3);

    // Nothing is lost: the next tick re-sends the same values.
    assert_eq!(table.len().await, 2);
}

#[tokio::test]
async fn recovers_after_transient_failures() {
    let stub = Stub::new();
    stub.status.store(503, Ordering::SeqCst);
    let addr = serve(stub.clone()).await;
    let reporter = Reporter::new(
        seeded_table().await,
        delivery(&addr, None, false),
        RetryPolicy::new(5).with_unit(Duration::from_millis(20)),
        Duration::from_secs(10),
        ReportMode::Unbounded,
    );

    let flip = {
        let stub = stub.clone();
        tokio::spawn(async move {
            while stub.hits.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            stub.status.store(200, Ordering::SeqCst);
        })
    };

    assert_eq!(reporter.report_once().await.unwrap(), 2);
    flip.await.unwrap();
    assert!(stub.hits.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn disabled_retry_sends_once() {
    let stub = Stub::new();
    stub.status.store(500, Ordering::SeqCst);
    let addr = serve(stub.clone()).await;
    let reporter = Reporter::new(
        seeded_table().await,
        delivery(&addr, None, false),
        RetryPolicy::disabled(),
        Duration::from_secs(10),
        ReportMode::Unbounded,
    );

    assert!(reporter.report_once().await.is_err());
    assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn worker_pool_sends_one_request_per_metric() {
    let stub = Stub::new();
    let addr = serve(stub.clone()).await;
    let table = MetricTable::new();
    for i in 0..10 {
        table.record_gauge(&format!("g{i}"), i as f64).await;
    }
    let reporter = Reporter::new(
        table,
        delivery(&addr, Some("secret"), false),
        fast_retry(3),
        Duration::from_millis(50),
        ReportMode::WorkerPool { workers: 3 },
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(reporter.run(rx));

    tokio::time::timeout(Duration::from_secs(5), async {
        while stub.hits.load(Ordering::SeqCst) < 10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tx.send(true).unwrap();
    handle.await.unwrap();

    let received = stub.received().await;
    assert!(received.iter().all(|r| r.path == "/update/"));
    let signer = Signer::new("secret").unwrap();
    for req in &received[..10] {
        let sig = req.headers[SIGNATURE_HEADER].to_str().unwrap();
        assert!(signer.verify(&req.body, sig));
        let metric: Metric = serde_json::from_slice(&req.body).unwrap();
        assert!(metric.name().starts_with('g'));
    }
}

#[tokio::test]
async fn reporter_loop_keeps_running_after_failures() {
    let stub = Stub::new();
    stub.status.store(500, Ordering::SeqCst);
    let addr = serve(stub.clone()).await;
    let reporter = Reporter::new(
        seeded_table().await,
        delivery(&addr, None, false),
        RetryPolicy::disabled(),
        Duration::from_millis(20),
        ReportMode::Unbounded,
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(reporter.run(rx));

    tokio::time::timeout(Duration::from_secs(5), async {
        while stub.hits.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tx.send(true).unwrap();
    handle.await.unwrap();
}
