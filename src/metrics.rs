//! Prometheus metrics for the chat loop.
//!
//! Exposes:
//! - `nilecare_turn_duration_seconds` (histogram by prompt mode)
//! - `nilecare_turn_total` (counter by prompt mode and status)
//! - `nilecare_retrieved_chunks` (histogram of evidence count per turn)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram, register_histogram_vec, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounterVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static TURN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 100ms up to ~7 minutes.
    let buckets =
        prometheus::exponential_buckets(0.1, 2.0, 13).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "nilecare_turn_duration_seconds",
        "Time to answer one user message",
        &["mode"],
        buckets
    )
    .expect("failed to register turn duration histogram")
});

static TURN_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "nilecare_turn_total",
        "Answered user messages by prompt mode and status",
        &["mode", "status"]
    )
    .expect("failed to register turn counter")
});

static RETRIEVED_CHUNKS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "nilecare_retrieved_chunks",
        "Evidence chunks passing the similarity threshold per turn",
        vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0]
    )
    .expect("failed to register retrieved chunks histogram")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&TURN_DURATION);
    Lazy::force(&TURN_TOTAL);
    Lazy::force(&RETRIEVED_CHUNKS);
}

/// Record how many chunks a retrieval produced.
pub fn record_retrieval(chunks: usize) {
    init_collectors();
    RETRIEVED_CHUNKS.observe(chunks as f64);
}

/// Record a finished turn.
pub fn record_turn(mode: &str, duration: Duration, success: bool) {
    init_collectors();
    TURN_DURATION
        .with_label_values(&[mode])
        .observe(duration.as_secs_f64());
    TURN_TOTAL
        .with_label_values(&[mode, if success { "ok" } else { "error" }])
        .inc();
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        let mut response = Response::new(Full::from("encode error"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(response);
    }

    let mut response = Response::new(Full::from(buffer));
    if let Ok(value) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
