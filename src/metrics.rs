//! Prometheus metrics for the three pipeline stages.
//!
//! Metrics include:
//! - records processed / dropped / failed per stage
//! - latency per stage (histogram)
//! - queue depth per channel
//! - pipeline run state and live embed-worker count

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec,
    IntGauge, IntGaugeVec, TextEncoder,
};
use tracing::error;

// ============================================
// METRIC DEFINITIONS
// ============================================

pub const STAGE_FETCH: &str = "fetch";
pub const STAGE_EMBED: &str = "embed";
pub const STAGE_STORE: &str = "store";

pub const ALL_STAGES: &[&str] = &[STAGE_FETCH, STAGE_EMBED, STAGE_STORE];

static RECORDS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vectrain_records_processed_total",
        "Total number of records processed by each stage",
        &["stage"]
    )
    .expect("failed to register vectrain_records_processed_total")
});

static RECORDS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vectrain_records_dropped_total",
        "Records dropped before reaching storage (malformed input, embed failure)",
        &["stage", "reason"]
    )
    .expect("failed to register vectrain_records_dropped_total")
});

static STAGE_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];
    register_histogram_vec!(
        HistogramOpts::new(
            "vectrain_stage_latency_seconds",
            "Latency of each pipeline stage in seconds"
        )
        .buckets(buckets),
        &["stage"]
    )
    .expect("failed to register vectrain_stage_latency_seconds")
});

static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "vectrain_queue_depth",
        "Approximate number of items waiting in each bounded queue",
        &["queue"]
    )
    .expect("failed to register vectrain_queue_depth")
});

static QUEUE_CAPACITY: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "vectrain_queue_capacity",
        "Configured capacity of each bounded queue",
        &["queue"]
    )
    .expect("failed to register vectrain_queue_capacity")
});

static ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vectrain_errors_total",
        "Total number of errors by stage and error type",
        &["stage", "error_type"]
    )
    .expect("failed to register vectrain_errors_total")
});

static EMBED_WORKERS_LIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "vectrain_embed_workers_live",
        "Number of embed workers still running"
    )
    .expect("failed to register vectrain_embed_workers_live")
});

static PIPELINE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "vectrain_pipeline_running",
        "1 while the pipeline is actively fetching (not paused, not draining)"
    )
    .expect("failed to register vectrain_pipeline_running")
});

static RATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "vectrain_records_per_second",
        "Records processed per second by each stage",
        &["stage"]
    )
    .expect("failed to register vectrain_records_per_second")
});

// ============================================
// METRICS API
// ============================================

pub fn record_processed(stage: &str, count: u64) {
    RECORDS_PROCESSED.with_label_values(&[stage]).inc_by(count);
}

pub fn record_dropped(stage: &str, reason: &str) {
    RECORDS_DROPPED.with_label_values(&[stage, reason]).inc();
}

pub fn record_stage_latency(stage: &str, latency_secs: f64) {
    STAGE_LATENCY.with_label_values(&[stage]).observe(latency_secs);
}

pub fn set_queue_depth(queue: &str, depth: i64) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth);
}

pub fn set_queue_capacity(queue: &str, capacity: i64) {
    QUEUE_CAPACITY.with_label_values(&[queue]).set(capacity);
}

pub fn record_error(stage: &str, error_type: &str) {
    ERRORS.with_label_values(&[stage, error_type]).inc();
}

pub fn set_embed_workers_live(count: i64) {
    EMBED_WORKERS_LIVE.set(count);
}

pub fn set_pipeline_running(running: bool) {
    PIPELINE_RUNNING.set(if running { 1 } else { 0 });
}

pub fn update_rate(stage: &str, rate: f64) {
    RATE.with_label_values(&[stage]).set(rate);
}

// ============================================
// METRICS COLLECTION
// ============================================

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

/// Times a stage's work and records it on drop, win or lose.
pub struct StageTimer {
    stage: &'static str,
    start: std::time::Instant,
}

impl StageTimer {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        record_stage_latency(self.stage, elapsed);
    }
}

#[macro_export]
macro_rules! time_stage {
    ($stage:expr, $block:expr) => {{
        let _timer = $crate::metrics::StageTimer::new($stage);
        $block
    }};
}

// ============================================
// METRICS SERVER
// ============================================

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{server::conn::http1, service::service_fn, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

async fn handle_metrics(_req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let metrics = gather_metrics();
    Ok(Response::new(Full::new(Bytes::from(metrics))))
}

pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_metrics))
                .await
            {
                error!(error = %e, "error serving metrics connection");
            }
        });
    }
}
