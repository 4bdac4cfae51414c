use crate::flow_tracker::FlowTracker;
use crate::packet::TransportKind;
use crate::protocol::ClassificationResult;
use anyhow::Result;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::RwLock;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

// Registration only fails on duplicate or malformed names, which are static here.
macro_rules! counter {
    ($registry:expr, $name:expr, $help:expr) => {{
        let metric = IntCounter::new($name, $help).unwrap();
        $registry.register(Box::new(metric.clone())).unwrap();
        metric
    }};
    ($registry:expr, $name:expr, $help:expr, $labels:expr) => {{
        let metric = IntCounterVec::new(Opts::new($name, $help), $labels).unwrap();
        $registry.register(Box::new(metric.clone())).unwrap();
        metric
    }};
}

macro_rules! gauge {
    ($registry:expr, $name:expr, $help:expr) => {{
        let metric = IntGauge::new($name, $help).unwrap();
        $registry.register(Box::new(metric.clone())).unwrap();
        metric
    }};
}

/// Kinds of input the exporter could not turn into a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Json,
    Hex,
    Frame,
}

impl ParseErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            ParseErrorKind::Json => "json",
            ParseErrorKind::Hex => "hex",
            ParseErrorKind::Frame => "frame",
        }
    }
}

pub struct Metrics {
    registry: Registry,

    frames_total: IntCounterVec,
    parse_errors_total: IntCounterVec,
    flows_total: IntCounterVec,
    classifications_total: IntCounterVec,
    tracked_flows: IntGauge,
    flow_evictions_total: IntCounter,

    last_evictions: RwLock<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        Self {
            frames_total: counter!(
                registry,
                "flowdpi_frames_total",
                "Frames read from the input",
                &["link"]
            ),
            parse_errors_total: counter!(
                registry,
                "flowdpi_parse_errors_total",
                "Input lines that could not be decoded",
                &["error_type"]
            ),
            flows_total: counter!(
                registry,
                "flowdpi_flows_total",
                "Flows created by the tracker",
                &["transport"]
            ),
            classifications_total: counter!(
                registry,
                "flowdpi_classifications_total",
                "Flows classified, by protocol and detecting module",
                &["protocol", "source"]
            ),
            tracked_flows: gauge!(
                registry,
                "flowdpi_tracked_flows",
                "Flows currently held by the tracker"
            ),
            flow_evictions_total: counter!(
                registry,
                "flowdpi_flow_evictions_total",
                "Flows dropped after going idle"
            ),

            registry,
            last_evictions: RwLock::default(),
        }
    }

    pub fn record_frame(&self, link: &str) {
        self.frames_total.with_label_values(&[link]).inc();
    }

    pub fn increment_parse_errors(&self, kind: ParseErrorKind) {
        self.parse_errors_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_new_flow(&self, transport: Option<TransportKind>) {
        let label = transport.map_or("other", |kind| kind.as_str());
        self.flows_total.with_label_values(&[label]).inc();
    }

    pub fn record_classification(&self, result: &ClassificationResult) {
        self.classifications_total
            .with_label_values(&[&result.protocol.to_string(), result.source.as_str()])
            .inc();
    }

    /// Copies the tracker's size and the evictions since the last call.
    pub fn update_tracker_metrics(&self, tracker: &FlowTracker) {
        self.tracked_flows.set(tracker.tracked_flows() as i64);

        let current_evicted = tracker.total_evicted();
        let mut last_evicted = self.last_evictions.write();
        if current_evicted > *last_evicted {
            self.flow_evictions_total
                .inc_by(current_evicted - *last_evicted);
        }
        *last_evicted = current_evicted;
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

async fn metrics_handler(metrics: Arc<Metrics>) -> Response {
    let buffer = metrics.gather();
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}

pub async fn serve_metrics(metrics: Arc<Metrics>, port: u16) -> Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || metrics_handler(metrics.clone())),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
