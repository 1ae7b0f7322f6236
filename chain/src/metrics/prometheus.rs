//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and a set of strongly-typed consensus metrics, and an
//! async HTTP exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, warn};

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Chain-related Prometheus metrics.
///
/// Updated by the chain processor and the fork resolver.
#[derive(Clone)]
pub struct ConsensusMetrics {
    pub blocks_pushed: IntCounter,
    pub blocks_popped: IntCounter,
    /// Blocks refused by `push_block`, whatever the reason.
    pub blocks_rejected: IntCounter,
    /// Successful switches to a heavier fork.
    pub reorgs: IntCounter,
    pub peers_blacklisted: IntCounter,
    pub head_height: IntGauge,
    /// Time from receiving a block to committing it, in seconds.
    pub block_accept_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl ConsensusMetrics {
    /// Registers chain metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let block_accept_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "consensus_block_accept_seconds",
                "Time to verify, apply and commit a block in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )?;
        registry.register(Box::new(block_accept_seconds.clone()))?;

        let head_height = IntGauge::with_opts(Opts::new(
            "consensus_head_height",
            "Height of the canonical chain head",
        ))?;
        registry.register(Box::new(head_height.clone()))?;

        Ok(Self {
            blocks_pushed: counter(
                registry,
                "consensus_blocks_pushed",
                "Total number of blocks accepted onto the canonical chain",
            )?,
            blocks_popped: counter(
                registry,
                "consensus_blocks_popped",
                "Total number of blocks popped off the canonical chain",
            )?,
            blocks_rejected: counter(
                registry,
                "consensus_blocks_rejected",
                "Total number of blocks refused by the chain processor",
            )?,
            reorgs: counter(
                registry,
                "consensus_reorgs",
                "Total number of switches to a heavier fork",
            )?,
            peers_blacklisted: counter(
                registry,
                "consensus_peers_blacklisted",
                "Total number of peers blacklisted during sync",
            )?,
            head_height,
            block_accept_seconds,
        })
    }
}

/// Wrapper around a Prometheus registry and the consensus metrics.
///
/// This is the main handle you pass around in the node. It can be wrapped
/// in an [`Arc`] and shared across threads/tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub consensus: Arc<ConsensusMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("forgechain".to_string()), None)?;
        let consensus = Arc::new(ConsensusMetrics::register(&registry)?);
        Ok(Self {
            registry,
            consensus,
        })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                warn!(error = %err, "prometheus HTTP connection failed");
            }
        });
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));
    response
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            metrics.gather_text(),
        ),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "not found".to_string()),
    })
}
