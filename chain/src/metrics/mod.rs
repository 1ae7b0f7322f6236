//! Metrics and instrumentation for the chain.
//!
//! This module defines Prometheus-compatible metrics for the chain
//! processor and fork resolver, and exposes a small HTTP exporter that
//! serves `/metrics` in Prometheus text format.
//!
//! Typical usage in a node:
//!
//! ```ignore
//! use std::sync::Arc;
//! use forgechain::metrics::{MetricsRegistry, run_prometheus_http_server};
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! tokio::spawn(run_prometheus_http_server(registry.clone(), cfg.listen_addr));
//!
//! // Hand the consensus metrics to the chain processor:
//! builder.metrics(registry.consensus.clone());
//! ```

pub mod prometheus;

pub use prometheus::{ConsensusMetrics, MetricsRegistry, run_prometheus_http_server};
