//! Forgechain node binary.
//!
//! This binary runs one chain on top of the `forgechain` crate:
//!
//! - opens the configured block store and replays the chain,
//! - serves the peer protocol and the forging API over HTTP,
//! - runs the forger, the fork checker and block propagation on their own
//!   threads,
//! - exports Prometheus metrics on `/metrics`.
//!
//! The forger and the fork checker do blocking work (hashing, blocking
//! peer requests, long chain-lock holds) and therefore run on plain OS
//! threads rather than on the async runtime.

mod config;
mod routes;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use forgechain::consensus::{ChainContext, ChainEvent, ChainProcessor, ForgeOutcome, Forger};
use forgechain::net::{BlockPropagator, ForkOutcome, ForkResolver, HttpPeerNetwork};
use forgechain::storage::StorageBackend;
use forgechain::{
    Block, BlockStore, ChainConfig, InMemoryBlockStore, MetricsRegistry, RocksDbBlockStore,
    run_prometheus_http_server,
};

use config::{ApiConfig, Args};
use routes::{blocks, forging, health, peer, transactions};
use state::{AppState, SharedState};

const DEFAULT_LOG_FILTER: &str = "forgechain=info,forgechain_node=info";
/// How often an idle propagator looks at the shutdown flag.
const PROPAGATION_POLL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let api_cfg = ApiConfig::from(&args);
    let chain_cfg = ChainConfig::load(args.config.as_deref())
        .map_err(|e| format!("failed to load configuration: {e}"))?;
    info!(
        variant = ?chain_cfg.consensus.variant,
        peers = chain_cfg.net.peers.len(),
        "configuration loaded"
    );

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if chain_cfg.metrics.enabled {
        let exporter = metrics.clone();
        let addr = chain_cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(exporter, addr).await {
                error!("metrics HTTP server error: {e}");
            }
        });
        info!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Storage + chain processor
    // ---------------------------

    let open_cfg = chain_cfg.clone();
    let consensus_metrics = metrics.consensus.clone();
    let (pushed_tx, pushed_rx) = mpsc::channel();
    let processor =
        tokio::task::spawn_blocking(move || open_chain(&open_cfg, consensus_metrics, pushed_tx))
        .await
        .map_err(|e| format!("chain open task failed: {e}"))??;

    let ctx = Arc::new(ChainContext::new(processor, chain_cfg.clone()));
    let forger = Arc::new(
        Forger::from_config(ctx.clone()).map_err(|e| format!("invalid forging settings: {e}"))?,
    );

    // ---------------------------
    // Background threads
    // ---------------------------

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut workers = vec![spawn_forger(forger.clone(), &chain_cfg, shutdown.clone())?];
    if chain_cfg.net.peers.is_empty() {
        info!("no peers configured, fork checking and block propagation disabled");
        drop(pushed_rx);
    } else {
        workers.push(spawn_fork_checker(
            ctx.clone(),
            &chain_cfg,
            metrics.clone(),
            shutdown.clone(),
        )?);
        workers.push(spawn_propagator(
            ctx.clone(),
            &chain_cfg,
            pushed_rx,
            shutdown.clone(),
        )?);
    }

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app_state: SharedState = Arc::new(AppState { ctx, forger });

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/status", get(health::status))
        .route("/peer", post(peer::peer))
        .route("/forging/start", post(forging::start))
        .route("/forging/stop", post(forging::stop))
        .route("/agreement", get(forging::agreement))
        .route("/blocks", get(blocks::blocks))
        .route("/transactions", post(transactions::submit))
        .with_state(app_state);

    info!("node API listening on http://{}", api_cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(api_cfg.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", api_cfg.listen_addr))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("API server error: {e}"));

    shutdown.store(true, Ordering::SeqCst);
    tokio::task::spawn_blocking(move || {
        for worker in workers {
            if worker.join().is_err() {
                warn!("background thread panicked");
            }
        }
    })
    .await
    .map_err(|e| format!("shutdown task failed: {e}"))?;

    served
}

/// Opens the configured block store and loads the chain from it.
///
/// Every pushed block is copied into `pushed` for the propagator. Sends
/// fail silently once nobody is receiving.
fn open_chain(
    cfg: &ChainConfig,
    metrics: Arc<forgechain::ConsensusMetrics>,
    pushed: Sender<Block>,
) -> Result<ChainProcessor, String> {
    let store: Box<dyn BlockStore> = match cfg.storage.backend {
        StorageBackend::Memory => Box::new(InMemoryBlockStore::new()),
        StorageBackend::RocksDb => Box::new(RocksDbBlockStore::open(&cfg.storage.rocksdb).map_err(
            |e| {
                format!(
                    "failed to open RocksDB store at {}: {e}",
                    cfg.storage.rocksdb.path
                )
            },
        )?),
    };

    ChainProcessor::builder(cfg.consensus.clone(), cfg.genesis.clone(), store)
        .metrics(metrics)
        .listener(ChainEvent::BlockPushed, move |block| {
            let _ = pushed.send(block.clone());
        })
        .open()
        .map_err(|e| format!("failed to open chain: {e}"))
}

/// Forging loop: ticks the forger until shutdown or a fatal chain error.
fn spawn_forger(
    forger: Arc<Forger>,
    cfg: &ChainConfig,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, String> {
    let interval = cfg.forging.tick_interval();
    thread::Builder::new()
        .name("forger".to_string())
        .spawn(move || {
            info!("forger running with tick {}ms", interval.as_millis());
            while !shutdown.load(Ordering::SeqCst) {
                match forger.tick() {
                    // Keep hashing while an attempt is live.
                    Ok(ForgeOutcome::Searching { .. }) | Ok(ForgeOutcome::Forged { .. }) => {}
                    Ok(ForgeOutcome::Dropped { reason }) => {
                        debug!(reason = %reason, "forging attempt dropped");
                        thread::sleep(interval);
                    }
                    Ok(_) => thread::sleep(interval),
                    Err(e) => {
                        error!(error = %e, "forger stopped on a fatal chain error");
                        break;
                    }
                }
            }
        })
        .map_err(|e| format!("failed to spawn forger thread: {e}"))
}

/// Fork-checking loop against the configured HTTP peers.
///
/// The blocking HTTP client is created on the thread itself so it never
/// lives inside the async runtime.
fn spawn_fork_checker(
    ctx: Arc<ChainContext>,
    cfg: &ChainConfig,
    metrics: Arc<MetricsRegistry>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, String> {
    let net_cfg = cfg.net.clone();
    thread::Builder::new()
        .name("fork-checker".to_string())
        .spawn(move || {
            let network = match HttpPeerNetwork::new(&net_cfg) {
                Ok(network) => Arc::new(network),
                Err(e) => {
                    error!(error = %e, "fork checker could not start");
                    return;
                }
            };
            let resolver =
                ForkResolver::new(ctx, network).with_metrics(metrics.consensus.clone());
            let interval = net_cfg.fork_check_interval();

            while !shutdown.load(Ordering::SeqCst) {
                match resolver.check_once() {
                    Ok(ForkOutcome::Switched {
                        peer,
                        popped,
                        pushed,
                        height,
                    }) => {
                        info!(peer = %peer, popped, pushed, height, "switched to peer fork");
                    }
                    Ok(outcome) => debug!(?outcome, "fork check finished"),
                    Err(e) => {
                        error!(error = %e, "fork checker stopped on a fatal chain error");
                        break;
                    }
                }
                thread::sleep(interval);
            }
        })
        .map_err(|e| format!("failed to spawn fork checker thread: {e}"))
}

/// Sends pushed blocks to peers, outside the chain lock the listener ran
/// under.
fn spawn_propagator(
    ctx: Arc<ChainContext>,
    cfg: &ChainConfig,
    pushed: Receiver<Block>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, String> {
    let net_cfg = cfg.net.clone();
    thread::Builder::new()
        .name("propagator".to_string())
        .spawn(move || {
            let network = match HttpPeerNetwork::new(&net_cfg) {
                Ok(network) => Arc::new(network),
                Err(e) => {
                    error!(error = %e, "block propagation could not start");
                    return;
                }
            };
            let propagator = BlockPropagator::new(network, ctx.clock().clone(), &net_cfg);

            while !shutdown.load(Ordering::SeqCst) {
                match pushed.recv_timeout(PROPAGATION_POLL) {
                    Ok(block) => {
                        propagator.send_block(&block);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .map_err(|e| format!("failed to spawn propagator thread: {e}"))
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
