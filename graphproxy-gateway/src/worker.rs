//! Worker pool: one monoio runtime per thread, every worker serving both
//! the proxy listener and the realtime listener (the kernel balances
//! accepts across workers via SO_REUSEPORT).

use crate::connection::handle_connection;
use crate::gate::RequestGate;
use crate::realtime::RealtimeEndpoint;
use graphproxy_core::config::ProxyConfig;
use std::sync::Arc;
use tracing::{error, info};

/// Which listener a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Proxy,
    Realtime,
}

/// Shared state across all worker threads.
///
/// The gate and endpoint are internally synchronized (engine mutex,
/// per-app user locks); workers only ever read this struct.
pub struct SharedState {
    pub gate: RequestGate,
    pub realtime: RealtimeEndpoint,
    pub config: Arc<ProxyConfig>,
}

impl SharedState {
    pub fn new(gate: RequestGate, realtime: RealtimeEndpoint, config: ProxyConfig) -> Arc<Self> {
        Arc::new(Self {
            gate,
            realtime,
            config: Arc::new(config),
        })
    }
}

/// Spawn monoio worker threads — one per core by default.
///
/// Each thread runs an independent monoio runtime with its own pair of
/// TCP listeners (via SO_REUSEPORT) and event loop.
pub fn spawn_workers(
    shared: Arc<SharedState>,
    num_workers: usize,
) -> Vec<std::thread::JoinHandle<()>> {
    let proxy_addr = shared.config.proxy.addr();
    let realtime_addr = shared.config.realtime.addr();
    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let shared = Arc::clone(&shared);

        let handle = std::thread::Builder::new()
            .name(format!("graphproxy-worker-{}", worker_id))
            .spawn(move || {
                let mut rt = monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
                    .enable_all()
                    .build()
                    .expect("Failed to build monoio runtime");

                rt.block_on(worker_loop(worker_id, shared));
            })
            .expect("Failed to spawn worker thread");

        handles.push(handle);
    }

    info!(
        workers = num_workers,
        proxy_addr = %proxy_addr,
        realtime_addr = %realtime_addr,
        "Workers spawned"
    );
    handles
}

/// Main loop for a single worker thread: accept on both listeners.
async fn worker_loop(worker_id: usize, shared: Arc<SharedState>) {
    use monoio::net::TcpListener;

    let proxy_addr = shared.config.proxy.addr();
    let realtime_addr = shared.config.realtime.addr();

    let proxy_listener = TcpListener::bind(&proxy_addr).unwrap_or_else(|e| {
        panic!("Worker {} failed to bind to {}: {}", worker_id, proxy_addr, e);
    });
    let realtime_listener = TcpListener::bind(&realtime_addr).unwrap_or_else(|e| {
        panic!(
            "Worker {} failed to bind to {}: {}",
            worker_id, realtime_addr, e
        );
    });

    info!(
        worker = worker_id,
        proxy = %proxy_addr,
        realtime = %realtime_addr,
        "Worker listening"
    );

    {
        let shared = Arc::clone(&shared);
        monoio::spawn(accept_loop(
            realtime_listener,
            shared,
            Endpoint::Realtime,
            worker_id,
        ));
    }
    accept_loop(proxy_listener, shared, Endpoint::Proxy, worker_id).await;
}

async fn accept_loop(
    listener: monoio::net::TcpListener,
    shared: Arc<SharedState>,
    endpoint: Endpoint,
    worker_id: usize,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                // TCP_NODELAY — disable Nagle's for lowest latency
                let _ = stream.set_nodelay(true);

                let shared = Arc::clone(&shared);
                monoio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer_addr, shared, endpoint).await {
                        tracing::debug!(error = %e, "Connection closed");
                    }
                });
            }
            Err(e) => {
                error!(worker = worker_id, endpoint = ?endpoint, error = %e, "Accept error");
            }
        }
    }
}
