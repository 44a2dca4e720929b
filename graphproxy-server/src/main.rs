// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  graphproxy — caching Graph API proxy with realtime invalidation
//
//  Architecture: monoio thread-per-core workers serving the proxy and
//  realtime listeners; one shared cache engine; blocking HTTPS upstream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use graphproxy_cache::engine::{CacheEngine, GraphFetch, RequestCache};
use graphproxy_core::app::AppRegistry;
use graphproxy_core::config::ProxyConfig;
use graphproxy_gateway::gate::RequestGate;
use graphproxy_gateway::realtime::RealtimeEndpoint;
use graphproxy_gateway::upstream::GraphClient;
use graphproxy_gateway::worker::{self, SharedState};
use graphproxy_gateway::register;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Global shutdown flag — checked by signal handler.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(
    name = "graphproxy",
    version,
    about = "Caching Graph API proxy with realtime invalidation"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/graphproxy/graphproxy.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "graphproxy starting"
    );

    // ── Config ──
    let config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
        ProxyConfig::load(cli.config.to_str())?
    } else {
        info!("No config file found, using defaults");
        ProxyConfig::default()
    };

    let num_workers = config.effective_workers();
    info!(workers = num_workers, "Worker count");

    // ── Application registry ──
    let apps = Arc::new(AppRegistry::from_config(&config.apps));
    info!(apps = apps.len(), "Applications registered");

    // ── Cache engine ──
    let engine = Arc::new(CacheEngine::new(config.cache_entries));
    info!(entries = config.cache_entries, "Cache engine ready");

    // ── Upstream client ──
    let upstream: Arc<dyn GraphFetch> = Arc::new(GraphClient::new(&config.graph_server)?);

    // ── Handlers ──
    let gate = RequestGate::new(
        None,
        Some(Arc::clone(&engine) as Arc<dyn RequestCache>),
        Arc::clone(&apps),
        Arc::clone(&upstream),
    );
    let realtime = RealtimeEndpoint::new(
        Arc::clone(&engine) as Arc<dyn RequestCache>,
        Arc::clone(&apps),
    );
    let verify_token = realtime.verify_token().to_string();

    // ── Shared state + workers ──
    let graph_server = config.graph_server.clone();
    let endpoint = format!(
        "http://{}:{}/",
        config.public_hostname, config.realtime.port
    );
    let proxy_addr = config.proxy.addr();
    let realtime_addr = config.realtime.addr();
    let shared = SharedState::new(gate, realtime, config);
    let worker_handles = worker::spawn_workers(Arc::clone(&shared), num_workers);

    info!(
        workers = num_workers,
        proxy_addr = %proxy_addr,
        realtime_addr = %realtime_addr,
        "graphproxy is ready — serving traffic"
    );

    // ── Subscription registration ──
    // the upstream calls the realtime endpoint back during registration,
    // so give the listeners a moment to come up first
    std::thread::sleep(std::time::Duration::from_secs(2));
    register::register_apps(&apps, &endpoint, &graph_server, &verify_token);

    // ── Graceful shutdown: wait for SIGTERM/SIGINT ──
    setup_signal_handler();

    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    info!("Shutdown signal received, stopping...");

    // Workers run an infinite accept loop; on process exit all threads
    // are cleaned up by the OS.
    drop(worker_handles);

    info!("graphproxy stopped");
    Ok(())
}

fn setup_signal_handler() {
    // SIGTERM (docker stop) + SIGINT (Ctrl+C)
    for sig in [libc::SIGTERM, libc::SIGINT] {
        unsafe {
            libc::signal(sig, signal_handler as libc::sighandler_t);
        }
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}
