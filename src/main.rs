//! Binary entry point: wires up structured logging, the config manager's
//! env bootstrap, the Prometheus `/metrics` server and the control-plane
//! API, then serves until the process is killed.
//!
//! The teacher's single `main.rs` read its target URL and concurrency
//! straight from `TARGET_URL`/`NUM_CONCURRENT_TASKS` env vars and drove
//! one load test for the process's whole lifetime. Runs are now
//! submitted over the control-plane API instead (`POST /runs`), so this
//! binary's job is just to stand the process up: logging, metrics,
//! config, and the two HTTP servers.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use loadcore::config::ConfigManager;
use loadcore::control_plane;
use loadcore::metrics;
use loadcore::run_manager::RunManager;

/// Returns memory to the OS more aggressively than the system allocator
/// under the bursty allocation pattern of many short-lived per-transfer
/// buffers; declared by the teacher's `Cargo.toml` but never wired up —
/// now genuinely in effect.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    metrics::register_metrics()?;

    let config_manager = Arc::new(ConfigManager::bootstrap_from_env()?);
    let run_manager = Arc::new(RunManager::new(config_manager));

    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(9090);
    let control_plane_port: u16 = std::env::var("CONTROL_PLANE_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);

    let registry = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    tokio::spawn(metrics::start_metrics_server(metrics_port, registry));
    tokio::spawn(periodic_arena_collection());

    let control_plane_addr = SocketAddr::from(([0, 0, 0, 0], control_plane_port));
    info!(port = control_plane_port, "starting control-plane API");
    control_plane::serve(control_plane_addr, run_manager).await?;

    Ok(())
}

/// Between runs, a load test's per-transfer buffer churn leaves mimalloc
/// holding onto freed pages; `mi_collect` hands idle arena pages back to
/// the OS so a long-lived process's RSS tracks its active runs rather
/// than its historical peak.
async fn periodic_arena_collection() {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;
        unsafe {
            libmimalloc_sys::mi_collect(false);
        }
    }
}

/// Plain text by default, structured JSON when `LOG_FORMAT=json` — the
/// switch an operator flips in a container platform that scrapes logs
/// rather than a human terminal.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "plain".to_string());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
