//! Operator API binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use playout_api::{create_router, metrics, ApiConfig, AppState};
use playout_queue::{RedisRenderQueue, RedisScheduleChannel};
use playout_store::RedisStore;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("API server failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _ = rustls::crypto::ring::default_provider().install_default();
    init_tracing();

    info!("Starting playout-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let store = RedisStore::from_env().context("connecting to store")?;
    store.ping().await.context("pinging store")?;
    let queue = RedisRenderQueue::from_env().context("connecting to render queue")?;
    queue.init().await.context("initializing render queue")?;
    let changes = RedisScheduleChannel::new(&redis_url).context("connecting to schedule channel")?;

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("installing Prometheus recorder")?)
    } else {
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;
    let state = AppState::new(config, Arc::new(store), Arc::new(queue), Arc::new(changes));
    let app = create_router(state, metrics_handle);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding listener")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}
