//! Room scheduler binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use playout_queue::RedisScheduleChannel;
use playout_scheduler::{
    Alerter, HttpSwitcher, LogAlerter, LoggingSwitcher, RedisRoomLease, SchedulerConfig, Supervisor,
    SystemClock, VideoSwitcher, WebhookAlerter,
};
use playout_store::RedisStore;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Scheduler failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting playout-scheduler");

    let config = SchedulerConfig::from_env();
    info!("Scheduler config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let key_prefix = std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "playout".to_string());

    let store = RedisStore::from_env().context("connecting to store")?;
    store.ping().await.context("pinging store")?;
    let channel = RedisScheduleChannel::new(&redis_url).context("connecting to schedule channel")?;
    let lease = RedisRoomLease::new(&redis_url, key_prefix).context("connecting to lease store")?;

    let switcher: Arc<dyn VideoSwitcher> = match &config.switcher_url {
        Some(url) => Arc::new(HttpSwitcher::new(url, config.switcher_timeout)?),
        None => {
            info!("SWITCHER_URL not set, switches will only be logged");
            Arc::new(LoggingSwitcher::new())
        }
    };
    let alerter: Arc<dyn Alerter> = match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlerter::new(url, config.switcher_timeout)?),
        None => Arc::new(LogAlerter::new()),
    };

    let supervisor = Supervisor::new(
        config,
        Arc::new(store),
        Arc::new(channel),
        Arc::new(lease),
        switcher,
        alerter,
        Arc::new(SystemClock),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(shutdown_rx).await?;
    info!("Scheduler shutdown complete");
    Ok(())
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
