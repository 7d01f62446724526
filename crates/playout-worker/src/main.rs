//! Render worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use playout_media::{check_ffmpeg, check_ffprobe, EncoderConfig, FfmpegEncoder};
use playout_storage::{LocalMediaStore, MediaStore, S3Storage};
use playout_store::RedisStore;
use playout_queue::RedisRenderQueue;
use playout_worker::{RenderExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Required by the TLS stacks of the Redis and S3 clients.
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting playout-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    check_ffmpeg().context("ffmpeg")?;
    check_ffprobe().context("ffprobe")?;

    let store = RedisStore::from_env().context("connecting to store")?;
    store.ping().await.context("pinging store")?;

    let queue = RedisRenderQueue::from_env().context("connecting to render queue")?;
    queue.init().await.context("initializing render queue")?;

    let media: Arc<dyn MediaStore> = match std::env::var("MEDIA_LOCAL_ROOT") {
        Ok(root) => {
            info!("Storing rendered media under {}", root);
            Arc::new(LocalMediaStore::new(root))
        }
        Err(_) => Arc::new(S3Storage::from_env().context("configuring S3 storage")?),
    };
    let encoder = FfmpegEncoder::new(EncoderConfig::from_env(), media);

    let executor = Arc::new(RenderExecutor::new(
        config,
        Arc::new(store),
        Arc::new(queue),
        Arc::new(encoder),
    ));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await?;
    info!("Worker shutdown complete");
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
