//! Render job announcements.
//!
//! The job store is the source of truth for render jobs; the queue only
//! wakes workers up. Messages are acknowledged as soon as they are read, so
//! delivery is at-most-once and workers sweep the store for NEW jobs to
//! cover anything lost.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use playout_models::RenderJobId;

use crate::error::{QueueError, QueueResult};

/// Wakes render workers when jobs are created.
#[async_trait]
pub trait RenderQueue: Send + Sync {
    /// Announce a NEW render job.
    async fn enqueue(&self, job_id: &RenderJobId) -> QueueResult<()>;

    /// Wait up to `block` for at most `max` announced job ids.
    async fn next_batch(&self, consumer: &str, max: usize, block: Duration) -> QueueResult<Vec<RenderJobId>>;
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for render job announcements
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Approximate stream length cap
    pub max_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "playout:render_jobs".to_string(),
            consumer_group: "playout:render_workers".to_string(),
            max_len: 10_000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("RENDER_QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("RENDER_QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            max_len: std::env::var("RENDER_QUEUE_MAX_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_len),
        }
    }
}

/// Render queue on a Redis stream with one consumer group shared by all workers.
pub struct RedisRenderQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisRenderQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn ack(&self, conn: &mut redis::aio::MultiplexedConnection, message_id: &str) -> QueueResult<()> {
        redis::pipe()
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RenderQueue for RedisRenderQueue {
    async fn enqueue(&self, job_id: &RenderJobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_len)
            .arg("*")
            .arg("job_id")
            .arg(job_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::announce(format!("XADD failed for {job_id}: {e}")))?;

        debug!(render_job_id = %job_id, message_id = message_id.as_str(), "Enqueued render job");
        Ok(())
    }

    async fn next_batch(&self, consumer: &str, max: usize, block: Duration) -> QueueResult<Vec<RenderJobId>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max.max(1))
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::read(e.to_string()))?;

        let mut ids = Vec::new();
        for stream_key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                match entry.get::<String>("job_id") {
                    Some(job_id) => ids.push(RenderJobId::from(job_id)),
                    None => warn!(message_id = entry.id.as_str(), "Render queue entry without job_id"),
                }
                self.ack(&mut conn, &entry.id).await?;
            }
        }
        Ok(ids)
    }
}

/// In-process render queue shared by every worker of one process.
#[derive(Clone, Default)]
pub struct LocalRenderQueue {
    pending: Arc<Mutex<VecDeque<RenderJobId>>>,
    notify: Arc<Notify>,
}

impl LocalRenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl RenderQueue for LocalRenderQueue {
    async fn enqueue(&self, job_id: &RenderJobId) -> QueueResult<()> {
        self.pending.lock().await.push_back(job_id.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn next_batch(&self, _consumer: &str, max: usize, block: Duration) -> QueueResult<Vec<RenderJobId>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Register interest before checking so a concurrent enqueue is not missed.
            let notified = self.notify.notified();
            {
                let mut pending = self.pending.lock().await;
                if !pending.is_empty() {
                    let take = max.max(1).min(pending.len());
                    return Ok(pending.drain(..take).collect());
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "playout:render_jobs");
        assert!(config.max_len > 0);
    }

    #[tokio::test]
    async fn test_local_queue_batches_in_order() {
        let queue = LocalRenderQueue::new();
        for id in ["a", "b", "c"] {
            queue.enqueue(&RenderJobId::from(id)).await.unwrap();
        }

        let batch = queue.next_batch("w", 2, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch, vec![RenderJobId::from("a"), RenderJobId::from("b")]);
        let batch = queue.next_batch("w", 2, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch, vec![RenderJobId::from("c")]);
    }

    #[tokio::test]
    async fn test_local_queue_times_out_empty() {
        let queue = LocalRenderQueue::new();
        let batch = queue.next_batch("w", 4, Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_local_queue_wakes_blocked_consumer() {
        let queue = LocalRenderQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_batch("w", 1, Duration::from_secs(5)).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(&RenderJobId::from("late")).await.unwrap();
        assert_eq!(consumer.await.unwrap(), vec![RenderJobId::from("late")]);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_queue_roundtrip() {
        let config = QueueConfig {
            stream_name: format!("playout:test:{}", RenderJobId::new()),
            ..QueueConfig::from_env()
        };
        let queue = RedisRenderQueue::new(config).unwrap();
        queue.init().await.unwrap();
        queue.enqueue(&RenderJobId::from("job-1")).await.unwrap();

        let batch = queue.next_batch("test", 10, Duration::from_millis(500)).await.unwrap();
        assert_eq!(batch, vec![RenderJobId::from("job-1")]);
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
