//! Schedule change notifications.
//!
//! Operators edit transitions while room schedulers are sleeping towards the
//! next due time. Every edit publishes a [`ScheduleChange`] so the owning
//! scheduler re-reads the room's schedule instead of acting on a stale copy.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use playout_models::{RoomId, TransitionId};

use crate::error::QueueResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    TransitionUpserted,
    TransitionDeleted,
    /// Events or broadcast content of the room changed
    RoomUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleChange {
    pub room_id: RoomId,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_id: Option<TransitionId>,
    pub at: DateTime<Utc>,
}

impl ScheduleChange {
    pub fn transition_upserted(room_id: RoomId, transition_id: TransitionId) -> Self {
        Self {
            room_id,
            kind: ChangeKind::TransitionUpserted,
            transition_id: Some(transition_id),
            at: Utc::now(),
        }
    }

    pub fn transition_deleted(room_id: RoomId, transition_id: TransitionId) -> Self {
        Self {
            room_id,
            kind: ChangeKind::TransitionDeleted,
            transition_id: Some(transition_id),
            at: Utc::now(),
        }
    }

    pub fn room_updated(room_id: RoomId) -> Self {
        Self {
            room_id,
            kind: ChangeKind::RoomUpdated,
            transition_id: None,
            at: Utc::now(),
        }
    }
}

pub type ScheduleStream = Pin<Box<dyn Stream<Item = ScheduleChange> + Send>>;

#[async_trait]
pub trait ScheduleChannel: Send + Sync {
    async fn publish(&self, change: &ScheduleChange) -> QueueResult<()>;

    /// Changes for every room, from now on.
    async fn subscribe(&self) -> QueueResult<ScheduleStream>;
}

/// Schedule changes over Redis Pub/Sub.
pub struct RedisScheduleChannel {
    client: redis::Client,
    channel: String,
}

impl RedisScheduleChannel {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            channel: "playout:schedule_changes".to_string(),
        })
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

#[async_trait]
impl ScheduleChannel for RedisScheduleChannel {
    async fn publish(&self, change: &ScheduleChange) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(change)?;

        debug!(room_id = %change.room_id, kind = ?change.kind, "Publishing schedule change");
        conn.publish::<_, _, ()>(&self.channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self) -> QueueResult<ScheduleStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            match serde_json::from_str(&payload) {
                Ok(change) => Some(change),
                Err(e) => {
                    warn!("Dropping malformed schedule change: {}", e);
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// In-process schedule changes. Slow subscribers skip what they missed;
/// schedulers poll as well, so a lost change only delays a re-read.
#[derive(Clone)]
pub struct LocalScheduleChannel {
    sender: broadcast::Sender<ScheduleChange>,
}

impl LocalScheduleChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for LocalScheduleChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ScheduleChannel for LocalScheduleChannel {
    async fn publish(&self, change: &ScheduleChange) -> QueueResult<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(change.clone());
        Ok(())
    }

    async fn subscribe(&self) -> QueueResult<ScheduleStream> {
        let receiver = self.sender.subscribe();
        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => return Some((change, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Schedule change subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
