//! Room leases.
//!
//! Only the holder of a room's lease runs its scheduler, so two scheduler
//! instances never drive the same room. Leases expire unless renewed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::Script;
use tracing::debug;

use playout_models::RoomId;

use crate::error::SchedulerResult;

#[async_trait]
pub trait RoomLease: Send + Sync {
    /// Take the lease, or extend it if `holder` already has it. Returns
    /// false when someone else holds it.
    async fn acquire(&self, room_id: &RoomId, holder: &str, ttl: Duration) -> SchedulerResult<bool>;

    /// Give the lease up if `holder` has it.
    async fn release(&self, room_id: &RoomId, holder: &str) -> SchedulerResult<()>;
}

/// Renew when we hold it, otherwise SET NX PX.
const ACQUIRE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
if current then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Lease stored as a Redis key with a TTL.
pub struct RedisRoomLease {
    client: redis::Client,
    prefix: String,
}

impl RedisRoomLease {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> SchedulerResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            prefix: prefix.into(),
        })
    }

    fn key(&self, room_id: &RoomId) -> String {
        format!("{}:room_lease:{}", self.prefix, room_id)
    }
}

#[async_trait]
impl RoomLease for RedisRoomLease {
    async fn acquire(&self, room_id: &RoomId, holder: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let acquired: i32 = Script::new(ACQUIRE_SCRIPT)
            .key(self.key(room_id))
            .arg(holder)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    async fn release(&self, room_id: &RoomId, holder: &str) -> SchedulerResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _deleted: i32 = Script::new(RELEASE_SCRIPT)
            .key(self.key(room_id))
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        debug!(room_id = %room_id, "Released room lease");
        Ok(())
    }
}

/// In-process leases for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct LocalRoomLease {
    leases: Mutex<HashMap<RoomId, (String, Instant)>>,
}

impl LocalRoomLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomLease for LocalRoomLease {
    async fn acquire(&self, room_id: &RoomId, holder: &str, ttl: Duration) -> SchedulerResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let held_by_other = leases
            .get(room_id)
            .is_some_and(|(current, expires)| current != holder && *expires > now);
        if held_by_other {
            return Ok(false);
        }
        leases.insert(room_id.clone(), (holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, room_id: &RoomId, holder: &str) -> SchedulerResult<()> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases.get(room_id).is_some_and(|(current, _)| current == holder) {
            leases.remove(room_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_lease_excludes_other_holders() {
        let lease = LocalRoomLease::new();
        let room = RoomId::from("room-1");
        let ttl = Duration::from_secs(30);

        assert!(lease.acquire(&room, "a", ttl).await.unwrap());
        assert!(!lease.acquire(&room, "b", ttl).await.unwrap());
        assert!(lease.acquire(&room, "a", ttl).await.unwrap());

        lease.release(&room, "b").await.unwrap();
        assert!(!lease.acquire(&room, "b", ttl).await.unwrap());

        lease.release(&room, "a").await.unwrap();
        assert!(lease.acquire(&room, "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_lease_expires() {
        let lease = LocalRoomLease::new();
        let room = RoomId::from("room-1");
        assert!(lease.acquire(&room, "a", Duration::from_millis(1)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(lease.acquire(&room, "b", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_lease_roundtrip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        let lease = RedisRoomLease::new(&url, format!("test-{}", uuid::Uuid::new_v4())).unwrap();
        let room = RoomId::from("room-1");
        let ttl = Duration::from_secs(5);

        assert!(lease.acquire(&room, "a", ttl).await.unwrap());
        assert!(!lease.acquire(&room, "b", ttl).await.unwrap());
        lease.release(&room, "a").await.unwrap();
        assert!(lease.acquire(&room, "b", ttl).await.unwrap());
    }
}
