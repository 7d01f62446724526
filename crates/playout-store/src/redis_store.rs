//! Redis-backed store.
//!
//! Records are JSON documents under `{prefix}:{kind}:{id}` with secondary
//! index sets. Every conditional update runs as a Lua script that compares
//! the raw document it read against the one currently stored, so a write
//! only lands if nobody changed the record in between.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use playout_models::{
    BroadcastContentItem, BroadcastContentItemId, BroadcastInput, Conference, ConferenceId,
    ConferencePrepareJob, ContentItem, ContentItemId, Event, EventId, ExecutedTransition, InputType,
    JobStatus, PrepareJobId, RenderJobId, Room, RoomId, RoomMode, Transition, TransitionId, VideoRenderJob,
};

use crate::metrics::{record_cas_conflict, record_operation};
use crate::{ContentStore, JobStore, ScheduleStore, StoreError, StoreResult};

const BACKEND: &str = "redis";

/// Attempts for read-modify-write loops before reporting a conflict.
const CAS_ATTEMPTS: usize = 5;

/// Swap a document if unchanged, optionally moving its id between two
/// sorted-set indexes.
/// KEYS: doc, [from_index, to_index]. ARGV: expected, replacement, [member, score]
const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if KEYS[2] and KEYS[3] then
    redis.call('ZREM', KEYS[2], ARGV[3])
    redis.call('ZADD', KEYS[3], ARGV[4], ARGV[3])
end
return 1
"#;

/// Insert a prepare job unless the conference already has an active one.
/// Returns the holder's id on conflict, nil on success.
/// KEYS: active marker, job doc, conference job index, status index.
/// ARGV: job id, job json, created-at score
const CREATE_PREPARE_SCRIPT: &str = r#"
local holder = redis.call('GET', KEYS[1])
if holder then
    return holder
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('SADD', KEYS[3], ARGV[1])
redis.call('ZADD', KEYS[4], ARGV[3], ARGV[1])
return false
"#;

/// Swap a prepare job document, move it between status indexes and release
/// the active marker when the new status is terminal.
/// KEYS: job doc, active marker, from status index, to status index.
/// ARGV: expected, replacement, job id, terminal flag, created-at score
const UPDATE_PREPARE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('ZREM', KEYS[3], ARGV[3])
redis.call('ZADD', KEYS[4], ARGV[5], ARGV[3])
if ARGV[4] == '1' and redis.call('GET', KEYS[2]) == ARGV[3] then
    redis.call('DEL', KEYS[2])
end
return 1
"#;

/// Insert a render job with all of its indexes, or nothing if the id exists.
/// KEYS: job doc, prepare job's render set, status index, broadcast item index.
/// ARGV: job id, job json, created-at score
const INSERT_RENDER_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[2], 'NX') == false then
    return 0
end
redis.call('SADD', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
redis.call('ZADD', KEYS[4], ARGV[3], ARGV[1])
return 1
"#;

/// Release a marker only if we still hold it.
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Return the broadcast item for a content item, inserting `ARGV[2]` if
/// there is none. Single-node only: the existing doc key is built from ARGV[3].
/// KEYS: content index. ARGV: new id, new doc, doc key prefix
const ENSURE_BROADCAST_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
    return redis.call('GET', ARGV[3] .. existing)
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', ARGV[3] .. ARGV[1], ARGV[2])
return ARGV[2]
"#;

/// Write a transition unless it has been executed.
/// KEYS: executed marker, doc, new room index, old room index. ARGV: id, doc
const UPSERT_TRANSITION_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('SET', KEYS[2], ARGV[2])
redis.call('SREM', KEYS[4], ARGV[1])
redis.call('SADD', KEYS[3], ARGV[1])
return 1
"#;

/// KEYS: executed marker, doc, room index. ARGV: id
const DELETE_TRANSITION_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return -1
end
if redis.call('DEL', KEYS[2]) == 0 then
    return 0
end
redis.call('SREM', KEYS[3], ARGV[1])
return 1
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key written
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "playout".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }
}

#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            prefix: config.key_prefix,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    /// Round-trip a PING, for readiness checks.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn conn(&self) -> StoreResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn key(&self, kind: &str, id: impl std::fmt::Display) -> String {
        format!("{}:{}:{}", self.prefix, kind, id)
    }

    fn index(&self, kind: &str, id: impl std::fmt::Display, what: &str) -> String {
        format!("{}:{}:{}:{}", self.prefix, kind, id, what)
    }

    fn status_index(&self, status: JobStatus) -> String {
        format!("{}:render_status:{}", self.prefix, status.as_str())
    }

    fn prepare_status_index(&self, status: JobStatus) -> String {
        format!("{}:prepare_status:{}", self.prefix, status.as_str())
    }

    fn active_prepare_key(&self, conference_id: &ConferenceId) -> String {
        self.index("conference", conference_id, "active_prepare")
    }

    async fn get_raw(conn: &mut MultiplexedConnection, key: &str) -> StoreResult<Option<String>> {
        Ok(conn.get(key).await?)
    }

    async fn get_json<T: DeserializeOwned>(conn: &mut MultiplexedConnection, key: &str) -> StoreResult<Option<T>> {
        match Self::get_raw(conn, key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(conn: &mut MultiplexedConnection, key: &str, value: &T) -> StoreResult<()> {
        let payload = serde_json::to_string(value)?;
        conn.set::<_, _, ()>(key, payload).await?;
        Ok(())
    }

    /// Load every document in `keys`, skipping ones that vanished.
    async fn mget_json<T: DeserializeOwned>(conn: &mut MultiplexedConnection, keys: Vec<String>) -> StoreResult<Vec<T>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let raws: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;
        raws.into_iter()
            .flatten()
            .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .collect()
    }

    async fn members_as_docs<T: DeserializeOwned>(
        &self,
        conn: &mut MultiplexedConnection,
        index: &str,
        kind: &str,
    ) -> StoreResult<Vec<T>> {
        let ids: Vec<String> = conn.smembers(index).await?;
        let keys = ids.iter().map(|id| self.key(kind, id)).collect();
        Self::mget_json(conn, keys).await
    }

    async fn cas(conn: &mut MultiplexedConnection, key: &str, expected: &str, replacement: &str) -> StoreResult<bool> {
        let swapped: i32 = Script::new(CAS_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(replacement)
            .invoke_async(conn)
            .await?;
        Ok(swapped == 1)
    }

    /// Swap a render job document and move it between status indexes.
    async fn cas_render_job(
        &self,
        conn: &mut MultiplexedConnection,
        expected_raw: &str,
        before: JobStatus,
        job: &VideoRenderJob,
    ) -> StoreResult<bool> {
        let replacement = serde_json::to_string(job)?;
        let swapped: i32 = Script::new(CAS_SCRIPT)
            .key(self.key("render", &job.id))
            .key(self.status_index(before))
            .key(self.status_index(job.status))
            .arg(expected_raw)
            .arg(replacement)
            .arg(job.id.as_str())
            .arg(job.created_at.timestamp_millis())
            .invoke_async(conn)
            .await?;
        Ok(swapped == 1)
    }

    /// Read, mutate and compare-and-set a render job until it sticks.
    /// `mutate` returns `Ok(None)` to abandon without writing.
    async fn update_render_job<F>(&self, id: &RenderJobId, operation: &'static str, mut mutate: F) -> StoreResult<Option<VideoRenderJob>>
    where
        F: FnMut(&mut VideoRenderJob) -> StoreResult<Option<()>> + Send,
    {
        let mut conn = self.conn().await?;
        let key = self.key("render", id);
        for _ in 0..CAS_ATTEMPTS {
            let raw = Self::get_raw(&mut conn, &key)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("render job {id}")))?;
            let mut job: VideoRenderJob = serde_json::from_str(&raw)?;
            let before = job.status;
            if mutate(&mut job)?.is_none() {
                return Ok(None);
            }
            if self.cas_render_job(&mut conn, &raw, before, &job).await? {
                return Ok(Some(job));
            }
            record_cas_conflict(BACKEND, operation);
            debug!(render_job_id = %id, operation, "Render job changed underneath us, retrying");
        }
        Err(StoreError::conflict(format!("render job {id} kept changing during {operation}")))
    }

    async fn ensure_broadcast_doc(
        &self,
        conn: &mut MultiplexedConnection,
        candidate: &BroadcastContentItem,
    ) -> StoreResult<(BroadcastContentItem, String)> {
        let doc = serde_json::to_string(candidate)?;
        let stored: Option<String> = Script::new(ENSURE_BROADCAST_SCRIPT)
            .key(self.key("bci_by_content", &candidate.content_item_id))
            .arg(candidate.id.as_str())
            .arg(&doc)
            .arg(format!("{}:bci:", self.prefix))
            .invoke_async(conn)
            .await?;
        let raw = stored.ok_or_else(|| {
            StoreError::not_found(format!(
                "broadcast item indexed for content item {} is missing",
                candidate.content_item_id
            ))
        })?;
        Ok((serde_json::from_str(&raw)?, raw))
    }
}

/// Run `fut`, recording its outcome and latency.
async fn timed<T>(operation: &'static str, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
    let started = Instant::now();
    let result = fut.await;
    record_operation(BACKEND, operation, result.is_ok(), started);
    result
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl ContentStore for RedisStore {
    async fn put_conference(&self, conference: Conference) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        Self::put_json(&mut conn, &self.key("conference", &conference.id), &conference).await
    }

    async fn get_conference(&self, id: &ConferenceId) -> StoreResult<Conference> {
        let mut conn = self.conn().await?;
        Self::get_json(&mut conn, &self.key("conference", id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("conference {id}")))
    }

    async fn put_content_item(&self, item: ContentItem) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        Self::put_json(&mut conn, &self.key("content", &item.id), &item).await?;
        conn.sadd::<_, _, ()>(self.index("conference", &item.conference_id, "content"), item.id.as_str())
            .await?;
        Ok(())
    }

    async fn list_content_items(&self, conference_id: &ConferenceId) -> StoreResult<Vec<ContentItem>> {
        let mut conn = self.conn().await?;
        let mut items: Vec<ContentItem> = self
            .members_as_docs(&mut conn, &self.index("conference", conference_id, "content"), "content")
            .await?;
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn get_broadcast_item(&self, id: &BroadcastContentItemId) -> StoreResult<Option<BroadcastContentItem>> {
        let mut conn = self.conn().await?;
        Self::get_json(&mut conn, &self.key("bci", id)).await
    }

    async fn find_broadcast_item(&self, content_item_id: &ContentItemId) -> StoreResult<Option<BroadcastContentItem>> {
        let mut conn = self.conn().await?;
        let id: Option<String> = conn.get(self.key("bci_by_content", content_item_id)).await?;
        match id {
            Some(id) => Self::get_json(&mut conn, &self.key("bci", id)).await,
            None => Ok(None),
        }
    }

    async fn ensure_broadcast_item(
        &self,
        conference_id: &ConferenceId,
        content_item_id: &ContentItemId,
        input_type: InputType,
    ) -> StoreResult<BroadcastContentItem> {
        let mut conn = self.conn().await?;
        let candidate = BroadcastContentItem::pending(conference_id.clone(), content_item_id.clone(), input_type);
        let (item, _) = self.ensure_broadcast_doc(&mut conn, &candidate).await?;
        Ok(item)
    }

    async fn upsert_broadcast_input(
        &self,
        conference_id: &ConferenceId,
        content_item_id: &ContentItemId,
        input: BroadcastInput,
    ) -> StoreResult<BroadcastContentItem> {
        timed("upsert_broadcast_input", async {
            let mut conn = self.conn().await?;
            let mut candidate =
                BroadcastContentItem::pending(conference_id.clone(), content_item_id.clone(), input.input_type());
            candidate.input = Some(input.clone());

            for _ in 0..CAS_ATTEMPTS {
                let (mut item, raw) = self.ensure_broadcast_doc(&mut conn, &candidate).await?;
                if item.input.as_ref() == Some(&input) && item.input_type_name == input.input_type() {
                    return Ok(item);
                }
                item.input_type_name = input.input_type();
                item.input = Some(input.clone());
                item.updated_at = Utc::now();
                let replacement = serde_json::to_string(&item)?;
                if Self::cas(&mut conn, &self.key("bci", &item.id), &raw, &replacement).await? {
                    return Ok(item);
                }
                record_cas_conflict(BACKEND, "upsert_broadcast_input");
            }
            Err(StoreError::conflict(format!(
                "broadcast item for content item {content_item_id} kept changing"
            )))
        })
        .await
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn create_prepare_job(&self, job: ConferencePrepareJob) -> StoreResult<ConferencePrepareJob> {
        timed("create_prepare_job", async {
            let mut conn = self.conn().await?;
            let marker = self.active_prepare_key(&job.conference_id);
            let doc = serde_json::to_string(&job)?;

            // Two rounds: the second runs only after clearing a marker left
            // behind by a job that is already terminal.
            for _ in 0..2 {
                let holder: Option<String> = Script::new(CREATE_PREPARE_SCRIPT)
                    .key(&marker)
                    .key(self.key("prepare", &job.id))
                    .key(self.index("conference", &job.conference_id, "prepare"))
                    .key(self.prepare_status_index(job.status))
                    .arg(job.id.as_str())
                    .arg(&doc)
                    .arg(millis(job.created_at))
                    .invoke_async(&mut conn)
                    .await?;

                let Some(holder) = holder else {
                    return Ok(job);
                };

                let existing: Option<ConferencePrepareJob> =
                    Self::get_json(&mut conn, &self.key("prepare", &holder)).await?;
                match existing {
                    Some(active) if !active.status.is_terminal() => {
                        return Err(StoreError::conflict(format!(
                            "conference {} already has prepare job {} in status {}",
                            job.conference_id, active.id, active.status
                        )));
                    }
                    _ => {
                        warn!(
                            conference_id = %job.conference_id,
                            holder = holder.as_str(),
                            "Clearing stale active prepare job marker"
                        );
                        let _: i32 = Script::new(COMPARE_AND_DELETE_SCRIPT)
                            .key(&marker)
                            .arg(&holder)
                            .invoke_async(&mut conn)
                            .await?;
                    }
                }
            }
            Err(StoreError::conflict(format!(
                "conference {} prepare job marker is contended",
                job.conference_id
            )))
        })
        .await
    }

    async fn get_prepare_job(&self, id: &PrepareJobId) -> StoreResult<ConferencePrepareJob> {
        let mut conn = self.conn().await?;
        Self::get_json(&mut conn, &self.key("prepare", id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("prepare job {id}")))
    }

    async fn list_prepare_jobs(&self, conference_id: &ConferenceId) -> StoreResult<Vec<ConferencePrepareJob>> {
        let mut conn = self.conn().await?;
        let mut jobs: Vec<ConferencePrepareJob> = self
            .members_as_docs(&mut conn, &self.index("conference", conference_id, "prepare"), "prepare")
            .await?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn list_prepare_jobs_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> StoreResult<Vec<ConferencePrepareJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrange(self.prepare_status_index(status), 0, limit as isize - 1)
            .await?;
        let keys = ids.iter().map(|id| self.key("prepare", id)).collect();
        let jobs: Vec<ConferencePrepareJob> = Self::mget_json(&mut conn, keys).await?;
        Ok(jobs.into_iter().filter(|job| job.status == status).collect())
    }

    async fn update_prepare_job_status(
        &self,
        id: &PrepareJobId,
        expected: JobStatus,
        next: JobStatus,
        message: Option<String>,
    ) -> StoreResult<ConferencePrepareJob> {
        timed("update_prepare_job_status", async {
            let mut conn = self.conn().await?;
            let key = self.key("prepare", id);
            for _ in 0..CAS_ATTEMPTS {
                let raw = Self::get_raw(&mut conn, &key)
                    .await?
                    .ok_or_else(|| StoreError::not_found(format!("prepare job {id}")))?;
                let mut job: ConferencePrepareJob = serde_json::from_str(&raw)?;
                if job.status != expected {
                    record_cas_conflict(BACKEND, "update_prepare_job_status");
                    return Err(StoreError::StatusConflict {
                        id: id.to_string(),
                        expected,
                        actual: job.status,
                    });
                }
                job.apply_status(next, message.clone())?;

                let swapped: i32 = Script::new(UPDATE_PREPARE_SCRIPT)
                    .key(&key)
                    .key(self.active_prepare_key(&job.conference_id))
                    .key(self.prepare_status_index(expected))
                    .key(self.prepare_status_index(next))
                    .arg(&raw)
                    .arg(serde_json::to_string(&job)?)
                    .arg(id.as_str())
                    .arg(if next.is_terminal() { "1" } else { "0" })
                    .arg(millis(job.created_at))
                    .invoke_async(&mut conn)
                    .await?;
                if swapped == 1 {
                    return Ok(job);
                }
            }
            Err(StoreError::conflict(format!("prepare job {id} kept changing")))
        })
        .await
    }

    async fn insert_render_job(&self, job: VideoRenderJob) -> StoreResult<()> {
        timed("insert_render_job", async {
            let mut conn = self.conn().await?;
            let inserted: i32 = Script::new(INSERT_RENDER_SCRIPT)
                .key(self.key("render", &job.id))
                .key(self.index("prepare", &job.prepare_job_id, "render"))
                .key(self.status_index(job.status))
                .key(self.index("bci", &job.broadcast_content_item_id, "render"))
                .arg(job.id.as_str())
                .arg(serde_json::to_string(&job)?)
                .arg(millis(job.created_at))
                .invoke_async(&mut conn)
                .await?;
            if inserted == 0 {
                return Err(StoreError::conflict(format!("render job {} already exists", job.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_render_job(&self, id: &RenderJobId) -> StoreResult<VideoRenderJob> {
        let mut conn = self.conn().await?;
        Self::get_json(&mut conn, &self.key("render", id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("render job {id}")))
    }

    async fn list_render_jobs(&self, prepare_job_id: &PrepareJobId) -> StoreResult<Vec<VideoRenderJob>> {
        let mut conn = self.conn().await?;
        let mut jobs: Vec<VideoRenderJob> = self
            .members_as_docs(&mut conn, &self.index("prepare", prepare_job_id, "render"), "render")
            .await?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn list_render_jobs_by_status(&self, status: JobStatus, limit: usize) -> StoreResult<Vec<VideoRenderJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrange(self.status_index(status), 0, limit as isize - 1)
            .await?;
        let keys = ids.iter().map(|id| self.key("render", id)).collect();
        let jobs: Vec<VideoRenderJob> = Self::mget_json(&mut conn, keys).await?;
        // The index may briefly lag a status swap.
        Ok(jobs.into_iter().filter(|job| job.status == status).collect())
    }

    async fn latest_render_job_for_item(
        &self,
        item_id: &BroadcastContentItemId,
    ) -> StoreResult<Option<VideoRenderJob>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.zrevrange(self.index("bci", item_id, "render"), 0, 0).await?;
        match ids.first() {
            Some(id) => Self::get_json(&mut conn, &self.key("render", id)).await,
            None => Ok(None),
        }
    }

    async fn claim_render_job(&self, id: &RenderJobId, start_data: Value) -> StoreResult<Option<VideoRenderJob>> {
        timed(
            "claim_render_job",
            self.update_render_job(id, "claim_render_job", |job| {
                if job.status != JobStatus::New {
                    return Ok(None);
                }
                job.apply_status(JobStatus::InProgress, None)?;
                job.merge_data(start_data.clone());
                Ok(Some(()))
            }),
        )
        .await
    }

    async fn finish_render_job(
        &self,
        id: &RenderJobId,
        outcome: JobStatus,
        data: Value,
        message: Option<String>,
    ) -> StoreResult<VideoRenderJob> {
        let finished = timed(
            "finish_render_job",
            self.update_render_job(id, "finish_render_job", |job| {
                if job.status != JobStatus::InProgress {
                    return Err(StoreError::StatusConflict {
                        id: job.id.to_string(),
                        expected: JobStatus::InProgress,
                        actual: job.status,
                    });
                }
                job.apply_status(outcome, message.clone())?;
                job.merge_data(data.clone());
                Ok(Some(()))
            }),
        )
        .await?;
        finished.ok_or_else(|| StoreError::conflict(format!("render job {id} was not finished")))
    }
}

#[async_trait]
impl ScheduleStore for RedisStore {
    async fn put_room(&self, room: Room) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        Self::put_json(&mut conn, &self.key("room", &room.id), &room).await?;
        conn.sadd::<_, _, ()>(format!("{}:rooms", self.prefix), room.id.as_str())
            .await?;
        Ok(())
    }

    async fn get_room(&self, id: &RoomId) -> StoreResult<Room> {
        let mut conn = self.conn().await?;
        Self::get_json(&mut conn, &self.key("room", id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("room {id}")))
    }

    async fn list_rooms(&self) -> StoreResult<Vec<Room>> {
        let mut conn = self.conn().await?;
        let mut rooms: Vec<Room> = self
            .members_as_docs(&mut conn, &format!("{}:rooms", self.prefix), "room")
            .await?;
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rooms)
    }

    async fn set_room_mode(&self, id: &RoomId, mode: RoomMode) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let key = self.key("room", id);
        for _ in 0..CAS_ATTEMPTS {
            let raw = Self::get_raw(&mut conn, &key)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("room {id}")))?;
            let mut room: Room = serde_json::from_str(&raw)?;
            if room.current_mode == mode {
                return Ok(());
            }
            room.current_mode = mode;
            if Self::cas(&mut conn, &key, &raw, &serde_json::to_string(&room)?).await? {
                return Ok(());
            }
            record_cas_conflict(BACKEND, "set_room_mode");
        }
        Err(StoreError::conflict(format!("room {id} kept changing")))
    }

    async fn put_event(&self, event: Event) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let key = self.key("event", &event.id);
        if let Some(previous) = Self::get_json::<Event>(&mut conn, &key).await? {
            if previous.room_id != event.room_id {
                conn.srem::<_, _, ()>(self.index("room", &previous.room_id, "events"), event.id.as_str())
                    .await?;
            }
        }
        Self::put_json(&mut conn, &key, &event).await?;
        conn.sadd::<_, _, ()>(self.index("room", &event.room_id, "events"), event.id.as_str())
            .await?;
        Ok(())
    }

    async fn get_event(&self, id: &EventId) -> StoreResult<Event> {
        let mut conn = self.conn().await?;
        Self::get_json(&mut conn, &self.key("event", id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("event {id}")))
    }

    async fn list_events_for_room(&self, room_id: &RoomId) -> StoreResult<Vec<Event>> {
        let mut conn = self.conn().await?;
        let mut events: Vec<Event> = self
            .members_as_docs(&mut conn, &self.index("room", room_id, "events"), "event")
            .await?;
        events.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn upsert_transition(&self, transition: Transition) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let key = self.key("transition", &transition.id);
        let previous_room = Self::get_json::<Transition>(&mut conn, &key)
            .await?
            .map(|t| t.room_id)
            .unwrap_or_else(|| transition.room_id.clone());

        let written: i32 = Script::new(UPSERT_TRANSITION_SCRIPT)
            .key(self.key("executed", &transition.id))
            .key(&key)
            .key(self.index("room", &transition.room_id, "transitions"))
            .key(self.index("room", &previous_room, "transitions"))
            .arg(transition.id.as_str())
            .arg(serde_json::to_string(&transition)?)
            .invoke_async(&mut conn)
            .await?;
        if written == 0 {
            return Err(StoreError::conflict(format!(
                "transition {} has already been executed",
                transition.id
            )));
        }
        Ok(())
    }

    async fn delete_transition(&self, id: &TransitionId) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let key = self.key("transition", id);
        let Some(existing) = Self::get_json::<Transition>(&mut conn, &key).await? else {
            return Ok(false);
        };

        let outcome: i32 = Script::new(DELETE_TRANSITION_SCRIPT)
            .key(self.key("executed", id))
            .key(&key)
            .key(self.index("room", &existing.room_id, "transitions"))
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;
        match outcome {
            -1 => Err(StoreError::conflict(format!("transition {id} has already been executed"))),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    async fn get_transition(&self, id: &TransitionId) -> StoreResult<Option<Transition>> {
        let mut conn = self.conn().await?;
        Self::get_json(&mut conn, &self.key("transition", id)).await
    }

    async fn list_transitions_for_room(&self, room_id: &RoomId) -> StoreResult<Vec<Transition>> {
        let mut conn = self.conn().await?;
        let mut transitions: Vec<Transition> = self
            .members_as_docs(&mut conn, &self.index("room", room_id, "transitions"), "transition")
            .await?;
        transitions.sort_by(|a, b| a.schedule_key().cmp(&b.schedule_key()));
        Ok(transitions)
    }

    async fn record_executed_transition(&self, executed: ExecutedTransition) -> StoreResult<bool> {
        timed("record_executed_transition", async {
            let mut conn = self.conn().await?;
            let inserted: Option<String> = redis::cmd("SET")
                .arg(self.key("executed", &executed.transition_id))
                .arg(serde_json::to_string(&executed)?)
                .arg("NX")
                .query_async(&mut conn)
                .await?;
            if inserted.is_none() {
                return Ok(false);
            }
            conn.zadd::<_, _, _, ()>(
                self.index("room", &executed.room_id, "executed"),
                executed.transition_id.as_str(),
                millis(executed.time),
            )
            .await?;
            Ok(true)
        })
        .await
    }

    async fn is_transition_executed(&self, id: &TransitionId) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(self.key("executed", id)).await?)
    }

    async fn list_executed_transitions(&self, room_id: &RoomId) -> StoreResult<Vec<ExecutedTransition>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.zrange(self.index("room", room_id, "executed"), 0, -1).await?;
        let keys = ids.iter().map(|id| self.key("executed", id)).collect();
        let mut executed: Vec<ExecutedTransition> = Self::mget_json(&mut conn, keys).await?;
        executed.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.executed_at.cmp(&b.executed_at)));
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_models::{RenderParams, RenderSource};
    use serde_json::json;

    fn test_store() -> RedisStore {
        let mut config = StoreConfig::from_env();
        config.key_prefix = format!("playout-test-{}", uuid_suffix());
        RedisStore::new(config).unwrap()
    }

    fn uuid_suffix() -> String {
        ConferenceId::new().to_string()
    }

    #[test]
    fn test_key_layout() {
        let store = RedisStore::new(StoreConfig::default()).unwrap();
        assert_eq!(store.key("render", "abc"), "playout:render:abc");
        assert_eq!(store.index("conference", "c1", "prepare"), "playout:conference:c1:prepare");
        assert_eq!(store.status_index(JobStatus::InProgress), "playout:render_status:IN_PROGRESS");
        assert_eq!(store.prepare_status_index(JobStatus::New), "playout:prepare_status:NEW");
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_prepare_job_conflict_and_release() {
        let store = test_store();
        let conference: ConferenceId = "conf".into();
        let first = store
            .create_prepare_job(ConferencePrepareJob::new(conference.clone()))
            .await
            .unwrap();
        assert!(store
            .create_prepare_job(ConferencePrepareJob::new(conference.clone()))
            .await
            .unwrap_err()
            .is_conflict());

        store
            .update_prepare_job_status(&first.id, JobStatus::New, JobStatus::InProgress, None)
            .await
            .unwrap();
        store
            .update_prepare_job_status(&first.id, JobStatus::InProgress, JobStatus::Completed, None)
            .await
            .unwrap();

        store
            .create_prepare_job(ConferencePrepareJob::new(conference.clone()))
            .await
            .unwrap();
        assert_eq!(store.list_prepare_jobs(&conference).await.unwrap().len(), 2);
        assert_eq!(
            store
                .list_prepare_jobs_by_status(JobStatus::Completed, 10)
                .await
                .unwrap()
                .into_iter()
                .map(|job| job.id)
                .collect::<Vec<_>>(),
            vec![first.id]
        );
        assert_eq!(store.list_prepare_jobs_by_status(JobStatus::New, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_render_insert_writes_every_index_once() {
        let store = test_store();
        let prepare = ConferencePrepareJob::new("conf".into());
        let params = RenderParams {
            content_item_id: "item".into(),
            source: RenderSource::Transcode {
                source_url: "s3://in/b.mov".into(),
            },
        };
        let job = VideoRenderJob::new(&prepare, "bci".into(), &params);
        store.insert_render_job(job.clone()).await.unwrap();
        assert!(store.insert_render_job(job.clone()).await.unwrap_err().is_conflict());

        let listed: Vec<_> = store
            .list_render_jobs(&prepare.id)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(listed, vec![job.id.clone()]);
        assert_eq!(store.list_render_jobs_by_status(JobStatus::New, 10).await.unwrap().len(), 1);
        assert_eq!(
            store.latest_render_job_for_item(&"bci".into()).await.unwrap().map(|j| j.id),
            Some(job.id)
        );
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_claim_is_single_winner() {
        let store = test_store();
        let prepare = ConferencePrepareJob::new("conf".into());
        let params = RenderParams {
            content_item_id: "item".into(),
            source: RenderSource::Transcode {
                source_url: "s3://in/a.mov".into(),
            },
        };
        let job = VideoRenderJob::new(&prepare, "bci".into(), &params);
        let id = job.id.clone();
        store.insert_render_job(job).await.unwrap();

        let first = store.claim_render_job(&id, json!({ "worker": "a" })).await.unwrap();
        let second = store.claim_render_job(&id, json!({ "worker": "b" })).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let stored = store.get_render_job(&id).await.unwrap();
        assert_eq!(stored.data["worker"], "a");
        assert!(store
            .list_render_jobs_by_status(JobStatus::New, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .list_render_jobs_by_status(JobStatus::InProgress, 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_upsert_broadcast_input_is_idempotent() {
        let store = test_store();
        let input = BroadcastInput::Mp4 {
            s3_url: "https://cdn.example.com/x.mp4".into(),
        };
        let first = store
            .upsert_broadcast_input(&"conf".into(), &"item".into(), input.clone())
            .await
            .unwrap();
        let second = store
            .upsert_broadcast_input(&"conf".into(), &"item".into(), input)
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
