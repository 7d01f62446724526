//! In-memory store.
//!
//! A single lock guards every table so each operation, including the
//! compare-and-set ones, is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use playout_models::{
    BroadcastContentItem, BroadcastContentItemId, BroadcastInput, Conference, ConferenceId,
    ConferencePrepareJob, ContentItem, ContentItemId, Event, EventId, ExecutedTransition, InputType,
    JobStatus, PrepareJobId, RenderJobId, Room, RoomId, RoomMode, Transition, TransitionId, VideoRenderJob,
};

use crate::metrics::record_cas_conflict;
use crate::{ContentStore, JobStore, ScheduleStore, StoreError, StoreResult};

const BACKEND: &str = "memory";

#[derive(Default)]
struct Tables {
    conferences: HashMap<ConferenceId, Conference>,
    content_items: HashMap<ContentItemId, ContentItem>,
    broadcast_items: HashMap<BroadcastContentItemId, BroadcastContentItem>,
    broadcast_by_content: HashMap<ContentItemId, BroadcastContentItemId>,
    prepare_jobs: HashMap<PrepareJobId, ConferencePrepareJob>,
    render_jobs: HashMap<RenderJobId, VideoRenderJob>,
    rooms: HashMap<RoomId, Room>,
    events: HashMap<EventId, Event>,
    transitions: HashMap<TransitionId, Transition>,
    executed: HashMap<TransitionId, ExecutedTransition>,
}

/// Process-local store. Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put_conference(&self, conference: Conference) -> StoreResult<()> {
        self.tables.write().await.conferences.insert(conference.id.clone(), conference);
        Ok(())
    }

    async fn get_conference(&self, id: &ConferenceId) -> StoreResult<Conference> {
        self.tables
            .read()
            .await
            .conferences
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("conference {id}")))
    }

    async fn put_content_item(&self, item: ContentItem) -> StoreResult<()> {
        self.tables.write().await.content_items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn list_content_items(&self, conference_id: &ConferenceId) -> StoreResult<Vec<ContentItem>> {
        let tables = self.tables.read().await;
        let mut items: Vec<_> = tables
            .content_items
            .values()
            .filter(|item| &item.conference_id == conference_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn get_broadcast_item(&self, id: &BroadcastContentItemId) -> StoreResult<Option<BroadcastContentItem>> {
        Ok(self.tables.read().await.broadcast_items.get(id).cloned())
    }

    async fn find_broadcast_item(&self, content_item_id: &ContentItemId) -> StoreResult<Option<BroadcastContentItem>> {
        let tables = self.tables.read().await;
        Ok(tables
            .broadcast_by_content
            .get(content_item_id)
            .and_then(|id| tables.broadcast_items.get(id))
            .cloned())
    }

    async fn ensure_broadcast_item(
        &self,
        conference_id: &ConferenceId,
        content_item_id: &ContentItemId,
        input_type: InputType,
    ) -> StoreResult<BroadcastContentItem> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .broadcast_by_content
            .get(content_item_id)
            .and_then(|id| tables.broadcast_items.get(id))
        {
            return Ok(existing.clone());
        }

        let item = BroadcastContentItem::pending(conference_id.clone(), content_item_id.clone(), input_type);
        tables.broadcast_by_content.insert(content_item_id.clone(), item.id.clone());
        tables.broadcast_items.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn upsert_broadcast_input(
        &self,
        conference_id: &ConferenceId,
        content_item_id: &ContentItemId,
        input: BroadcastInput,
    ) -> StoreResult<BroadcastContentItem> {
        let mut tables = self.tables.write().await;
        if let Some(id) = tables.broadcast_by_content.get(content_item_id).cloned() {
            if let Some(item) = tables.broadcast_items.get_mut(&id) {
                if item.input.as_ref() != Some(&input) || item.input_type_name != input.input_type() {
                    item.input_type_name = input.input_type();
                    item.input = Some(input);
                    item.updated_at = Utc::now();
                }
                return Ok(item.clone());
            }
        }

        let mut item = BroadcastContentItem::pending(conference_id.clone(), content_item_id.clone(), input.input_type());
        item.input = Some(input);
        tables.broadcast_by_content.insert(content_item_id.clone(), item.id.clone());
        tables.broadcast_items.insert(item.id.clone(), item.clone());
        Ok(item)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_prepare_job(&self, job: ConferencePrepareJob) -> StoreResult<ConferencePrepareJob> {
        let mut tables = self.tables.write().await;
        if let Some(active) = tables
            .prepare_jobs
            .values()
            .find(|existing| existing.conference_id == job.conference_id && !existing.status.is_terminal())
        {
            return Err(StoreError::conflict(format!(
                "conference {} already has prepare job {} in status {}",
                job.conference_id, active.id, active.status
            )));
        }
        tables.prepare_jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_prepare_job(&self, id: &PrepareJobId) -> StoreResult<ConferencePrepareJob> {
        self.tables
            .read()
            .await
            .prepare_jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("prepare job {id}")))
    }

    async fn list_prepare_jobs(&self, conference_id: &ConferenceId) -> StoreResult<Vec<ConferencePrepareJob>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<_> = tables
            .prepare_jobs
            .values()
            .filter(|job| &job.conference_id == conference_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn list_prepare_jobs_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> StoreResult<Vec<ConferencePrepareJob>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<_> = tables
            .prepare_jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn update_prepare_job_status(
        &self,
        id: &PrepareJobId,
        expected: JobStatus,
        next: JobStatus,
        message: Option<String>,
    ) -> StoreResult<ConferencePrepareJob> {
        let mut tables = self.tables.write().await;
        let job = tables
            .prepare_jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("prepare job {id}")))?;
        if job.status != expected {
            record_cas_conflict(BACKEND, "update_prepare_job_status");
            return Err(StoreError::StatusConflict {
                id: id.to_string(),
                expected,
                actual: job.status,
            });
        }
        job.apply_status(next, message)?;
        Ok(job.clone())
    }

    async fn insert_render_job(&self, job: VideoRenderJob) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.render_jobs.contains_key(&job.id) {
            return Err(StoreError::conflict(format!("render job {} already exists", job.id)));
        }
        tables.render_jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_render_job(&self, id: &RenderJobId) -> StoreResult<VideoRenderJob> {
        self.tables
            .read()
            .await
            .render_jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("render job {id}")))
    }

    async fn list_render_jobs(&self, prepare_job_id: &PrepareJobId) -> StoreResult<Vec<VideoRenderJob>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<_> = tables
            .render_jobs
            .values()
            .filter(|job| &job.prepare_job_id == prepare_job_id)
            .cloned()
            .collect();
        sort_oldest_first(&mut jobs);
        Ok(jobs)
    }

    async fn list_render_jobs_by_status(&self, status: JobStatus, limit: usize) -> StoreResult<Vec<VideoRenderJob>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<_> = tables
            .render_jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        sort_oldest_first(&mut jobs);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn latest_render_job_for_item(
        &self,
        item_id: &BroadcastContentItemId,
    ) -> StoreResult<Option<VideoRenderJob>> {
        let tables = self.tables.read().await;
        Ok(tables
            .render_jobs
            .values()
            .filter(|job| &job.broadcast_content_item_id == item_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| b.id.cmp(&a.id)))
            .cloned())
    }

    async fn claim_render_job(&self, id: &RenderJobId, start_data: Value) -> StoreResult<Option<VideoRenderJob>> {
        let mut tables = self.tables.write().await;
        let job = tables
            .render_jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("render job {id}")))?;
        if job.status != JobStatus::New {
            record_cas_conflict(BACKEND, "claim_render_job");
            return Ok(None);
        }
        job.apply_status(JobStatus::InProgress, None)?;
        job.merge_data(start_data);
        Ok(Some(job.clone()))
    }

    async fn finish_render_job(
        &self,
        id: &RenderJobId,
        outcome: JobStatus,
        data: Value,
        message: Option<String>,
    ) -> StoreResult<VideoRenderJob> {
        let mut tables = self.tables.write().await;
        let job = tables
            .render_jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("render job {id}")))?;
        if job.status != JobStatus::InProgress {
            record_cas_conflict(BACKEND, "finish_render_job");
            return Err(StoreError::StatusConflict {
                id: id.to_string(),
                expected: JobStatus::InProgress,
                actual: job.status,
            });
        }
        job.apply_status(outcome, message)?;
        job.merge_data(data);
        Ok(job.clone())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn put_room(&self, room: Room) -> StoreResult<()> {
        self.tables.write().await.rooms.insert(room.id.clone(), room);
        Ok(())
    }

    async fn get_room(&self, id: &RoomId) -> StoreResult<Room> {
        self.tables
            .read()
            .await
            .rooms
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("room {id}")))
    }

    async fn list_rooms(&self) -> StoreResult<Vec<Room>> {
        let mut rooms: Vec<_> = self.tables.read().await.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rooms)
    }

    async fn set_room_mode(&self, id: &RoomId, mode: RoomMode) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let room = tables
            .rooms
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("room {id}")))?;
        room.current_mode = mode;
        Ok(())
    }

    async fn put_event(&self, event: Event) -> StoreResult<()> {
        self.tables.write().await.events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn get_event(&self, id: &EventId) -> StoreResult<Event> {
        self.tables
            .read()
            .await
            .events
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("event {id}")))
    }

    async fn list_events_for_room(&self, room_id: &RoomId) -> StoreResult<Vec<Event>> {
        let tables = self.tables.read().await;
        let mut events: Vec<_> = tables
            .events
            .values()
            .filter(|event| &event.room_id == room_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn upsert_transition(&self, transition: Transition) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.executed.contains_key(&transition.id) {
            return Err(StoreError::conflict(format!(
                "transition {} has already been executed",
                transition.id
            )));
        }
        tables.transitions.insert(transition.id.clone(), transition);
        Ok(())
    }

    async fn delete_transition(&self, id: &TransitionId) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.executed.contains_key(id) {
            return Err(StoreError::conflict(format!("transition {id} has already been executed")));
        }
        Ok(tables.transitions.remove(id).is_some())
    }

    async fn get_transition(&self, id: &TransitionId) -> StoreResult<Option<Transition>> {
        Ok(self.tables.read().await.transitions.get(id).cloned())
    }

    async fn list_transitions_for_room(&self, room_id: &RoomId) -> StoreResult<Vec<Transition>> {
        let tables = self.tables.read().await;
        let mut transitions: Vec<_> = tables
            .transitions
            .values()
            .filter(|t| &t.room_id == room_id)
            .cloned()
            .collect();
        transitions.sort_by(|a, b| a.schedule_key().cmp(&b.schedule_key()));
        Ok(transitions)
    }

    async fn record_executed_transition(&self, executed: ExecutedTransition) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.executed.contains_key(&executed.transition_id) {
            return Ok(false);
        }
        tables.executed.insert(executed.transition_id.clone(), executed);
        Ok(true)
    }

    async fn is_transition_executed(&self, id: &TransitionId) -> StoreResult<bool> {
        Ok(self.tables.read().await.executed.contains_key(id))
    }

    async fn list_executed_transitions(&self, room_id: &RoomId) -> StoreResult<Vec<ExecutedTransition>> {
        let tables = self.tables.read().await;
        let mut executed: Vec<_> = tables
            .executed
            .values()
            .filter(|e| &e.room_id == room_id)
            .cloned()
            .collect();
        executed.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.executed_at.cmp(&b.executed_at)));
        Ok(executed)
    }
}

fn sort_oldest_first(jobs: &mut [VideoRenderJob]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_models::{RenderParams, RenderSource};
    use serde_json::json;

    fn mp4(url: &str) -> BroadcastInput {
        BroadcastInput::Mp4 { s3_url: url.into() }
    }

    fn render_job(prepare: &ConferencePrepareJob) -> VideoRenderJob {
        let params = RenderParams {
            content_item_id: "item".into(),
            source: RenderSource::Transcode {
                source_url: "s3://in/a.mov".into(),
            },
        };
        VideoRenderJob::new(prepare, "bci".into(), &params)
    }

    #[tokio::test]
    async fn test_second_active_prepare_job_conflicts() {
        let store = MemoryStore::new();
        let first = store
            .create_prepare_job(ConferencePrepareJob::new("conf".into()))
            .await
            .unwrap();

        let err = store
            .create_prepare_job(ConferencePrepareJob::new("conf".into()))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Another conference is unaffected
        store
            .create_prepare_job(ConferencePrepareJob::new("other".into()))
            .await
            .unwrap();

        store
            .update_prepare_job_status(&first.id, JobStatus::New, JobStatus::InProgress, None)
            .await
            .unwrap();
        store
            .update_prepare_job_status(&first.id, JobStatus::InProgress, JobStatus::Failed, Some("x".into()))
            .await
            .unwrap();

        // Terminal jobs no longer block
        store
            .create_prepare_job(ConferencePrepareJob::new("conf".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_prepare_status_is_compare_and_set() {
        let store = MemoryStore::new();
        let job = store
            .create_prepare_job(ConferencePrepareJob::new("conf".into()))
            .await
            .unwrap();

        let err = store
            .update_prepare_job_status(&job.id, JobStatus::InProgress, JobStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusConflict { actual: JobStatus::New, .. }));

        let err = store
            .update_prepare_job_status(&job.id, JobStatus::New, JobStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Model(_)));
    }

    #[tokio::test]
    async fn test_prepare_jobs_by_status_tracks_moves() {
        let store = MemoryStore::new();
        let a = store
            .create_prepare_job(ConferencePrepareJob::new("a".into()))
            .await
            .unwrap();
        let b = store
            .create_prepare_job(ConferencePrepareJob::new("b".into()))
            .await
            .unwrap();
        store
            .update_prepare_job_status(&a.id, JobStatus::New, JobStatus::InProgress, None)
            .await
            .unwrap();

        let new: Vec<_> = store
            .list_prepare_jobs_by_status(JobStatus::New, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(new, vec![b.id]);
        assert_eq!(store.list_prepare_jobs_by_status(JobStatus::InProgress, 10).await.unwrap().len(), 1);
        assert!(store.list_prepare_jobs_by_status(JobStatus::InProgress, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = MemoryStore::new();
        let prepare = ConferencePrepareJob::new("conf".into());
        let job = render_job(&prepare);
        let id = job.id.clone();
        store.insert_render_job(job).await.unwrap();

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_render_job(&id, json!({ "worker": worker }))
                    .await
                    .unwrap()
                    .is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let claimed = store.get_render_job(&id).await.unwrap();
        assert_eq!(claimed.status, JobStatus::InProgress);
        assert!(claimed.data.get("params").is_some());
        assert!(claimed.data.get("worker").is_some());
    }

    #[tokio::test]
    async fn test_finish_requires_in_progress() {
        let store = MemoryStore::new();
        let prepare = ConferencePrepareJob::new("conf".into());
        let job = render_job(&prepare);
        let id = job.id.clone();
        store.insert_render_job(job).await.unwrap();

        let err = store
            .finish_render_job(&id, JobStatus::Completed, json!({}), None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        store.claim_render_job(&id, json!({})).await.unwrap();
        let done = store
            .finish_render_job(&id, JobStatus::Completed, json!({ "output": { "s3_url": "x" } }), None)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        assert!(store
            .finish_render_job(&id, JobStatus::Failed, json!({}), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_identical_upsert_is_noop() {
        let store = MemoryStore::new();
        let first = store
            .upsert_broadcast_input(&"conf".into(), &"item".into(), mp4("https://cdn/x.mp4"))
            .await
            .unwrap();
        let second = store
            .upsert_broadcast_input(&"conf".into(), &"item".into(), mp4("https://cdn/x.mp4"))
            .await
            .unwrap();
        assert_eq!(first, second);

        let changed = store
            .upsert_broadcast_input(&"conf".into(), &"item".into(), mp4("https://cdn/y.mp4"))
            .await
            .unwrap();
        assert_eq!(changed.id, first.id);
        assert_ne!(changed.input, first.input);
    }

    #[tokio::test]
    async fn test_ensure_keeps_existing_item() {
        let store = MemoryStore::new();
        let pending = store
            .ensure_broadcast_item(&"conf".into(), &"item".into(), InputType::Mp4)
            .await
            .unwrap();
        assert!(!pending.is_ready());

        store
            .upsert_broadcast_input(&"conf".into(), &"item".into(), mp4("https://cdn/x.mp4"))
            .await
            .unwrap();
        let again = store
            .ensure_broadcast_item(&"conf".into(), &"item".into(), InputType::Mp4)
            .await
            .unwrap();
        assert_eq!(again.id, pending.id);
        assert!(again.is_ready());
    }

    #[tokio::test]
    async fn test_executed_transitions_are_unique_and_freeze_the_transition() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let transition = Transition {
            id: "t1".into(),
            conference_id: "conf".into(),
            event_id: "e".into(),
            room_id: "r".into(),
            broadcast_content_id: "a".into(),
            fallback_broadcast_content_id: None,
            time: now,
            created_at: now,
        };
        store.upsert_transition(transition.clone()).await.unwrap();

        let executed = ExecutedTransition::record(&transition, "a".into(), now);
        assert!(store.record_executed_transition(executed.clone()).await.unwrap());
        assert!(!store
            .record_executed_transition(ExecutedTransition::record(&transition, "a".into(), now))
            .await
            .unwrap());
        assert_eq!(store.list_executed_transitions(&"r".into()).await.unwrap(), vec![executed]);

        assert!(store.upsert_transition(transition.clone()).await.unwrap_err().is_conflict());
        assert!(store.delete_transition(&transition.id).await.unwrap_err().is_conflict());
    }
}
