//! Fixtures shared by the worker's unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use playout_models::{
    BroadcastContentItem, BroadcastContentItemId, BroadcastInput, Conference, ConferenceId, ConferencePrepareJob,
    ContentItem, ContentItemId, ContentType, Event, EventId, ExecutedTransition, InputType, JobStatus, PrepareJobId,
    RenderJobId, RenderParams, RenderSource, RenderTemplate, Room, RoomId, RoomMode, Transition, TransitionId,
    VideoRenderJob,
};
use playout_store::{ContentStore, JobStore, MemoryStore, ScheduleStore, StoreError, StoreResult};

pub async fn seed_conference(store: &MemoryStore, with_template: bool) -> Conference {
    let conference = Conference {
        id: ConferenceId::new(),
        name: "RustConf".into(),
        render_template: with_template.then(RenderTemplate::default),
    };
    store.put_conference(conference.clone()).await.unwrap();
    conference
}

pub async fn seed_item(store: &MemoryStore, conference: &Conference, kind: ContentType, data: Value) -> ContentItem {
    let item = ContentItem {
        id: ContentItemId::new(),
        conference_id: conference.id.clone(),
        content_type_name: kind,
        name: "Opening".into(),
        data,
        required_content_id: None,
        updated_at: Utc::now(),
    };
    store.put_content_item(item.clone()).await.unwrap();
    item
}

pub fn render_job_with_status(parent: &ConferencePrepareJob, status: JobStatus) -> VideoRenderJob {
    let params = RenderParams {
        content_item_id: ContentItemId::new(),
        source: RenderSource::Countdown {
            seconds: 3,
            template: RenderTemplate::default(),
        },
    };
    let mut job = VideoRenderJob::new(parent, Default::default(), &params);
    job.status = status;
    job
}

/// Memory store whose render job inserts can be switched to fail, to stand
/// in for a store outage halfway through a prepare run.
#[derive(Clone, Default)]
pub struct OutageStore {
    pub inner: MemoryStore,
    insert_outage: Arc<AtomicBool>,
}

impl OutageStore {
    pub fn set_insert_outage(&self, down: bool) {
        self.insert_outage.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for OutageStore {
    async fn put_conference(&self, conference: Conference) -> StoreResult<()> {
        self.inner.put_conference(conference).await
    }

    async fn get_conference(&self, id: &ConferenceId) -> StoreResult<Conference> {
        self.inner.get_conference(id).await
    }

    async fn put_content_item(&self, item: ContentItem) -> StoreResult<()> {
        self.inner.put_content_item(item).await
    }

    async fn list_content_items(&self, conference_id: &ConferenceId) -> StoreResult<Vec<ContentItem>> {
        self.inner.list_content_items(conference_id).await
    }

    async fn get_broadcast_item(&self, id: &BroadcastContentItemId) -> StoreResult<Option<BroadcastContentItem>> {
        self.inner.get_broadcast_item(id).await
    }

    async fn find_broadcast_item(&self, content_item_id: &ContentItemId) -> StoreResult<Option<BroadcastContentItem>> {
        self.inner.find_broadcast_item(content_item_id).await
    }

    async fn ensure_broadcast_item(
        &self,
        conference_id: &ConferenceId,
        content_item_id: &ContentItemId,
        input_type: InputType,
    ) -> StoreResult<BroadcastContentItem> {
        self.inner
            .ensure_broadcast_item(conference_id, content_item_id, input_type)
            .await
    }

    async fn upsert_broadcast_input(
        &self,
        conference_id: &ConferenceId,
        content_item_id: &ContentItemId,
        input: BroadcastInput,
    ) -> StoreResult<BroadcastContentItem> {
        self.inner
            .upsert_broadcast_input(conference_id, content_item_id, input)
            .await
    }
}

#[async_trait]
impl JobStore for OutageStore {
    async fn create_prepare_job(&self, job: ConferencePrepareJob) -> StoreResult<ConferencePrepareJob> {
        self.inner.create_prepare_job(job).await
    }

    async fn get_prepare_job(&self, id: &PrepareJobId) -> StoreResult<ConferencePrepareJob> {
        self.inner.get_prepare_job(id).await
    }

    async fn list_prepare_jobs(&self, conference_id: &ConferenceId) -> StoreResult<Vec<ConferencePrepareJob>> {
        self.inner.list_prepare_jobs(conference_id).await
    }

    async fn list_prepare_jobs_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> StoreResult<Vec<ConferencePrepareJob>> {
        self.inner.list_prepare_jobs_by_status(status, limit).await
    }

    async fn update_prepare_job_status(
        &self,
        id: &PrepareJobId,
        expected: JobStatus,
        next: JobStatus,
        message: Option<String>,
    ) -> StoreResult<ConferencePrepareJob> {
        self.inner.update_prepare_job_status(id, expected, next, message).await
    }

    async fn insert_render_job(&self, job: VideoRenderJob) -> StoreResult<()> {
        if self.insert_outage.load(Ordering::SeqCst) {
            let truncated = serde_json::from_str::<Value>("{\"id\":").unwrap_err();
            return Err(StoreError::from(truncated));
        }
        self.inner.insert_render_job(job).await
    }

    async fn get_render_job(&self, id: &RenderJobId) -> StoreResult<VideoRenderJob> {
        self.inner.get_render_job(id).await
    }

    async fn list_render_jobs(&self, prepare_job_id: &PrepareJobId) -> StoreResult<Vec<VideoRenderJob>> {
        self.inner.list_render_jobs(prepare_job_id).await
    }

    async fn list_render_jobs_by_status(&self, status: JobStatus, limit: usize) -> StoreResult<Vec<VideoRenderJob>> {
        self.inner.list_render_jobs_by_status(status, limit).await
    }

    async fn latest_render_job_for_item(
        &self,
        item_id: &BroadcastContentItemId,
    ) -> StoreResult<Option<VideoRenderJob>> {
        self.inner.latest_render_job_for_item(item_id).await
    }

    async fn claim_render_job(&self, id: &RenderJobId, start_data: Value) -> StoreResult<Option<VideoRenderJob>> {
        self.inner.claim_render_job(id, start_data).await
    }

    async fn finish_render_job(
        &self,
        id: &RenderJobId,
        outcome: JobStatus,
        data: Value,
        message: Option<String>,
    ) -> StoreResult<VideoRenderJob> {
        self.inner.finish_render_job(id, outcome, data, message).await
    }
}

#[async_trait]
impl ScheduleStore for OutageStore {
    async fn put_room(&self, room: Room) -> StoreResult<()> {
        self.inner.put_room(room).await
    }

    async fn get_room(&self, id: &RoomId) -> StoreResult<Room> {
        self.inner.get_room(id).await
    }

    async fn list_rooms(&self) -> StoreResult<Vec<Room>> {
        self.inner.list_rooms().await
    }

    async fn set_room_mode(&self, id: &RoomId, mode: RoomMode) -> StoreResult<()> {
        self.inner.set_room_mode(id, mode).await
    }

    async fn put_event(&self, event: Event) -> StoreResult<()> {
        self.inner.put_event(event).await
    }

    async fn get_event(&self, id: &EventId) -> StoreResult<Event> {
        self.inner.get_event(id).await
    }

    async fn list_events_for_room(&self, room_id: &RoomId) -> StoreResult<Vec<Event>> {
        self.inner.list_events_for_room(room_id).await
    }

    async fn upsert_transition(&self, transition: Transition) -> StoreResult<()> {
        self.inner.upsert_transition(transition).await
    }

    async fn delete_transition(&self, id: &TransitionId) -> StoreResult<bool> {
        self.inner.delete_transition(id).await
    }

    async fn get_transition(&self, id: &TransitionId) -> StoreResult<Option<Transition>> {
        self.inner.get_transition(id).await
    }

    async fn list_transitions_for_room(&self, room_id: &RoomId) -> StoreResult<Vec<Transition>> {
        self.inner.list_transitions_for_room(room_id).await
    }

    async fn record_executed_transition(&self, executed: ExecutedTransition) -> StoreResult<bool> {
        self.inner.record_executed_transition(executed).await
    }

    async fn is_transition_executed(&self, id: &TransitionId) -> StoreResult<bool> {
        self.inner.is_transition_executed(id).await
    }

    async fn list_executed_transitions(&self, room_id: &RoomId) -> StoreResult<Vec<ExecutedTransition>> {
        self.inner.list_executed_transitions(room_id).await
    }
}
