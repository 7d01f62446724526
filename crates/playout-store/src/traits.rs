//! Store contracts.
//!
//! Content (conferences, content items, broadcast items), jobs and the
//! schedule are separate contracts because they are owned by different
//! collaborators in production. [`Store`] bundles all three for components
//! that need them together.

use async_trait::async_trait;
use serde_json::Value;

use playout_models::{
    BroadcastContentItem, BroadcastContentItemId, BroadcastInput, Conference, ConferenceId,
    ConferencePrepareJob, ContentItem, ContentItemId, Event, EventId, ExecutedTransition, InputType,
    JobStatus, PrepareJobId, RenderJobId, Room, RoomId, RoomMode, Transition, TransitionId, VideoRenderJob,
};

use crate::StoreResult;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Import or refresh a conference record from the content service.
    async fn put_conference(&self, conference: Conference) -> StoreResult<()>;

    async fn get_conference(&self, id: &ConferenceId) -> StoreResult<Conference>;

    /// Import or refresh a content item from the content service.
    async fn put_content_item(&self, item: ContentItem) -> StoreResult<()>;

    async fn list_content_items(&self, conference_id: &ConferenceId) -> StoreResult<Vec<ContentItem>>;

    async fn get_broadcast_item(&self, id: &BroadcastContentItemId) -> StoreResult<Option<BroadcastContentItem>>;

    async fn find_broadcast_item(&self, content_item_id: &ContentItemId) -> StoreResult<Option<BroadcastContentItem>>;

    /// Return the broadcast item for `content_item_id`, creating an empty one
    /// expecting `input_type` if none exists. Existing items are returned as is.
    async fn ensure_broadcast_item(
        &self,
        conference_id: &ConferenceId,
        content_item_id: &ContentItemId,
        input_type: InputType,
    ) -> StoreResult<BroadcastContentItem>;

    /// Upsert keyed by `content_item_id`: on conflict only `input` and
    /// `input_type_name` change. Writing an identical input leaves the record
    /// untouched, `updated_at` included.
    async fn upsert_broadcast_input(
        &self,
        conference_id: &ConferenceId,
        content_item_id: &ContentItemId,
        input: BroadcastInput,
    ) -> StoreResult<BroadcastContentItem>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Conditional insert: fails with [`crate::StoreError::Conflict`] when
    /// the conference already has a non-terminal prepare job.
    async fn create_prepare_job(&self, job: ConferencePrepareJob) -> StoreResult<ConferencePrepareJob>;

    async fn get_prepare_job(&self, id: &PrepareJobId) -> StoreResult<ConferencePrepareJob>;

    /// Newest first.
    async fn list_prepare_jobs(&self, conference_id: &ConferenceId) -> StoreResult<Vec<ConferencePrepareJob>>;

    /// Oldest first, at most `limit`.
    async fn list_prepare_jobs_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> StoreResult<Vec<ConferencePrepareJob>>;

    /// Compare-and-set from `expected` to `next`.
    async fn update_prepare_job_status(
        &self,
        id: &PrepareJobId,
        expected: JobStatus,
        next: JobStatus,
        message: Option<String>,
    ) -> StoreResult<ConferencePrepareJob>;

    async fn insert_render_job(&self, job: VideoRenderJob) -> StoreResult<()>;

    async fn get_render_job(&self, id: &RenderJobId) -> StoreResult<VideoRenderJob>;

    /// Oldest first.
    async fn list_render_jobs(&self, prepare_job_id: &PrepareJobId) -> StoreResult<Vec<VideoRenderJob>>;

    /// Oldest first, at most `limit`.
    async fn list_render_jobs_by_status(&self, status: JobStatus, limit: usize) -> StoreResult<Vec<VideoRenderJob>>;

    /// Most recently created render job targeting `item_id`.
    async fn latest_render_job_for_item(&self, item_id: &BroadcastContentItemId)
        -> StoreResult<Option<VideoRenderJob>>;

    /// Atomic NEW -> IN_PROGRESS. `start_data` is append-merged into `data`.
    /// Returns `None` when the job is not NEW (someone else won).
    async fn claim_render_job(&self, id: &RenderJobId, start_data: Value) -> StoreResult<Option<VideoRenderJob>>;

    /// Atomic IN_PROGRESS -> `outcome` (COMPLETED or FAILED). `data` is
    /// append-merged.
    async fn finish_render_job(
        &self,
        id: &RenderJobId,
        outcome: JobStatus,
        data: Value,
        message: Option<String>,
    ) -> StoreResult<VideoRenderJob>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn put_room(&self, room: Room) -> StoreResult<()>;

    async fn get_room(&self, id: &RoomId) -> StoreResult<Room>;

    async fn list_rooms(&self) -> StoreResult<Vec<Room>>;

    async fn set_room_mode(&self, id: &RoomId, mode: RoomMode) -> StoreResult<()>;

    async fn put_event(&self, event: Event) -> StoreResult<()>;

    async fn get_event(&self, id: &EventId) -> StoreResult<Event>;

    async fn list_events_for_room(&self, room_id: &RoomId) -> StoreResult<Vec<Event>>;

    /// Create or replace a pending transition. Executed transitions are
    /// immutable and yield [`crate::StoreError::Conflict`].
    async fn upsert_transition(&self, transition: Transition) -> StoreResult<()>;

    /// Returns false if there was nothing to delete.
    async fn delete_transition(&self, id: &TransitionId) -> StoreResult<bool>;

    async fn get_transition(&self, id: &TransitionId) -> StoreResult<Option<Transition>>;

    async fn list_transitions_for_room(&self, room_id: &RoomId) -> StoreResult<Vec<Transition>>;

    /// Insert-only, unique on `transition_id`. Returns false if the
    /// transition had already been recorded.
    async fn record_executed_transition(&self, executed: ExecutedTransition) -> StoreResult<bool>;

    async fn is_transition_executed(&self, id: &TransitionId) -> StoreResult<bool>;

    /// Ordered by scheduled time, then execution time.
    async fn list_executed_transitions(&self, room_id: &RoomId) -> StoreResult<Vec<ExecutedTransition>>;
}

/// Everything the backend persists.
pub trait Store: ContentStore + JobStore + ScheduleStore {}

impl<T: ContentStore + JobStore + ScheduleStore> Store for T {}
