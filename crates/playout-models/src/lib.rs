//! Shared data models for the broadcast playout backend.
//!
//! This crate provides Serde-serializable types for:
//! - Prepare jobs and render jobs with their shared [`JobStatus`] lifecycle
//! - Broadcast content items and their typed inputs
//! - Content items and the render sources derived from them
//! - Rooms, events, transitions and the executed-transition audit trail

pub mod broadcast;
pub mod content;
pub mod error;
pub mod ids;
pub mod job;
pub mod job_status;
pub mod schedule;

// Re-export common types
pub use broadcast::{BroadcastContentItem, BroadcastInput, InputType};
pub use content::{Conference, ContentItem, ContentType, RenderSource, RenderTemplate};
pub use error::{ModelError, ModelResult};
pub use ids::{
    BroadcastContentItemId, ConferenceId, ContentGroupId, ContentItemId, EventId, ExecutedTransitionId,
    PrepareJobId, RenderJobId, RoomId, TransitionId,
};
pub use job::{merge_data_append, ConferencePrepareJob, RenderParams, VideoRenderJob};
pub use job_status::JobStatus;
pub use schedule::{Event, ExecutedTransition, Room, RoomMode, Transition};
