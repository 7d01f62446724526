//! Render job queue and schedule change notifications.
//!
//! This crate provides:
//! - Render job announcements via Redis Streams, or an in-process queue
//! - Schedule change events via Redis Pub/Sub, or an in-process broadcast

pub mod error;
pub mod queue;
pub mod schedule;

pub use error::{QueueError, QueueResult};
pub use queue::{LocalRenderQueue, QueueConfig, RedisRenderQueue, RenderQueue};
pub use schedule::{
    ChangeKind, LocalScheduleChannel, RedisScheduleChannel, ScheduleChange, ScheduleChannel, ScheduleStream,
};
