//! Per-room broadcast transition scheduler.
//!
//! This crate provides:
//! - One scheduler actor per room executing due transitions against the switcher
//! - Fallback content selection when the primary item is not ready
//! - Room leases so each room is driven by exactly one instance
//! - Operational alerts for missing content and failed switches

pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod lease;
pub mod metrics;
pub mod room;
pub mod supervisor;
pub mod switcher;
pub mod timing;

pub use alert::{Alert, AlertKind, Alerter, LogAlerter, WebhookAlerter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use lease::{LocalRoomLease, RedisRoomLease, RoomLease};
pub use room::{RoomHandle, RoomScheduler, RunReport};
pub use supervisor::Supervisor;
pub use switcher::{HttpSwitcher, LoggingSwitcher, SwitchRequest, VideoSwitcher};
