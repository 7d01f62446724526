//! Persistence for the playout backend.
//!
//! This crate provides:
//! - [`ContentStore`], [`JobStore`] and [`ScheduleStore`] contracts
//! - [`MemoryStore`] for tests and single-process deployments
//! - [`RedisStore`] with Lua compare-and-set for the conditional updates
//! - Store operation metrics

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::{RedisStore, StoreConfig};
pub use traits::{ContentStore, JobStore, ScheduleStore, Store};
