//! Broadcast render worker.
//!
//! This crate provides:
//! - Prepare job orchestration with fail-fast aggregation
//! - A bounded render worker pool fed by the render queue and a store sweep
//! - Bounded retry for transient encoder errors
//! - Stale render job detection

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod stale;

#[cfg(test)]
mod testing;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{RenderContext, RenderExecutor, RenderOutcome};
pub use logging::JobLogger;
pub use orchestrator::{aggregate, PrepareOrchestrator, PrepareOutcome};
pub use stale::StaleJobDetector;
