//! Operator HTTP API.
//!
//! This crate provides:
//! - Prepare job start and inspection
//! - Transition schedule editing with change notifications to room schedulers
//! - Executed transition audit listing
//! - Health, readiness and Prometheus endpoints

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
