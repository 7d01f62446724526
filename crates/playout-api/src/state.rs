//! Application state.

use std::sync::Arc;

use tracing::warn;

use playout_queue::{RenderQueue, ScheduleChange, ScheduleChannel};
use playout_store::Store;
use playout_worker::PrepareOrchestrator;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn Store>,
    pub changes: Arc<dyn ScheduleChannel>,
    pub orchestrator: PrepareOrchestrator,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn Store>,
        queue: Arc<dyn RenderQueue>,
        changes: Arc<dyn ScheduleChannel>,
    ) -> Self {
        let orchestrator = PrepareOrchestrator::new(Arc::clone(&store), queue);
        Self {
            config,
            store,
            changes,
            orchestrator,
        }
    }

    /// Tell room schedulers to re-read a room. Schedulers also poll, so a
    /// lost notification only delays the pickup.
    pub async fn notify(&self, change: ScheduleChange) {
        if let Err(e) = self.changes.publish(&change).await {
            warn!(room_id = %change.room_id, "Failed to publish schedule change: {}", e);
        }
    }
}
