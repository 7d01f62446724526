//! Stale job detection.
//!
//! A worker that dies mid-render leaves its job IN_PROGRESS forever. Jobs
//! that have not moved for longer than the render timeout are failed here so
//! the parent prepare job can reach a terminal state.
//!
//! A prepare run that dies before fan-out finishes leaves its prepare job
//! NEW, which blocks every later run for the conference. Those are aborted
//! once older than the orphan threshold.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use playout_models::{JobStatus, PrepareJobId, RenderJobId};
use playout_store::{Store, StoreError};

use crate::error::WorkerResult;
use crate::metrics;
use crate::orchestrator::PrepareOrchestrator;

const SCAN_LIMIT: usize = 500;

#[derive(Clone)]
pub struct StaleJobDetector {
    store: Arc<dyn Store>,
    orchestrator: PrepareOrchestrator,
    stale_after: Duration,
    orphan_after: Duration,
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    now - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::days(365))
}

impl StaleJobDetector {
    pub fn new(store: Arc<dyn Store>, orchestrator: PrepareOrchestrator, stale_after: Duration) -> Self {
        Self {
            store,
            orchestrator,
            stale_after,
            orphan_after: stale_after,
        }
    }

    pub fn with_orphan_after(mut self, orphan_after: Duration) -> Self {
        self.orphan_after = orphan_after;
        self
    }

    /// One pass of both checks.
    pub async fn check(&self, now: DateTime<Utc>) -> WorkerResult<()> {
        self.sweep_orphans(now).await?;
        self.sweep(now).await?;
        Ok(())
    }

    /// Abort every prepare job still NEW since before `now - orphan_after`,
    /// abandoning its unclaimed render jobs. Returns the aborted job ids.
    pub async fn sweep_orphans(&self, now: DateTime<Utc>) -> WorkerResult<Vec<PrepareJobId>> {
        let cutoff = cutoff(now, self.orphan_after);
        let mut aborted = Vec::new();
        for job in self
            .store
            .list_prepare_jobs_by_status(JobStatus::New, SCAN_LIMIT)
            .await?
            .into_iter()
            .filter(|job| job.updated_at < cutoff)
        {
            let message = format!("orphaned: still NEW after {}s", self.orphan_after.as_secs());
            let job = self.orchestrator.abort(&job.id, message).await?;
            warn!(prepare_job_id = %job.id, conference_id = %job.conference_id, "Aborted orphaned prepare job");
            aborted.push(job.id);
        }
        if !aborted.is_empty() {
            info!("Aborted {} orphaned prepare jobs", aborted.len());
            metrics::record_stale(aborted.len());
        }
        Ok(aborted)
    }

    /// Fail every IN_PROGRESS job last updated before `now - stale_after`
    /// and refresh the affected prepare jobs. Returns the failed job ids.
    pub async fn sweep(&self, now: DateTime<Utc>) -> WorkerResult<Vec<RenderJobId>> {
        let cutoff = cutoff(now, self.stale_after);

        let mut failed = Vec::new();
        let mut parents = BTreeSet::new();
        for job in self
            .store
            .list_render_jobs_by_status(JobStatus::InProgress, SCAN_LIMIT)
            .await?
            .into_iter()
            .filter(|job| job.updated_at < cutoff)
        {
            let message = format!(
                "timed out: no progress for {}s (worker {})",
                self.stale_after.as_secs(),
                job.data["worker"]["id"].as_str().unwrap_or("unknown")
            );
            match self
                .store
                .finish_render_job(&job.id, JobStatus::Failed, json!({ "stale_at": now.to_rfc3339() }), Some(message))
                .await
            {
                Ok(job) => {
                    warn!(render_job_id = %job.id, "Failed stale render job");
                    parents.insert(job.prepare_job_id.clone());
                    failed.push(job.id);
                }
                // Finished by its worker in the meantime.
                Err(StoreError::StatusConflict { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        for parent in &parents {
            self.orchestrator.refresh(parent).await?;
        }
        if !failed.is_empty() {
            info!("Failed {} stale render jobs", failed.len());
            metrics::record_stale(failed.len());
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use playout_models::{ConferencePrepareJob, ContentType};
    use playout_queue::LocalRenderQueue;
    use playout_store::{JobStore, MemoryStore};

    #[tokio::test]
    async fn test_stale_jobs_fail_and_fail_the_parent() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = PrepareOrchestrator::new(store.clone(), Arc::new(LocalRenderQueue::new()));
        let conference = seed_conference(&store, true).await;
        seed_item(&store, &conference, ContentType::VideoCountdown, json!({})).await;

        let prepared = orchestrator.prepare(&conference.id).await.unwrap();
        let job_id = prepared.render_jobs[0].id.clone();
        store
            .claim_render_job(&job_id, json!({ "worker": { "id": "w-dead" } }))
            .await
            .unwrap()
            .unwrap();

        let detector = StaleJobDetector::new(store.clone(), orchestrator, Duration::from_secs(60));

        assert!(detector.sweep(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::minutes(5);
        assert_eq!(detector.sweep(later).await.unwrap(), vec![job_id.clone()]);

        let job = store.get_render_job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.message.unwrap().contains("w-dead"));
        let parent = store.get_prepare_job(&prepared.job.id).await.unwrap();
        assert_eq!(parent.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_orphaned_new_prepare_job_is_aborted_with_its_children() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = PrepareOrchestrator::new(store.clone(), Arc::new(LocalRenderQueue::new()));
        let conference = seed_conference(&store, true).await;

        // A prepare run that died after inserting one child.
        let orphan = store
            .create_prepare_job(ConferencePrepareJob::new(conference.id.clone()))
            .await
            .unwrap();
        let child = render_job_with_status(&orphan, JobStatus::New);
        store.insert_render_job(child.clone()).await.unwrap();

        let detector = StaleJobDetector::new(store.clone(), orchestrator.clone(), Duration::from_secs(3600))
            .with_orphan_after(Duration::from_secs(60));

        assert!(detector.sweep_orphans(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::minutes(5);
        detector.check(later).await.unwrap();

        let parent = store.get_prepare_job(&orphan.id).await.unwrap();
        assert_eq!(parent.status, JobStatus::Failed);
        assert!(parent.message.unwrap().starts_with("orphaned"));
        let child = store.get_render_job(&child.id).await.unwrap();
        assert_eq!(child.status, JobStatus::Failed);
        assert!(child.message.unwrap().starts_with("abandoned"));
        assert!(store.list_render_jobs_by_status(JobStatus::New, 10).await.unwrap().is_empty());

        // The conference can be prepared again.
        seed_item(&store, &conference, ContentType::VideoCountdown, json!({})).await;
        let next = orchestrator.prepare(&conference.id).await.unwrap();
        assert_eq!(next.job.status, JobStatus::InProgress);
    }
}
