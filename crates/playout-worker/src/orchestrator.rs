//! Prepare job orchestration.
//!
//! A prepare run works out which content items of a conference need a fresh
//! broadcast render, creates one render job per item under a single
//! [`ConferencePrepareJob`] and announces them on the render queue. Parent
//! status is re-derived from the children by [`PrepareOrchestrator::refresh`]
//! whenever one of them finishes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use playout_models::{
    BroadcastContentItem, Conference, ConferenceId, ConferencePrepareJob, ContentItem, InputType, JobStatus, PrepareJobId,
    RenderParams, RenderSource, VideoRenderJob,
};
use playout_queue::RenderQueue;
use playout_store::{Store, StoreError};

use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;

/// Result of starting a prepare run.
#[derive(Debug, Clone)]
pub struct PrepareOutcome {
    pub job: ConferencePrepareJob,
    pub render_jobs: Vec<VideoRenderJob>,
}

/// A content item that needs rendering and what to render it from.
#[derive(Debug, Clone)]
struct PlannedRender {
    item: ContentItem,
    source: RenderSource,
}

/// Creates prepare jobs and keeps their status in line with their children.
#[derive(Clone)]
pub struct PrepareOrchestrator {
    store: Arc<dyn Store>,
    queue: Arc<dyn RenderQueue>,
}

impl PrepareOrchestrator {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn RenderQueue>) -> Self {
        Self { store, queue }
    }

    /// Start a prepare run for `conference_id`.
    ///
    /// Fails with a store conflict if the conference already has a
    /// non-terminal prepare job. Content configuration problems do not
    /// error: they are reported through a FAILED job and no render job is
    /// created. Any other error after the job exists aborts it, so the
    /// conference is never left holding a NEW job.
    pub async fn prepare(&self, conference_id: &ConferenceId) -> WorkerResult<PrepareOutcome> {
        let conference = self.store.get_conference(conference_id).await?;
        let job = self
            .store
            .create_prepare_job(ConferencePrepareJob::new(conference_id.clone()))
            .await?;
        let logger = JobLogger::new(&job.id, "prepare");
        logger.log_start(&format!("conference {}", conference.name));

        match self.fan_out(&conference, &job, &logger).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                logger.log_error(&format!("aborted: {e}"));
                if let Err(abort_error) = self.abort(&job.id, format!("prepare aborted: {e}")).await {
                    warn!(prepare_job_id = %job.id, "Failed to abort prepare job: {}", abort_error);
                }
                metrics::record_prepare("failed");
                Err(e)
            }
        }
    }

    async fn fan_out(
        &self,
        conference: &Conference,
        job: &ConferencePrepareJob,
        logger: &JobLogger,
    ) -> WorkerResult<PrepareOutcome> {
        let conference_id = &conference.id;
        let items = self.store.list_content_items(conference_id).await?;
        let mut planned = Vec::new();
        let mut problems = Vec::new();
        for item in items
            .into_iter()
            .filter(|item| item.content_type_name.requires_broadcast_render())
        {
            if let Some(existing) = self.store.find_broadcast_item(&item.id).await? {
                if existing.is_current_for(&item) {
                    debug!(content_item_id = %item.id, "Broadcast item is up to date");
                    continue;
                }
            }
            match RenderSource::resolve(&item, conference) {
                Ok(source) => planned.push(PlannedRender { item, source }),
                Err(e) => problems.push(e.to_string()),
            }
        }

        if !problems.is_empty() {
            let message = problems.join("; ");
            logger.log_error(&message);
            let job = self.fail_before_start(&job.id, message).await?;
            metrics::record_prepare("failed");
            return Ok(PrepareOutcome {
                job,
                render_jobs: Vec::new(),
            });
        }

        if planned.is_empty() {
            self.store
                .update_prepare_job_status(&job.id, JobStatus::New, JobStatus::InProgress, None)
                .await?;
            let job = self
                .store
                .update_prepare_job_status(&job.id, JobStatus::InProgress, JobStatus::Completed, None)
                .await?;
            logger.log_completion("nothing to render");
            metrics::record_prepare("completed");
            return Ok(PrepareOutcome {
                job,
                render_jobs: Vec::new(),
            });
        }

        let mut render_jobs = Vec::with_capacity(planned.len());
        for plan in planned {
            let target = self
                .store
                .ensure_broadcast_item(conference_id, &plan.item.id, InputType::Mp4)
                .await?;
            let render_job = self.new_render_job(job, &target, plan).await?;
            self.store.insert_render_job(render_job.clone()).await?;
            render_jobs.push(render_job);
        }

        // The parent must be IN_PROGRESS before any child can finish.
        let job = self
            .store
            .update_prepare_job_status(&job.id, JobStatus::New, JobStatus::InProgress, None)
            .await?;

        for render_job in &render_jobs {
            if let Err(e) = self.queue.enqueue(&render_job.id).await {
                // The store sweep picks up anything the queue lost.
                warn!(render_job_id = %render_job.id, "Failed to announce render job: {}", e);
            }
        }

        logger.log_progress(&format!("{} render jobs queued", render_jobs.len()));
        metrics::record_prepare("started");
        Ok(PrepareOutcome { job, render_jobs })
    }

    async fn new_render_job(
        &self,
        parent: &ConferencePrepareJob,
        target: &BroadcastContentItem,
        plan: PlannedRender,
    ) -> WorkerResult<VideoRenderJob> {
        let previous = self
            .store
            .latest_render_job_for_item(&target.id)
            .await?
            .filter(|j| j.status == JobStatus::Failed)
            .map(|j| j.id);
        if let Some(previous) = &previous {
            info!(content_item_id = %plan.item.id, superseded = %previous, "Superseding failed render job");
        }

        let params = RenderParams {
            content_item_id: plan.item.id,
            source: plan.source,
        };
        Ok(VideoRenderJob::new(parent, target.id.clone(), &params).superseding(previous))
    }

    /// A job that never started still walks NEW -> IN_PROGRESS -> FAILED.
    async fn fail_before_start(&self, id: &PrepareJobId, message: String) -> WorkerResult<ConferencePrepareJob> {
        self.store
            .update_prepare_job_status(id, JobStatus::New, JobStatus::InProgress, None)
            .await?;
        Ok(self
            .store
            .update_prepare_job_status(id, JobStatus::InProgress, JobStatus::Failed, Some(message))
            .await?)
    }

    /// Fail a prepare job from NEW or IN_PROGRESS and abandon its render
    /// jobs that were never claimed. Terminal jobs are returned untouched.
    pub async fn abort(&self, id: &PrepareJobId, message: String) -> WorkerResult<ConferencePrepareJob> {
        let job = self.store.get_prepare_job(id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        if job.status == JobStatus::New {
            match self
                .store
                .update_prepare_job_status(id, JobStatus::New, JobStatus::InProgress, None)
                .await
            {
                Ok(_) | Err(StoreError::StatusConflict { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let job = match self
            .store
            .update_prepare_job_status(id, JobStatus::InProgress, JobStatus::Failed, Some(message))
            .await
        {
            Ok(job) => job,
            Err(StoreError::StatusConflict { .. }) => self.store.get_prepare_job(id).await?,
            Err(e) => return Err(e.into()),
        };

        for child in self.store.list_render_jobs(id).await? {
            if child.status != JobStatus::New {
                continue;
            }
            let claim = json!({ "abandoned_at": Utc::now().to_rfc3339() });
            if self.store.claim_render_job(&child.id, claim).await?.is_none() {
                continue;
            }
            let message = format!("abandoned: prepare job {id} already failed");
            match self
                .store
                .finish_render_job(&child.id, JobStatus::Failed, json!({}), Some(message))
                .await
            {
                Ok(_) | Err(StoreError::StatusConflict { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(job)
    }

    /// Re-derive the prepare job's status from its render jobs.
    ///
    /// Terminal jobs are returned untouched. Losing a race against another
    /// refresh is not an error: the winner's result is returned.
    pub async fn refresh(&self, id: &PrepareJobId) -> WorkerResult<ConferencePrepareJob> {
        let job = self.store.get_prepare_job(id).await?;
        if job.status != JobStatus::InProgress {
            return Ok(job);
        }

        let children = self.store.list_render_jobs(id).await?;
        let Some((next, message)) = aggregate(&children) else {
            return Ok(job);
        };

        match self
            .store
            .update_prepare_job_status(id, JobStatus::InProgress, next, message)
            .await
        {
            Ok(job) => {
                let logger = JobLogger::new(&job.id, "prepare");
                match job.status {
                    JobStatus::Completed => logger.log_completion(&format!("{} renders completed", children.len())),
                    _ => logger.log_error(job.message.as_deref().unwrap_or("render failed")),
                }
                Ok(job)
            }
            Err(StoreError::StatusConflict { .. }) => Ok(self.store.get_prepare_job(id).await?),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fail-fast aggregation of child statuses.
///
/// Returns the terminal status the parent should move to, or `None` while
/// children are still outstanding. The first failed child (by creation
/// order) supplies the message.
pub fn aggregate(children: &[VideoRenderJob]) -> Option<(JobStatus, Option<String>)> {
    if let Some(failed) = children.iter().find(|c| c.status == JobStatus::Failed) {
        let reason = failed.message.as_deref().unwrap_or("no reason recorded");
        return Some((
            JobStatus::Failed,
            Some(format!("render job {} failed: {}", failed.id, reason)),
        ));
    }
    if children.iter().all(|c| c.status == JobStatus::Completed) {
        return Some((JobStatus::Completed, None));
    }
    None
}
