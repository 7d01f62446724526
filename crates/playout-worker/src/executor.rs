//! Render job executor.
//!
//! A bounded pool of render tasks fed from two sources: render queue
//! announcements and a periodic sweep of the store for NEW jobs. The same job
//! may be handed out by both; the NEW -> IN_PROGRESS claim decides who runs it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use playout_media::{Encoder, MediaError, RenderOutput, RenderRequest};
use playout_models::{BroadcastInput, JobStatus, RenderJobId, VideoRenderJob};
use playout_queue::RenderQueue;
use playout_store::{Store, StoreError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::orchestrator::PrepareOrchestrator;
use crate::retry::{retry_async, FailureTracker, RetryConfig};
use crate::stale::StaleJobDetector;

/// What happened to a render job handed to [`RenderContext::process`].
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    /// Already claimed or finished elsewhere.
    NotClaimed,
    /// Parent prepare job has not started yet; picked up by a later sweep.
    Deferred,
    Completed(VideoRenderJob),
    Failed(VideoRenderJob),
    /// Parent had already failed, so the job was failed without encoding.
    Abandoned(VideoRenderJob),
}

/// Everything needed to run one render job.
#[derive(Clone)]
pub struct RenderContext {
    store: Arc<dyn Store>,
    encoder: Arc<dyn Encoder>,
    orchestrator: PrepareOrchestrator,
    retry: RetryConfig,
    job_timeout: Duration,
    worker_id: String,
}

impl RenderContext {
    pub fn new(
        config: &WorkerConfig,
        store: Arc<dyn Store>,
        encoder: Arc<dyn Encoder>,
        orchestrator: PrepareOrchestrator,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            encoder,
            orchestrator,
            retry: RetryConfig::new("encode")
                .with_max_retries(config.encoder_max_retries)
                .with_base_delay(config.retry_base_delay),
            job_timeout: config.job_timeout,
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim, encode and publish one render job, then refresh its parent.
    pub async fn process(&self, id: &RenderJobId) -> WorkerResult<RenderOutcome> {
        let job = self.store.get_render_job(id).await?;
        if job.status != JobStatus::New {
            return Ok(RenderOutcome::NotClaimed);
        }
        let parent = self.store.get_prepare_job(&job.prepare_job_id).await?;
        if parent.status == JobStatus::New {
            debug!(render_job_id = %id, "Parent prepare job not started yet");
            return Ok(RenderOutcome::Deferred);
        }

        let start_data = json!({
            "worker": { "id": self.worker_id, "started_at": Utc::now().to_rfc3339() }
        });
        let Some(job) = self.store.claim_render_job(id, start_data).await? else {
            return Ok(RenderOutcome::NotClaimed);
        };

        let logger = JobLogger::new(&job.id, "render");
        let started = Instant::now();

        if parent.status == JobStatus::Failed {
            let message = format!("abandoned: prepare job {} already failed", parent.id);
            logger.log_warning(&message);
            let job = self.finish(&job.id, JobStatus::Failed, json!({}), Some(message)).await?;
            metrics::record_render("abandoned", started.elapsed());
            return Ok(RenderOutcome::Abandoned(job));
        }

        logger.log_start(&format!("broadcast item {}", job.broadcast_content_item_id));
        let finished = match self.render(&job).instrument(logger.span()).await {
            Ok(output) => {
                logger.log_completion(&output.s3_url);
                self.finish(&job.id, JobStatus::Completed, json!({ "output": output }), None)
                    .await?
            }
            Err(message) => {
                logger.log_error(&message);
                self.finish(&job.id, JobStatus::Failed, json!({}), Some(message)).await?
            }
        };

        if let Err(e) = self.orchestrator.refresh(&finished.prepare_job_id).await {
            error!(prepare_job_id = %finished.prepare_job_id, "Failed to refresh prepare job: {}", e);
        }

        Ok(match finished.status {
            JobStatus::Completed => {
                metrics::record_render("completed", started.elapsed());
                RenderOutcome::Completed(finished)
            }
            _ => {
                metrics::record_render("failed", started.elapsed());
                RenderOutcome::Failed(finished)
            }
        })
    }

    /// Encode and point the broadcast item at the result. Errors come back
    /// as the message recorded on the failed job.
    async fn render(&self, job: &VideoRenderJob) -> Result<RenderOutput, String> {
        let params = job.params().map_err(|e| e.to_string())?;
        let request = RenderRequest {
            job_id: job.id.clone(),
            conference_id: job.conference_id.clone(),
            content_item_id: params.content_item_id.clone(),
            source: params.source,
        };

        let encoded = tokio::time::timeout(
            self.job_timeout,
            retry_async(&self.retry, MediaError::is_transient, || self.encoder.render(&request)),
        )
        .await;
        let output = match encoded {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => return Err(WorkerError::RenderTimeout(self.job_timeout.as_secs()).to_string()),
        };

        self.store
            .upsert_broadcast_input(
                &job.conference_id,
                &params.content_item_id,
                BroadcastInput::Mp4 {
                    s3_url: output.s3_url.clone(),
                },
            )
            .await
            .map_err(|e| format!("failed to publish rendered media: {e}"))?;
        Ok(output)
    }

    /// Finish the job, tolerating a stale-job sweep that got there first.
    async fn finish(
        &self,
        id: &RenderJobId,
        outcome: JobStatus,
        data: serde_json::Value,
        message: Option<String>,
    ) -> WorkerResult<VideoRenderJob> {
        match self.store.finish_render_job(id, outcome, data, message).await {
            Ok(job) => Ok(job),
            Err(StoreError::StatusConflict { actual, .. }) => {
                warn!(render_job_id = %id, "Job was already {} when finishing", actual);
                Ok(self.store.get_render_job(id).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Hands render jobs to the bounded pool.
#[derive(Clone)]
struct Dispatcher {
    ctx: RenderContext,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Dispatcher {
    async fn dispatch(&self, id: RenderJobId) -> WorkerResult<()> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;
        metrics::set_active(self.capacity - self.semaphore.available_permits());

        let ctx = self.ctx.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let capacity = self.capacity;
        tokio::spawn(async move {
            match ctx.process(&id).await {
                Ok(outcome) => debug!(render_job_id = %id, "Render task done: {:?}", outcome),
                Err(e) => error!(render_job_id = %id, "Render task failed: {}", e),
            }
            drop(permit);
            metrics::set_active(capacity - semaphore.available_permits());
        });
        Ok(())
    }

    /// Dispatch NEW jobs straight from the store, up to the free capacity.
    async fn sweep(&self) -> WorkerResult<usize> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            return Ok(0);
        }
        let jobs = self.ctx.store.list_render_jobs_by_status(JobStatus::New, available).await?;
        let count = jobs.len();
        for job in jobs {
            self.dispatch(job.id).await?;
        }
        Ok(count)
    }
}

/// Render worker: queue consumer, store sweep and stale job detection.
pub struct RenderExecutor {
    config: WorkerConfig,
    queue: Arc<dyn RenderQueue>,
    dispatcher: Dispatcher,
    stale: StaleJobDetector,
    shutdown: watch::Sender<bool>,
}

impl RenderExecutor {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn Store>,
        queue: Arc<dyn RenderQueue>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        let orchestrator = PrepareOrchestrator::new(Arc::clone(&store), Arc::clone(&queue));
        let worker_id = format!("worker-{}", Uuid::new_v4());
        let ctx = RenderContext::new(&config, Arc::clone(&store), encoder, orchestrator.clone(), worker_id);
        let stale = StaleJobDetector::new(store, orchestrator, config.job_timeout + config.stale_check_interval)
            .with_orphan_after(config.prepare_orphan_timeout);
        let (shutdown, _) = watch::channel(false);

        Self {
            dispatcher: Dispatcher {
                ctx,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                capacity: config.max_concurrent_jobs,
            },
            config,
            queue,
            stale,
            shutdown,
        }
    }

    pub fn worker_id(&self) -> &str {
        self.dispatcher.ctx.worker_id()
    }

    /// Run until [`RenderExecutor::shutdown`] is called, then wait for
    /// in-flight renders up to the shutdown timeout.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting render executor '{}' with {} max concurrent jobs",
            self.worker_id(),
            self.config.max_concurrent_jobs
        );

        let sweep_task = tokio::spawn(sweep_loop(
            self.dispatcher.clone(),
            self.config.sweep_interval,
            self.shutdown.subscribe(),
        ));
        let stale_task = tokio::spawn(stale_loop(
            self.stale.clone(),
            self.config.stale_check_interval,
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming render jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        sweep_task.abort();
        stale_task.abort();

        info!("Waiting for in-flight renders to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!("Shutdown timeout elapsed with renders still running");
        }
        info!("Render executor stopped");
        Ok(())
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.dispatcher.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let ids = self
            .queue
            .next_batch(self.worker_id(), available.min(5), self.config.queue_block)
            .await?;
        if !ids.is_empty() {
            debug!("Consumed {} render jobs from queue", ids.len());
        }
        for id in ids {
            self.dispatcher.dispatch(id).await?;
        }
        Ok(())
    }

    async fn wait_for_jobs(&self) {
        while self.dispatcher.semaphore.available_permits() < self.dispatcher.capacity {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn sweep_loop(dispatcher: Dispatcher, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    let mut failures = FailureTracker::new(3);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => match dispatcher.sweep().await {
                Ok(count) => {
                    failures.record_success();
                    if count > 0 {
                        info!("Swept {} NEW render jobs from the store", count);
                    }
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!("Render job sweep failed: {}", e);
                    }
                }
            }
        }
    }
}

async fn stale_loop(detector: StaleJobDetector, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    let mut failures = FailureTracker::new(3);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => match detector.check(Utc::now()).await {
                Ok(()) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        warn!("Stale job check failed: {}", e);
                    }
                }
            }
        }
    }
}
