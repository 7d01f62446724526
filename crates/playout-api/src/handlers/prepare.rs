//! Prepare job handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use playout_models::{ConferenceId, ConferencePrepareJob, PrepareJobId, VideoRenderJob};

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

/// A prepare job with its render jobs.
#[derive(Debug, Serialize)]
pub struct PrepareJobResponse {
    pub job: ConferencePrepareJob,
    pub render_jobs: Vec<VideoRenderJob>,
}

/// POST /api/conferences/:conference_id/prepare
///
/// Returns:
/// - 202: Prepare job created (it may already be terminal)
/// - 404: Unknown conference
/// - 409: The conference already has an active prepare job
pub async fn start_prepare(
    State(state): State<AppState>,
    Path(conference_id): Path<String>,
) -> ApiResult<(StatusCode, Json<PrepareJobResponse>)> {
    let conference_id = ConferenceId::from(conference_id);
    let outcome = state.orchestrator.prepare(&conference_id).await.inspect_err(|_| {
        metrics::record_prepare_request("rejected");
    })?;
    metrics::record_prepare_request("accepted");

    info!(
        conference_id = %conference_id,
        prepare_job_id = %outcome.job.id,
        status = %outcome.job.status,
        render_jobs = outcome.render_jobs.len(),
        "Prepare job started"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(PrepareJobResponse {
            job: outcome.job,
            render_jobs: outcome.render_jobs,
        }),
    ))
}

/// GET /api/conferences/:conference_id/prepare-jobs
pub async fn list_prepare_jobs(
    State(state): State<AppState>,
    Path(conference_id): Path<String>,
) -> ApiResult<Json<Vec<ConferencePrepareJob>>> {
    let conference_id = ConferenceId::from(conference_id);
    state.store.get_conference(&conference_id).await?;
    let jobs = state.store.list_prepare_jobs(&conference_id).await?;
    Ok(Json(jobs))
}

/// GET /api/prepare-jobs/:job_id
pub async fn get_prepare_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<PrepareJobResponse>> {
    let job_id = PrepareJobId::from(job_id);
    let job = state.store.get_prepare_job(&job_id).await?;
    let render_jobs = state.store.list_render_jobs(&job_id).await?;
    Ok(Json(PrepareJobResponse { job, render_jobs }))
}
