//! Transition schedule handlers.
//!
//! Every successful edit publishes a schedule change so the room's scheduler
//! re-reads its queue instead of acting on a stale copy.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use playout_models::{BroadcastContentItemId, ConferenceId, Event, EventId, RoomId, Transition, TransitionId};
use playout_queue::ScheduleChange;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransitionRequest {
    #[validate(length(min = 1, max = 128))]
    pub event_id: String,
    #[validate(length(min = 1, max = 128))]
    pub broadcast_content_id: String,
    #[validate(length(min = 1, max = 128))]
    pub fallback_broadcast_content_id: Option<String>,
    pub time: DateTime<Utc>,
}

/// Full replacement of the mutable fields of a pending transition.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTransitionRequest {
    #[validate(length(min = 1, max = 128))]
    pub broadcast_content_id: String,
    #[validate(length(min = 1, max = 128))]
    pub fallback_broadcast_content_id: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TransitionView {
    #[serde(flatten)]
    pub transition: Transition,
    pub executed: bool,
}

/// GET /api/rooms/:room_id/transitions
///
/// The room's schedule in execution order.
pub async fn list_transitions(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Vec<TransitionView>>> {
    let room_id = RoomId::from(room_id);
    state.store.get_room(&room_id).await?;

    let executed: HashSet<TransitionId> = state
        .store
        .list_executed_transitions(&room_id)
        .await?
        .into_iter()
        .map(|e| e.transition_id)
        .collect();
    let views = state
        .store
        .list_transitions_for_room(&room_id)
        .await?
        .into_iter()
        .map(|t| TransitionView {
            executed: executed.contains(&t.id),
            transition: t,
        })
        .collect();
    Ok(Json(views))
}

/// GET /api/transitions/:transition_id
pub async fn get_transition(
    State(state): State<AppState>,
    Path(transition_id): Path<String>,
) -> ApiResult<Json<TransitionView>> {
    let id = TransitionId::from(transition_id);
    let transition = state
        .store
        .get_transition(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("transition {id}")))?;
    let executed = state.store.is_transition_executed(&id).await?;
    Ok(Json(TransitionView { transition, executed }))
}

/// POST /api/transitions
///
/// Returns:
/// - 201: Transition scheduled
/// - 400: Invalid payload, unknown content, or time outside the event
/// - 404: Unknown event
pub async fn create_transition(
    State(state): State<AppState>,
    Json(req): Json<CreateTransitionRequest>,
) -> ApiResult<(StatusCode, Json<Transition>)> {
    req.validate()?;

    let event = state.store.get_event(&EventId::from(req.event_id)).await?;
    let primary = BroadcastContentItemId::from(req.broadcast_content_id);
    let fallback = req.fallback_broadcast_content_id.map(BroadcastContentItemId::from);
    check_schedulable(&state, &event, &primary, fallback.as_ref(), req.time).await?;

    let transition = Transition {
        id: TransitionId::new(),
        conference_id: event.conference_id.clone(),
        event_id: event.id.clone(),
        room_id: event.room_id.clone(),
        broadcast_content_id: primary,
        fallback_broadcast_content_id: fallback,
        time: req.time,
        created_at: Utc::now(),
    };
    state.store.upsert_transition(transition.clone()).await?;
    metrics::record_transition_edit("create");

    info!(
        transition_id = %transition.id,
        room_id = %transition.room_id,
        time = %transition.time,
        "Transition scheduled"
    );
    state
        .notify(ScheduleChange::transition_upserted(transition.room_id.clone(), transition.id.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(transition)))
}

/// PUT /api/transitions/:transition_id
///
/// Returns 409 once the transition has been executed.
pub async fn update_transition(
    State(state): State<AppState>,
    Path(transition_id): Path<String>,
    Json(req): Json<UpdateTransitionRequest>,
) -> ApiResult<Json<Transition>> {
    req.validate()?;

    let id = TransitionId::from(transition_id);
    let existing = state
        .store
        .get_transition(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("transition {id}")))?;
    if state.store.is_transition_executed(&id).await? {
        return Err(ApiError::conflict(format!("transition {id} has already been executed")));
    }

    let event = state.store.get_event(&existing.event_id).await?;
    let primary = BroadcastContentItemId::from(req.broadcast_content_id);
    let fallback = req.fallback_broadcast_content_id.map(BroadcastContentItemId::from);
    check_schedulable(&state, &event, &primary, fallback.as_ref(), req.time).await?;

    let transition = Transition {
        broadcast_content_id: primary,
        fallback_broadcast_content_id: fallback,
        time: req.time,
        ..existing
    };
    state.store.upsert_transition(transition.clone()).await?;
    metrics::record_transition_edit("update");

    info!(transition_id = %id, room_id = %transition.room_id, "Transition updated");
    state
        .notify(ScheduleChange::transition_upserted(transition.room_id.clone(), id))
        .await;

    Ok(Json(transition))
}

/// DELETE /api/transitions/:transition_id
///
/// Returns 204, 404 for unknown ids and 409 once executed.
pub async fn delete_transition(
    State(state): State<AppState>,
    Path(transition_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = TransitionId::from(transition_id);
    let existing = state
        .store
        .get_transition(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("transition {id}")))?;

    if !state.store.delete_transition(&id).await? {
        return Err(ApiError::not_found(format!("transition {id}")));
    }
    metrics::record_transition_edit("delete");

    info!(transition_id = %id, room_id = %existing.room_id, "Transition deleted");
    state
        .notify(ScheduleChange::transition_deleted(existing.room_id, id))
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// A transition must fall inside its event and reference broadcast items of
/// the same conference.
async fn check_schedulable(
    state: &AppState,
    event: &Event,
    primary: &BroadcastContentItemId,
    fallback: Option<&BroadcastContentItemId>,
    time: DateTime<Utc>,
) -> ApiResult<()> {
    if time < event.start_time || time >= event.end_time() {
        return Err(ApiError::bad_request(format!(
            "time {} is outside event {} ({} to {})",
            time,
            event.id,
            event.start_time,
            event.end_time()
        )));
    }

    check_item(state, &event.conference_id, primary).await?;
    if let Some(fallback) = fallback {
        check_item(state, &event.conference_id, fallback).await?;
    }
    Ok(())
}

async fn check_item(state: &AppState, conference_id: &ConferenceId, id: &BroadcastContentItemId) -> ApiResult<()> {
    match state.store.get_broadcast_item(id).await? {
        Some(item) if &item.conference_id == conference_id => Ok(()),
        Some(_) => Err(ApiError::bad_request(format!(
            "broadcast content item {id} belongs to another conference"
        ))),
        None => Err(ApiError::bad_request(format!("unknown broadcast content item {id}"))),
    }
}
