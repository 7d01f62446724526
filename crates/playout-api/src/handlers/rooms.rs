//! Room handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use playout_models::{Event, ExecutedTransition, Room, RoomId};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RoomView {
    #[serde(flatten)]
    pub room: Room,
    pub events: Vec<Event>,
}

/// GET /api/rooms
pub async fn list_rooms(State(state): State<AppState>) -> ApiResult<Json<Vec<Room>>> {
    Ok(Json(state.store.list_rooms().await?))
}

/// GET /api/rooms/:room_id
pub async fn get_room(State(state): State<AppState>, Path(room_id): Path<String>) -> ApiResult<Json<RoomView>> {
    let room_id = RoomId::from(room_id);
    let room = state.store.get_room(&room_id).await?;
    let events = state.store.list_events_for_room(&room_id).await?;
    Ok(Json(RoomView { room, events }))
}

/// GET /api/rooms/:room_id/executed-transitions
///
/// The room's audit trail, oldest first.
pub async fn list_executed_transitions(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Vec<ExecutedTransition>>> {
    let room_id = RoomId::from(room_id);
    state.store.get_room(&room_id).await?;
    Ok(Json(state.store.list_executed_transitions(&room_id).await?))
}
