//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    create_transition, delete_transition, get_prepare_job, get_room, get_transition, health, list_executed_transitions,
    list_prepare_jobs, list_rooms, list_transitions, ready, start_prepare, update_transition,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let prepare_routes = Router::new()
        .route("/conferences/:conference_id/prepare", post(start_prepare))
        .route("/conferences/:conference_id/prepare-jobs", get(list_prepare_jobs))
        .route("/prepare-jobs/:job_id", get(get_prepare_job));

    let schedule_routes = Router::new()
        .route("/rooms", get(list_rooms))
        .route("/rooms/:room_id", get(get_room))
        .route("/rooms/:room_id/transitions", get(list_transitions))
        .route("/rooms/:room_id/executed-transitions", get(list_executed_transitions))
        .route("/transitions", post(create_transition))
        .route(
            "/transitions/:transition_id",
            get(get_transition).put(update_transition).delete(delete_transition),
        );

    let api_routes = Router::new()
        .merge(prepare_routes)
        .merge(schedule_routes)
        .layer(middleware::from_fn(metrics_middleware));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(middleware::from_fn(request_logging))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
