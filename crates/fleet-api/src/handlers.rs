//! API request handlers

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use fleet_core::{EntityId, LivenessStatus, PositionSample};
use fleet_tracker::{EntityView, PresentationSnapshot, SelectionChange};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub api: String,
    pub upstream: String,
    pub upstream_url: String,
    pub viewer_clients: usize,
    pub entities: usize,
    pub selected: usize,
    pub zoom: u8,
    /// Sequence number of the latest snapshot, if a tick has run
    pub snapshot_seq: Option<u64>,
    pub uptime_seconds: i64,
}

#[derive(Serialize)]
pub struct EntityListResponse {
    pub entities: Vec<EntityView>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub id: EntityId,
    /// Oldest first
    pub samples: Vec<PositionSample>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct SelectionResponse {
    pub selected: Vec<EntityId>,
}

#[derive(Serialize)]
pub struct ViewResponse {
    pub zoom: u8,
}

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct EntityQuery {
    pub status: Option<LivenessStatus>,
    pub subscribed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub ids: Vec<EntityId>,
}

#[derive(Debug, Deserialize)]
pub struct ViewRequest {
    pub zoom: u8,
}

// ============================================================================
// HEALTH & STATUS
// ============================================================================

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

pub async fn system_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let tracker = &state.tracker;

    Json(StatusResponse {
        api: "running".to_string(),
        upstream: state.connection_state().to_string(),
        upstream_url: state.config.ingest.url.clone(),
        viewer_clients: state.hub.client_count(),
        entities: tracker.entity_count(),
        selected: tracker.selection().len(),
        zoom: tracker.zoom(),
        snapshot_seq: state.latest_snapshot().map(|s| s.seq),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.metrics.set_viewer_connections(state.hub.client_count());
    let body = state.metrics.export()?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

// ============================================================================
// SNAPSHOT & ENTITIES
// ============================================================================

pub async fn get_snapshot(State(state): State<AppState>) -> ApiResult<Json<PresentationSnapshot>> {
    let snapshot = state
        .latest_snapshot()
        .ok_or_else(|| ApiError::unavailable("no snapshot rendered yet"))?;

    Ok(Json(snapshot.as_ref().clone()))
}

pub async fn list_entities(
    State(state): State<AppState>,
    Query(query): Query<EntityQuery>,
) -> Json<EntityListResponse> {
    let entities: Vec<EntityView> = state
        .tracker
        .snapshot_at(Utc::now())
        .into_iter()
        .filter(|e| query.status.is_none_or(|status| e.status == status))
        .filter(|e| query.subscribed.is_none_or(|subscribed| e.subscribed == subscribed))
        .collect();

    let total = entities.len();
    Json(EntityListResponse { entities, total })
}

pub async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EntityView>> {
    state
        .tracker
        .entity(&EntityId::new(id.as_str()))
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Entity {} not found", id)))
}

pub async fn get_entity_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HistoryResponse>> {
    let id = EntityId::new(id);
    let samples = state
        .tracker
        .history(&id)
        .ok_or_else(|| ApiError::not_found(format!("Entity {} not found", id)))?;

    let total = samples.len();
    Ok(Json(HistoryResponse { id, samples, total }))
}

pub async fn remove_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = EntityId::new(id);
    if state.commands.remove(&id) {
        debug!(entity = %id, "Entity removed via API");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Entity {} not found", id)))
    }
}

// ============================================================================
// VIEWER CONTROLS
// ============================================================================

pub async fn get_selection(State(state): State<AppState>) -> Json<SelectionResponse> {
    Json(SelectionResponse {
        selected: state.tracker.selection(),
    })
}

pub async fn set_selection(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> ApiResult<Json<SelectionChange>> {
    if request.ids.iter().any(EntityId::is_blank) {
        return Err(ApiError::bad_request("entity ids must not be blank"));
    }

    Ok(Json(state.commands.select(request.ids)))
}

pub async fn set_view(
    State(state): State<AppState>,
    Json(request): Json<ViewRequest>,
) -> Json<ViewResponse> {
    Json(ViewResponse {
        zoom: state.commands.set_zoom(request.zoom),
    })
}

// ============================================================================
// TESTS
// ============================================================================
