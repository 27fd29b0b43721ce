//! HTTP surface: NDVI tile/image proxy for map clients plus a small
//! operator API over the sync scheduler and NDVI history.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::SyncError;
use crate::model::{NdviAcquisition, SyncRunStats};
use crate::provider::SatelliteProvider;
use crate::scheduler::{RunOutcome, SyncScheduler};
use crate::store::FieldStore;
use crate::tiles::{TileProxy, TileRequest};

const DEFAULT_HISTORY_LIMIT: usize = 30;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn SatelliteProvider>,
    pub store: Arc<dyn FieldStore>,
    pub scheduler: Arc<SyncScheduler>,
    pub tiles: Arc<TileProxy>,
    pub cache_max_age_secs: u64,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("request failed: {self}");
        }
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    let imagery = Router::new()
        .route("/ndvi-tile/{field_id}/{z}/{x}/{y}", get(ndvi_tile))
        .route("/ndvi-image/{field_id}", get(ndvi_image))
        .layer(cors);

    Router::new()
        .merge(imagery)
        .route("/sync/status", get(sync_status))
        .route("/sync/run", post(sync_run))
        .route("/fields/{field_id}/ndvi-history", get(ndvi_history))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ndvi_tile(
    State(state): State<AppState>,
    Path((field_id, z, x, y)): Path<(String, u32, u32, String)>,
) -> Result<Response, SyncError> {
    let y = match y.strip_suffix(".png").unwrap_or(&y).parse::<u32>() {
        Ok(y) => y,
        Err(_) => return Ok((StatusCode::BAD_REQUEST, "invalid tile row").into_response()),
    };
    proxy(&state, &field_id, TileRequest::Tile { z, x, y }).await
}

async fn ndvi_image(
    State(state): State<AppState>,
    Path(field_id): Path<String>,
) -> Result<Response, SyncError> {
    proxy(&state, &field_id, TileRequest::Image).await
}

async fn proxy(state: &AppState, field_id: &str, request: TileRequest) -> Result<Response, SyncError> {
    let asset = state.tiles.fetch(field_id, request).await?;
    let cache_control = format!("public, max-age={}", state.cache_max_age_secs);
    Ok((
        [
            (header::CONTENT_TYPE, asset.content_type),
            (header::CACHE_CONTROL, cache_control),
        ],
        Body::from_stream(asset.body),
    )
        .into_response())
}

async fn sync_status(State(state): State<AppState>) -> Json<SyncRunStats> {
    Json(state.scheduler.stats())
}

async fn sync_run(State(state): State<AppState>) -> Result<Response, SyncError> {
    match state.scheduler.force_sync().await? {
        RunOutcome::Completed(stats) => Ok(Json(stats).into_response()),
        RunOutcome::AlreadyRunning => {
            Ok((StatusCode::CONFLICT, "sync run already in progress").into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn ndvi_history(
    State(state): State<AppState>,
    Path(field_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<NdviAcquisition>>, SyncError> {
    if state.store.get_field_by_id(&field_id).await?.is_none() {
        return Err(SyncError::NotFound(format!("field {field_id}")));
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let history = state.store.get_ndvi_history(&field_id, limit).await?;
    Ok(Json(history))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "provider": state.provider.kind().to_string(),
        "configured": state.provider.is_configured(),
        "store": state.store.backend_name(),
    }))
}
