use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::store::models::{Feature, FeatureStatus, UpdateFields};

use super::{SharedState, SseMessage};

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

// ── View types ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeatureFilter {
    pub status: Option<String>,
    pub assigned: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub complete: usize,
    pub counts: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct ChangeProgress {
    pub change_id: String,
    pub complete: usize,
    pub total: usize,
    pub features: Vec<Feature>,
}

/// Counts per status for the status endpoint and the `status` command.
pub fn status_summary(features: &[Feature]) -> StatusSummary {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for f in features {
        *counts.entry(f.status.as_str().to_string()).or_insert(0) += 1;
    }
    StatusSummary {
        total: features.len(),
        complete: features
            .iter()
            .filter(|f| f.status == FeatureStatus::Complete)
            .count(),
        counts,
    }
}

/// Features grouped by change id with per-change progress. Hand-authored
/// features (empty change id) are omitted.
pub fn group_changes(features: &[Feature]) -> Vec<ChangeProgress> {
    let mut groups: BTreeMap<String, Vec<Feature>> = BTreeMap::new();
    for f in features {
        if f.openspec_change_id.is_empty() {
            continue;
        }
        groups
            .entry(f.openspec_change_id.clone())
            .or_default()
            .push(f.clone());
    }
    groups
        .into_iter()
        .map(|(change_id, mut features)| {
            features.sort_by_key(|f| f.openspec_task_group);
            ChangeProgress {
                complete: features
                    .iter()
                    .filter(|f| f.status == FeatureStatus::Complete)
                    .count(),
                total: features.len(),
                change_id,
                features,
            }
        })
        .collect()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/features", get(list_features))
        .route(
            "/api/features/:id",
            get(get_feature).patch(patch_feature),
        )
        .route("/api/status", get(get_status))
        .route("/api/openspec/changes", get(get_changes))
        .route("/api/config", get(get_config))
        .route("/api/sessions", get(get_sessions))
        .route("/api/events", get(sse_events))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_features(
    State(state): State<SharedState>,
    Query(filter): Query<FeatureFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match filter.status.as_deref() {
        Some(raw) => Some(FeatureStatus::from_str(raw).map_err(ApiError::BadRequest)?),
        None => None,
    };
    let features = state
        .db
        .call(move |db| db.list_features(status, filter.assigned.as_deref()))
        .await?;
    Ok(Json(features))
}

async fn get_feature(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let feature = state
        .db
        .call(move |db| db.get_feature(&lookup))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Feature {} not found", id)))?;
    Ok(Json(feature))
}

async fn patch_feature(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(fields): Json<UpdateFields>,
) -> Result<impl IntoResponse, ApiError> {
    if fields.is_empty() {
        return Err(ApiError::BadRequest("No updatable fields in body".into()));
    }
    let lookup = id.clone();
    let updated = state
        .db
        .call(move |db| {
            if db.get_feature(&lookup)?.is_none() {
                return Ok(None);
            }
            db.update_feature(&lookup, &fields).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Feature {} not found", id)))?;

    if let Ok(data) = serde_json::to_string(&updated) {
        let _ = state.tx.send(SseMessage {
            event: "feature-updated",
            data,
        });
    }
    Ok(Json(updated))
}

async fn get_status(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let features = state.db.call(|db| db.list_features(None, None)).await?;
    Ok(Json(status_summary(&features)))
}

async fn get_changes(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let features = state.db.call(|db| db.list_features(None, None)).await?;
    Ok(Json(group_changes(&features)))
}

async fn get_config(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let pairs = state.db.call(|db| db.config_all()).await?;
    let map: BTreeMap<String, String> = pairs.into_iter().collect();
    Ok(Json(map))
}

async fn get_sessions(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.db.call(|db| db.recent_sessions(50)).await?;
    Ok(Json(sessions))
}

/// SSE stream over the broadcast channel. A client that falls behind the
/// channel capacity is dropped (the lagged entries are skipped and the
/// stream continues); a closed connection unsubscribes it.
async fn sse_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(SseMessage { event, data }) => Some(Ok(Event::default().event(event).data(data))),
        Err(_lagged) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
