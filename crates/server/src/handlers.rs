//! Event ingestion and query handlers (all behind the API key middleware)

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sphere_core::{EventId, NewEvent, StoredEvent};
use std::collections::BTreeMap;

use crate::error::ApiError;
use crate::query::{FilterParams, RecentParams};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Created {
    pub status: &'static str,
    pub id: EventId,
}

#[derive(Debug, Serialize)]
pub struct BatchCreated {
    pub status: &'static str,
    pub ids: Vec<EventId>,
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::MalformedBody(e.to_string()))
}

/// POST /log
pub async fn submit_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let payload = parse_body(&body)?;
    let event = NewEvent::from_json(&payload, state.config.summary_max)?;
    let stored = state.store.insert(event, Utc::now())?;

    tracing::info!(id = %stored.id, source = %stored.source, level = %stored.level, "event stored");
    Ok((
        StatusCode::CREATED,
        Json(Created {
            status: "ok",
            id: stored.id,
        }),
    ))
}

/// POST /logs/batch: all-or-nothing
pub async fn submit_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<BatchCreated>), ApiError> {
    let payload = parse_body(&body)?;
    let events = NewEvent::batch_from_json(&payload, state.config.summary_max)?;
    let stored = state.store.insert_batch(events, Utc::now())?;

    tracing::info!(count = stored.len(), "event batch stored");
    Ok((
        StatusCode::CREATED,
        Json(BatchCreated {
            status: "ok",
            ids: stored.into_iter().map(|e| e.id).collect(),
        }),
    ))
}

/// GET /logs/recent?limit=N
pub async fn recent_events(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    let limit = params.limit(state.config.recent_max)?;
    Ok(Json(state.store.recent(limit)?))
}

/// GET /logs/query?level=&source=&from=&to=&file_hash=
pub async fn query_events(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    let filter = params.to_filter()?;
    Ok(Json(state.store.query(&filter)?))
}

/// GET /logs/:id
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredEvent>, ApiError> {
    let id = EventId::parse(&id)?;
    state.store.get(&id)?.map(Json).ok_or(ApiError::NotFound)
}

/// GET /categories
pub async fn categories(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, u64>>, ApiError> {
    Ok(Json(state.store.category_counts()?))
}
