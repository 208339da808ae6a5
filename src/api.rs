//! HTTP control and observation surface over a running [`PollEngine`].
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::activity::{ActivityEntry, ActivityFilter, Level};
use crate::model::{IssueItem, SourceId};
use crate::poll::scheduler::PollEngine;
use crate::poll::status::{PollStatus, QueryOutcome};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PollEngine>,
}

impl AppState {
    pub fn new(engine: Arc<PollEngine>) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status_all))
        .route("/status/{id}", get(status_one))
        .route("/status/{id}/reset", post(reset_counter))
        .route("/poll-now", post(poll_now))
        .route("/restart", post(restart))
        .route("/issues", get(list_issues))
        .route("/issues/read", post(mark_read))
        .route("/issues/read-all", post(mark_all_read))
        .route("/activity", get(activity).delete(clear_activity))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Internal failures surface as 500 with the error chain in the body.
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self.0, "api request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", self.0)).into_response()
    }
}

fn parse_id(raw: &str) -> Result<SourceId, Response> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid source id '{raw}'")).into_response())
}

#[derive(Serialize)]
struct StatusOut {
    running: bool,
    sources: Vec<PollStatus>,
}

async fn status_all(State(state): State<AppState>) -> Json<StatusOut> {
    Json(StatusOut {
        running: state.engine.is_running(),
        sources: state.engine.statuses(),
    })
}

async fn status_one(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.engine.status(id) {
        Some(s) => Json(s).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn reset_counter(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(r) => return r,
    };
    if state.engine.reset_change_counter(id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

#[derive(Serialize)]
struct PollNowOut {
    source_id: SourceId,
    change_count: u64,
    error: Option<String>,
    queries: Vec<QueryOutcome>,
}

async fn poll_now(State(state): State<AppState>) -> Json<Vec<PollNowOut>> {
    let results = state.engine.poll_now().await;
    Json(
        results
            .into_iter()
            .map(|(source_id, r)| PollNowOut {
                source_id,
                change_count: r.change_count,
                error: r.error,
                queries: r.queries,
            })
            .collect(),
    )
}

async fn restart(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    state.engine.restart();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "running": state.engine.is_running() })),
    )
}

async fn list_issues(State(state): State<AppState>) -> Result<Json<Vec<IssueItem>>, ApiError> {
    Ok(Json(state.engine.list_issues()?))
}

#[derive(Serialize)]
struct UpdatedOut {
    updated: usize,
}

async fn mark_read(
    State(state): State<AppState>,
    Json(ids): Json<Vec<String>>,
) -> Result<Json<UpdatedOut>, ApiError> {
    let updated = state.engine.mark_read(&ids)?;
    Ok(Json(UpdatedOut { updated }))
}

async fn mark_all_read(State(state): State<AppState>) -> Result<Json<UpdatedOut>, ApiError> {
    let updated = state.engine.mark_all_read()?;
    Ok(Json(UpdatedOut { updated }))
}

#[derive(Deserialize)]
struct ActivityParams {
    level: Option<String>,
    source: Option<String>,
    limit: Option<usize>,
}

async fn activity(State(state): State<AppState>, Query(q): Query<ActivityParams>) -> Response {
    let level = match q.level.as_deref().map(str::parse::<Level>).transpose() {
        Ok(l) => l,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    let source_id = match q.source.as_deref().map(parse_id).transpose() {
        Ok(s) => s,
        Err(r) => return r,
    };
    let entries: Vec<ActivityEntry> = state.engine.activity().entries(ActivityFilter {
        level,
        source_id,
        limit: q.limit,
    });
    Json(entries).into_response()
}

async fn clear_activity(State(state): State<AppState>) -> StatusCode {
    state.engine.activity().clear();
    StatusCode::NO_CONTENT
}
