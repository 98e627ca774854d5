//! API route definitions.

use super::state::AppState;
use crate::dispatch::RunRequest;
use crate::storage::{Project, StoreError};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

const DEFAULT_LIST_LIMIT: usize = 50;

type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects))
        .route("/projects/{id}", get(get_project).put(put_project))
        .route("/runs", get(list_runs).post(create_run))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/logs", get(run_logs))
}

fn error_json(code: StatusCode, message: impl Into<String>) -> ApiError {
    (code, Json(json!({ "error": message.into() })))
}

fn store_error(e: anyhow::Error) -> ApiError {
    let code = match e.downcast_ref::<StoreError>() {
        Some(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Some(StoreError::Invalid { .. }) => StatusCode::BAD_REQUEST,
        Some(StoreError::IllegalTransition { .. }) => StatusCode::CONFLICT,
        None => {
            error!(error = %e, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_json(code, format!("{:#}", e))
}

fn not_found(kind: &str, id: &str) -> ApiError {
    error_json(StatusCode::NOT_FOUND, format!("{} '{}' not found", kind, id))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

async fn list_projects(State(state): State<AppState>) -> ApiResult {
    let projects = state.projects.list_projects().map_err(store_error)?;
    Ok(Json(json!({ "data": projects, "meta": { "total": projects.len() } })))
}

async fn get_project(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.projects.get_project(&id).map_err(store_error)? {
        Some(project) => Ok(Json(json!({ "data": project }))),
        None => Err(not_found("project", &id)),
    }
}

/// Everything but the id, which comes from the path.
#[derive(Debug, Deserialize)]
struct ProjectBody {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    color: String,
    repository: String,
    default_target: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn put_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProjectBody>,
) -> ApiResult {
    let project = Project {
        id,
        name: body.name,
        description: body.description,
        color: body.color,
        repository: body.repository,
        default_target: body.default_target,
        tags: body.tags,
    };
    state.projects.upsert_project(&project).map_err(store_error)?;
    Ok(Json(json!({ "data": project })))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

async fn create_run(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let run = state.dispatcher.request(req).map_err(store_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": run,
            "meta": { "logs": format!("/api/v1/runs/{}/logs", run.id) }
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    project: Option<String>,
    limit: Option<usize>,
}

async fn list_runs(State(state): State<AppState>, Query(params): Query<ListParams>) -> ApiResult {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let runs = state
        .runs
        .list_runs(params.project.as_deref(), limit)
        .map_err(store_error)?;
    Ok(Json(json!({ "data": runs, "meta": { "total": runs.len() } })))
}

async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.runs.get_run(&id).map_err(store_error)? {
        Some(detail) => Ok(Json(json!({ "data": detail }))),
        None => Err(not_found("run", &id)),
    }
}

#[derive(Debug, Deserialize)]
struct LogParams {
    #[serde(default)]
    offset: usize,
}

async fn run_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LogParams>,
) -> ApiResult {
    let run = state
        .runs
        .find_run(&id)
        .map_err(store_error)?
        .ok_or_else(|| not_found("run", &id))?;
    let chunk = state.logs.read(&id, params.offset);
    Ok(Json(json!({
        "data": chunk,
        "meta": { "status": run.status, "offset": params.offset }
    })))
}
