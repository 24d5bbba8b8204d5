use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::AdminKey;
use crate::core::state::AppState;
use crate::engine::{EngineError, InstanceSnapshot, OrchestrationKind};
use crate::schemas::orchestration::{StartGraderQuery, StartResponse};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/grader", get(start_grader).post(start_grader))
        .route("/daily", get(start_daily).post(start_daily))
        .route("/:id", get(instance_status))
        .route("/:id/restart", post(restart_instance))
}

async fn start_grader(
    _admin: AdminKey,
    State(state): State<AppState>,
    Query(query): Query<StartGraderQuery>,
) -> (StatusCode, Json<StartResponse>) {
    let id = state.engine().schedule(OrchestrationKind::ScheduledGrader, query.ignore_schedule);
    tracing::info!(instance_id = %id, ignore_schedule = query.ignore_schedule, "Started grader orchestration");
    accepted(&state, id)
}

async fn start_daily(
    _admin: AdminKey,
    State(state): State<AppState>,
) -> (StatusCode, Json<StartResponse>) {
    let id = state.engine().schedule(OrchestrationKind::DailyGrader, true);
    tracing::info!(instance_id = %id, "Started daily orchestration");
    accepted(&state, id)
}

async fn instance_status(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceSnapshot>, ApiError> {
    state
        .engine()
        .status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Orchestration instance {id} not found")))
}

async fn restart_instance(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    match state.engine().restart(&id) {
        Ok(()) => Ok(accepted(&state, id)),
        Err(err @ EngineError::NotFound(_)) => Err(ApiError::NotFound(err.to_string())),
        Err(err @ EngineError::NotRestartable { .. }) => Err(ApiError::Conflict(err.to_string())),
    }
}

fn accepted(state: &AppState, id: String) -> (StatusCode, Json<StartResponse>) {
    let api = state.settings().api();
    let status_query_get_uri =
        format!("{}{}/orchestrations/{id}", api.public_base_url.trim_end_matches('/'), api.api_v1_str);
    (StatusCode::ACCEPTED, Json(StartResponse { id, status_query_get_uri }))
}
