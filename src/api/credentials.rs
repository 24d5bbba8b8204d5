use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::AdminKey;
use crate::core::state::AppState;
use crate::schemas::credential::{CredentialQuery, CredentialResponse};

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/", get(get_credential))
}

async fn get_credential(
    _admin: AdminKey,
    State(state): State<AppState>,
    Query(query): Query<CredentialQuery>,
) -> Result<Json<CredentialResponse>, ApiError> {
    query.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let student = state
        .services()
        .entities()
        .credential(&query.course, &query.email)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch lab credential"))?;

    let Some(student) = student else {
        return Err(ApiError::NotFound(format!(
            "No credential for {} in {}",
            query.email, query.course
        )));
    };

    tracing::info!(course = %query.course, email = %student.email, "Lab credential issued");
    Ok(Json(CredentialResponse::new(query.course, student)))
}
