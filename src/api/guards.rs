use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::api::errors::ApiError;
use crate::core::state::AppState;

pub(crate) const API_KEY_HEADER: &str = "x-api-key";

/// Operator access. Passes every request when `ADMIN_API_KEY` is unset.
pub(crate) struct AdminKey;

#[async_trait]
impl FromRequestParts<AppState> for AdminKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let Some(expected) = app_state.settings().api().admin_api_key.as_deref() else {
            return Ok(AdminKey);
        };

        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("Missing API key"))?;

        if keys_match(provided, expected) {
            Ok(AdminKey)
        } else {
            Err(ApiError::Unauthorized("Invalid API key"))
        }
    }
}

/// Compares digests so the check does not short-circuit on the first differing byte.
fn keys_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided.iter().zip(expected.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
