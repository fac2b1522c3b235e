//! Identity public-key lookup.
//!
//! The relay is trusted to return registered identity keys honestly; the
//! clients' signature verification is what makes silent substitution
//! detectable.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use cl_proto::api::PublicKeyResponse;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::AppState;

/// `GET /users/{id}/public-key`
pub async fn public_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<PublicKeyResponse>, ApiError> {
    authenticate(&state, &headers)?;
    let user = state
        .storage
        .user_by_id(&user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(PublicKeyResponse {
        public_key: user.public_key,
        username: user.username,
        algorithm: user.algorithm,
    }))
}
