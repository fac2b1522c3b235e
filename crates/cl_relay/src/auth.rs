//! Account registration, login, and bearer-token authentication.
//!
//! Passwords are hashed at rest with argon2id. Tokens are opaque random
//! strings held in memory; sender identity on every protected route comes
//! from the token, never from the request body.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use base64::{engine::general_purpose::STANDARD, Engine};
use cl_crypto::identity::{import_public, SigningAlgorithm};
use cl_proto::api::{AuthResponse, LoginRequest, RegisterRequest, UserInfo};

use crate::error::ApiError;
use crate::AppState;

/// Hash a password using argon2id with a random salt.
fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// In-memory bearer-token table.
#[derive(Clone, Default)]
pub struct TokenTable {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.inner.lock().insert(token.clone(), user_id.to_string());
        token
    }

    pub fn lookup(&self, token: &str) -> Option<String> {
        self.inner.lock().get(token).cloned()
    }
}

/// Resolve the caller from the Authorization header.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = value.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    state.tokens.lookup(token).ok_or(ApiError::Unauthorized)
}

/// `POST /auth/register`
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::rejected("invalid-credentials", "username and password required"));
    }
    let Ok(algorithm) = SigningAlgorithm::parse(&req.algorithm) else {
        return Err(ApiError::rejected("invalid-algorithm", "unknown signing algorithm tag"));
    };
    // The relay serves this key to peers for signature verification; refuse
    // anything that does not parse under the declared tag.
    let spki_valid = STANDARD
        .decode(&req.public_key)
        .ok()
        .and_then(|der| import_public(algorithm, &der).ok())
        .is_some();
    if !spki_valid {
        return Err(ApiError::rejected("invalid-public-key", "public key does not parse under tag"));
    }
    if state
        .storage
        .user_by_username(&req.username)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .is_some()
    {
        state.audit.record(
            "auth_attempt",
            json!({"username": req.username, "kind": "register", "success": false}),
        );
        return Err(ApiError::rejected("username-taken", "username already registered"));
    }

    let user_id = Uuid::new_v4().to_string();
    let password_hash = hash_password(&req.password)?;
    state
        .storage
        .insert_user(
            &user_id,
            &req.username,
            &password_hash,
            &req.public_key,
            &req.algorithm,
        )
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state.audit.record(
        "auth_attempt",
        json!({"username": req.username, "kind": "register", "success": true}),
    );
    let token = state.tokens.issue(&user_id);
    Ok(Json(AuthResponse {
        token,
        user: UserInfo {
            id: user_id,
            username: req.username,
        },
    }))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .storage
        .user_by_username(&req.username)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let Some(user) = user.filter(|u| verify_password(&req.password, &u.password_hash)) else {
        state.audit.record(
            "auth_attempt",
            json!({"username": req.username, "kind": "login", "success": false}),
        );
        return Err(ApiError::Unauthorized);
    };

    state.audit.record(
        "auth_attempt",
        json!({"username": req.username, "kind": "login", "success": true}),
    );
    let token = state.tokens.issue(&user.id);
    Ok(Json(AuthResponse {
        token,
        user: UserInfo {
            id: user.id,
            username: user.username,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("mysecret").unwrap();
        assert!(verify_password("mysecret", &hash));
        assert!(!verify_password("wrongpassword", &hash));
    }

    #[test]
    fn tokens_resolve_to_their_user() {
        let table = TokenTable::new();
        let token = table.issue("user-1");
        assert_eq!(table.lookup(&token).as_deref(), Some("user-1"));
        assert!(table.lookup("bogus").is_none());
    }
}
