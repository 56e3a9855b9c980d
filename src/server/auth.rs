//! Registration, login and bearer-token sessions.
//!
//! Passwords are stored as salted SHA-256 digests; login issues a random
//! bearer token whose digest lands in the `sessions` table with a
//! configurable expiry. Handlers resolve the token back to a user id with
//! [`require_user`] and scope every query by it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_auth::AuthBearer;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::task::block_in_place;

use super::error::{ApiError, Result};
use super::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("A valid email is required."));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request(
            "Password must be at least 8 characters.",
        ));
    }

    if block_in_place(|| state.db.email_exists(&email))? {
        return Err(ApiError::conflict("Email is already registered."));
    }

    let salt = random_hex(16);
    let hash = hash_password(&req.password, &salt);
    let user_id =
        block_in_place(|| state.db.create_user(&email, req.name.trim(), &hash, &salt))?;

    tracing::info!(user_id, "user registered");
    Ok((StatusCode::CREATED, Json(json!({ "id": user_id }))))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>> {
    let email = req.email.trim().to_lowercase();
    let user = block_in_place(|| state.db.find_user_by_email(&email))?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password."))?;

    if hash_password(&req.password, &user.password_salt) != user.password_hash {
        return Err(ApiError::unauthorized("Invalid email or password."));
    }

    let token = random_token();
    let ttl = Duration::minutes(state.config.auth.session_ttl_minutes);
    let expires_at = Utc::now() + ttl;
    block_in_place(|| state.db.create_session(&digest(&token), user.id, expires_at))?;

    Ok(Json(json!({
        "token": token,
        "expiresIn": ttl.num_seconds(),
    })))
}

/// `GET /me` — the authenticated account's own details
pub async fn me(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let user = block_in_place(|| state.db.get_user(user_id))?
        .ok_or_else(|| ApiError::not_found("User not found."))?;

    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
    })))
}

/// Resolve the bearer token to a user id, or fail with 401.
pub fn require_user(state: &AppState, AuthBearer(token): &AuthBearer) -> Result<i64> {
    let user_id = block_in_place(|| state.db.session_user(&digest(token), Utc::now()))?;
    user_id.ok_or_else(|| ApiError::unauthorized("Invalid or expired token."))
}

/// Salted password digest, hex-encoded
fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 digest of a token, hex-encoded. Only digests are stored, so a
/// leaked database does not leak live tokens.
fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_different_salt_differs() {
        let a = hash_password("hunter22", "salt-a");
        let b = hash_password("hunter22", "salt-b");
        assert_ne!(a, b);
        assert_eq!(a, hash_password("hunter22", "salt-a"));
    }

    #[test]
    fn tokens_are_unique_and_urlsafe() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
