//! Gallery sharing and album handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_auth::AuthBearer;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::block_in_place;

use super::auth::require_user;
use super::error::{ApiError, Result};
use super::state::AppState;

#[derive(Deserialize)]
pub struct ShareRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct AlbumRequest {
    pub name: String,
}

/// `POST /shares` — share the caller's gallery with another registered
/// user. Sharing twice is a no-op.
pub async fn create_share(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Json(req): Json<ShareRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let owner_id = require_user(&state, &token)?;

    let email = req.email.trim().to_lowercase();
    let target = block_in_place(|| state.db.find_user_by_email(&email))?
        .ok_or_else(|| ApiError::not_found("No user with that email."))?;
    if target.id == owner_id {
        return Err(ApiError::bad_request("Cannot share a gallery with yourself."));
    }

    block_in_place(|| state.db.create_share(owner_id, target.id))?;
    tracing::info!(owner_id, shared_with = target.id, "gallery shared");
    Ok((StatusCode::CREATED, Json(json!({ "sharedWith": target.email }))))
}

/// `GET /shares` — galleries shared with the caller
pub async fn list_shares(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let shares = block_in_place(|| state.db.shares_for_user(user_id))?;

    let payload: Vec<Value> = shares
        .iter()
        .map(|s| {
            json!({
                "userId": s.owner_id,
                "email": s.owner_email,
                "name": s.owner_name,
            })
        })
        .collect();
    Ok(Json(json!({ "shares": payload })))
}

/// `POST /albums`
pub async fn create_album(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Json(req): Json<AlbumRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let user_id = require_user(&state, &token)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Album name is required."));
    }

    let album_id = block_in_place(|| state.db.create_album(user_id, name))?;
    Ok((StatusCode::CREATED, Json(json!({ "id": album_id, "name": name }))))
}

/// `GET /albums`
pub async fn list_albums(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let albums = block_in_place(|| state.db.list_albums(user_id))?;

    let payload: Vec<Value> = albums
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "name": a.name,
                "createdAt": a.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "albums": payload })))
}
