//! Title search, tag search and shared-gallery listings.
//!
//! Searches that find nothing succeed with an empty list; absence is not
//! an error anywhere on this surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use axum_auth::AuthBearer;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::block_in_place;

use super::auth::require_user;
use super::error::{ApiError, Result};
use super::state::AppState;

#[derive(Deserialize)]
pub struct TitleQuery {
    pub query: Option<String>,
}

#[derive(Deserialize)]
pub struct TagsQuery {
    pub tags: Option<String>,
}

/// `GET /search?query=` — every whitespace-separated term must appear in
/// the title, case-insensitive
pub async fn by_title(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Query(query): Query<TitleQuery>,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let terms = search_terms(query.query.as_deref())?;
    let images = block_in_place(|| state.db.search_by_title(user_id, &terms))?;
    Ok(Json(json!({ "images": images })))
}

/// `GET /images/by-tags?tags=a,b` — any-tag match
pub async fn by_tags(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Query(query): Query<TagsQuery>,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let tags = tag_list(query.tags.as_deref())?;
    let images = block_in_place(|| state.db.images_by_tags(user_id, &tags))?;
    Ok(Json(json!({ "images": images })))
}

/// `GET /shared/{user_id}/search?query=` — title search over a gallery
/// that was shared with the caller
pub async fn shared_by_title(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(owner_id): Path<i64>,
    Query(query): Query<TitleQuery>,
) -> Result<Json<Value>> {
    let viewer_id = require_user(&state, &token)?;
    ensure_shared(&state, owner_id, viewer_id)?;

    let terms = search_terms(query.query.as_deref())?;
    let images = block_in_place(|| state.db.search_by_title(owner_id, &terms))?;
    Ok(Json(json!({ "images": images })))
}

/// `GET /shared/{user_id}/images/by-tags?tags=a,b`
pub async fn shared_by_tags(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(owner_id): Path<i64>,
    Query(query): Query<TagsQuery>,
) -> Result<Json<Value>> {
    let viewer_id = require_user(&state, &token)?;
    ensure_shared(&state, owner_id, viewer_id)?;

    let tags = tag_list(query.tags.as_deref())?;
    let images = block_in_place(|| state.db.images_by_tags(owner_id, &tags))?;
    Ok(Json(json!({ "images": images })))
}

fn search_terms(raw: Option<&str>) -> Result<Vec<String>> {
    let raw = raw
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("A search query is required."))?;
    Ok(raw.split_whitespace().map(str::to_lowercase).collect())
}

fn tag_list(raw: Option<&str>) -> Result<Vec<String>> {
    let tags: Vec<String> = raw
        .unwrap_or("")
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if tags.is_empty() {
        return Err(ApiError::bad_request("At least one tag is required."));
    }
    Ok(tags)
}

/// `GET /tags` — own tags plus tags of galleries shared with the caller
pub async fn tags(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let tags = block_in_place(|| state.db.visible_tags(user_id))?;
    Ok(Json(json!({ "tags": tags })))
}

/// `GET /shared/{user_id}/images` — a sharer's full gallery listing
pub async fn shared_images(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(owner_id): Path<i64>,
) -> Result<Json<Value>> {
    let viewer_id = require_user(&state, &token)?;
    ensure_shared(&state, owner_id, viewer_id)?;

    let images = block_in_place(|| state.db.all_image_keys(owner_id))?;
    Ok(Json(json!({ "images": images })))
}

/// 403 unless the owner shared their gallery with the viewer.
pub(super) fn ensure_shared(state: &AppState, owner_id: i64, viewer_id: i64) -> Result<()> {
    if block_in_place(|| state.db.can_view_gallery(owner_id, viewer_id))? {
        Ok(())
    } else {
        Err(ApiError::forbidden("This gallery is not shared with you."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_terms_are_lowercased_and_split() {
        assert_eq!(
            search_terms(Some("  Sunset  Beach ")).unwrap(),
            vec!["sunset".to_string(), "beach".to_string()]
        );
        assert!(search_terms(Some("   ")).is_err());
        assert!(search_terms(None).is_err());
    }

    #[test]
    fn tag_list_rejects_empty_input() {
        assert_eq!(
            tag_list(Some("sea, sun ,")).unwrap(),
            vec!["sea".to_string(), "sun".to_string()]
        );
        assert!(tag_list(Some(",,")).is_err());
        assert!(tag_list(None).is_err());
    }
}
