//! Face listing, preview and descriptor search handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use axum_auth::AuthBearer;
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::block_in_place;

use crate::db::FaceRecord;
use crate::faces::{self, matcher};

use super::auth::require_user;
use super::error::{ApiError, Result};
use super::images::visible_image;
use super::search::ensure_shared;
use super::state::AppState;

#[derive(TryFromMultipart)]
pub struct PreviewRequest {
    #[form_data(limit = "unlimited")]
    pub image: Option<FieldData<Bytes>>,
}

#[derive(Deserialize)]
pub struct FaceSearchRequest {
    pub descriptor: Vec<f32>,
}

/// `GET /faces` — every stored face of the caller, thumbnails included
pub async fn list(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let faces = block_in_place(|| state.db.list_faces_for_user(user_id))?;
    Ok(Json(json!({ "faces": face_payload(&faces) })))
}

/// `GET /images/{filename}/faces`
pub async fn for_image(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(filename): Path<String>,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let record = visible_image(&state, user_id, &filename)?;
    let faces = block_in_place(|| state.db.faces_for_image(record.id))?;
    Ok(Json(json!({ "faces": face_payload(&faces) })))
}

/// `POST /faces/preview` — run detection on an uploaded image and return
/// the face thumbnails without persisting anything
pub async fn preview(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    TypedMultipart(req): TypedMultipart<PreviewRequest>,
) -> Result<Json<Value>> {
    require_user(&state, &token)?;

    let image = req
        .image
        .ok_or_else(|| ApiError::bad_request("No image file uploaded."))?;

    let bytes = image.contents;
    let config = state.config.faces.clone();
    let detected = tokio::task::spawn_blocking(move || faces::extract_faces(&bytes, &config))
        .await
        .map_err(anyhow::Error::from)??;

    let thumbnails: Vec<Value> = detected
        .iter()
        .map(|face| {
            json!({
                "box": bbox_payload(&face.bbox),
                "thumbnail": STANDARD.encode(&face.thumbnail),
            })
        })
        .collect();

    Ok(Json(json!({ "faces": thumbnails })))
}

/// `POST /search/face` — match a descriptor against the caller's pool.
/// No match is an empty list, not an error.
pub async fn search(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Json(req): Json<FaceSearchRequest>,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    match_pool(&state, user_id, &req.descriptor)
}

/// `GET /shared/{user_id}/faces`
pub async fn shared_faces(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(owner_id): Path<i64>,
) -> Result<Json<Value>> {
    let viewer_id = require_user(&state, &token)?;
    ensure_shared(&state, owner_id, viewer_id)?;

    let faces = block_in_place(|| state.db.list_faces_for_user(owner_id))?;
    Ok(Json(json!({ "faces": face_payload(&faces) })))
}

/// `POST /shared/{user_id}/search/face`
pub async fn shared_search(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(owner_id): Path<i64>,
    Json(req): Json<FaceSearchRequest>,
) -> Result<Json<Value>> {
    let viewer_id = require_user(&state, &token)?;
    ensure_shared(&state, owner_id, viewer_id)?;
    match_pool(&state, owner_id, &req.descriptor)
}

/// Linear descriptor scan over one user's faces, answered as the storage
/// keys of the matching images.
fn match_pool(state: &AppState, pool_owner: i64, descriptor: &[f32]) -> Result<Json<Value>> {
    let pool = block_in_place(|| state.db.descriptors_for_user(pool_owner))?;
    let candidates = pool.iter().map(|(id, d)| (*id, d.as_slice()));

    let matched = matcher::match_images(
        descriptor,
        state.config.faces.descriptor_len,
        candidates,
        state.config.faces.match_threshold,
    )?;

    let mut ids: Vec<i64> = matched.into_iter().collect();
    ids.sort_unstable();
    let images = block_in_place(|| state.db.storage_keys_for_ids(&ids))?;
    Ok(Json(json!({ "images": images })))
}

fn face_payload(faces: &[FaceRecord]) -> Vec<Value> {
    faces
        .iter()
        .map(|face| {
            json!({
                "imageId": face.image_id,
                "faceIndex": face.face_index,
                "box": bbox_payload(&face.bbox),
                "thumbnail": STANDARD.encode(&face.thumbnail),
            })
        })
        .collect()
}

fn bbox_payload(bbox: &crate::db::BoundingBox) -> Value {
    json!({
        "x": bbox.x,
        "y": bbox.y,
        "width": bbox.width,
        "height": bbox.height,
    })
}
