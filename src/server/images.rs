//! Image upload and CRUD handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use axum_auth::AuthBearer;
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::block_in_place;

use crate::db::{ImageRecord, NewFaceRecord};
use crate::faces::{self, detector, FaceError};

use super::auth::require_user;
use super::error::{ApiError, Result};
use super::state::AppState;

#[derive(TryFromMultipart)]
pub struct UploadRequest {
    #[form_data(limit = "unlimited")]
    pub image: Option<FieldData<Bytes>>,
    pub title: Option<String>,
    /// Comma-separated tag list
    pub tags: Option<String>,
}

#[derive(TryFromMultipart)]
pub struct FilteredUploadRequest {
    #[form_data(limit = "unlimited")]
    pub image: Option<FieldData<Bytes>>,
    pub title: Option<String>,
    pub tags: Option<String>,
    /// One of "evening", "incbrightness", "greyscale", "invert"
    pub filter: Option<String>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct UpdateRequest {
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `POST /images` — store the original bytes, extract faces, then commit
/// metadata, tags and face records in one transaction. If that commit
/// fails the stored blob is removed again.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    TypedMultipart(req): TypedMultipart<UploadRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let user_id = require_user(&state, &token)?;

    let image = req
        .image
        .ok_or_else(|| ApiError::bad_request("No image file uploaded."))?;
    let original_name = image
        .metadata
        .file_name
        .as_deref()
        .unwrap_or("upload.jpg");
    let storage_key = storage_key_for(original_name);

    let title = req.title.unwrap_or_default();
    let tags = parse_tags(req.tags.as_deref());

    // Face extraction is CPU-bound model work
    let bytes = image.contents;
    let faces = {
        let bytes = bytes.clone();
        let config = state.config.faces.clone();
        tokio::task::spawn_blocking(move || faces::extract_faces(&bytes, &config))
            .await
            .map_err(anyhow::Error::from)??
    };

    let image_id = persist_upload(&state, user_id, &storage_key, &title, &tags, &bytes, &faces)?;

    tracing::info!(user_id, image_id, faces = faces.len(), "image uploaded");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "filename": storage_key,
            "faces": faces.len(),
        })),
    ))
}

/// `POST /images/filtered` — apply a display filter to the uploaded
/// image, then store the filtered rendition like a normal upload. Faces
/// are extracted from the filtered bytes, since those are what is kept.
pub async fn upload_filtered(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    TypedMultipart(req): TypedMultipart<FilteredUploadRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let user_id = require_user(&state, &token)?;

    let image = req
        .image
        .ok_or_else(|| ApiError::bad_request("No image file selected."))?;
    let original_name = image
        .metadata
        .file_name
        .as_deref()
        .unwrap_or("upload.jpg");
    // The filtered rendition is re-encoded, so the key is always .jpg
    let storage_key = jpeg_storage_key(original_name);

    let title = req.title.unwrap_or_default();
    let tags = parse_tags(req.tags.as_deref());
    let filter = req.filter.unwrap_or_default();

    let raw = image.contents;
    let (bytes, faces) = {
        let config = state.config.faces.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(
            move || -> std::result::Result<(Vec<u8>, Vec<NewFaceRecord>), FaceError> {
                let img = detector::decode(&raw)?;
                let filtered = apply_filter(img, &filter);

                let mut jpeg = Vec::new();
                filtered
                    .to_rgb8()
                    .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)?;

                let faces = faces::extract_faces(&jpeg, &config)?;
                Ok((jpeg, faces))
            },
        )
        .await
        .map_err(anyhow::Error::from)??
    };

    let image_id = persist_upload(&state, user_id, &storage_key, &title, &tags, &bytes, &faces)?;

    tracing::info!(user_id, image_id, filter = %filter, "filtered image uploaded");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "filename": storage_key,
            "faces": faces.len(),
        })),
    ))
}

/// Persist one upload: blob first, then the image/tags/faces transaction
/// with a bounded retry for transient store failures (the extraction
/// core itself never retries). A failed transaction removes the blob.
fn persist_upload(
    state: &AppState,
    user_id: i64,
    storage_key: &str,
    title: &str,
    tags: &[String],
    bytes: &[u8],
    faces: &[NewFaceRecord],
) -> Result<i64> {
    block_in_place(|| state.blobs.save(user_id, storage_key, bytes))?;

    let inserted = block_in_place(|| {
        let mut attempt = 0;
        loop {
            match state
                .db
                .insert_image_with_faces(user_id, storage_key, title, tags, faces)
            {
                Ok(id) => break Ok(id),
                Err(e) if attempt < 2 => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "image insert failed, retrying");
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(e) => break Err(e),
            }
        }
    });

    match inserted {
        Ok(id) => Ok(id),
        Err(e) => {
            // Do not leave an unreferenced blob behind
            if let Err(cleanup) = block_in_place(|| state.blobs.delete(user_id, storage_key)) {
                tracing::warn!(key = %storage_key, error = %cleanup, "blob cleanup failed");
            }
            Err(FaceError::Store(e).into())
        }
    }
}

/// `GET /images?page=&limit=`
pub async fn list(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let (images, has_more) = block_in_place(|| state.db.list_images(user_id, page, limit))?;
    Ok(Json(json!({
        "images": images,
        "page": page,
        "limit": limit,
        "hasMore": has_more,
    })))
}

/// `GET /images/{filename}` — raw bytes
pub async fn data(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    let user_id = require_user(&state, &token)?;
    let record = visible_image(&state, user_id, &filename)?;

    let bytes = block_in_place(|| state.blobs.read(record.user_id, &record.storage_key))?;
    Ok((
        [(header::CONTENT_TYPE, content_type(&record.storage_key))],
        bytes,
    ))
}

/// `GET /images/{filename}/info`
pub async fn info(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(filename): Path<String>,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let record = visible_image(&state, user_id, &filename)?;
    let tags = block_in_place(|| state.db.image_tags(record.id))?;

    Ok(Json(json!({
        "filename": record.storage_key,
        "title": record.title,
        "tags": tags,
        "uploadedBy": record.uploader_email,
        "uploadedAt": record.uploaded_at,
    })))
}

/// `PATCH /images/{filename}` — retitle and replace the tag set
pub async fn update(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(filename): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<Value>> {
    let user_id = require_user(&state, &token)?;
    let record = owned_image(&state, user_id, &filename)?;

    block_in_place(|| state.db.update_image(user_id, record.id, &req.title, &req.tags))?;
    Ok(Json(json!({ "filename": record.storage_key })))
}

/// `DELETE /images/{filename}` — blob, metadata, faces and orphaned tags
pub async fn remove(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(filename): Path<String>,
) -> Result<StatusCode> {
    let user_id = require_user(&state, &token)?;
    let record = owned_image(&state, user_id, &filename)?;

    block_in_place(|| state.db.delete_image(user_id, record.id))?;
    block_in_place(|| state.blobs.delete(user_id, &record.storage_key))?;

    tracing::info!(user_id, image_id = record.id, "image deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /images/{filename}/duplicate` — copy blob, metadata, tags and
/// face records under a fresh storage key
pub async fn duplicate(
    State(state): State<Arc<AppState>>,
    token: AuthBearer,
    Path(filename): Path<String>,
) -> Result<(StatusCode, Json<Value>)> {
    let user_id = require_user(&state, &token)?;
    let record = owned_image(&state, user_id, &filename)?;

    let new_key = storage_key_for(&record.storage_key);
    block_in_place(|| {
        let bytes = state.blobs.read(user_id, &record.storage_key)?;
        state.blobs.save(user_id, &new_key, &bytes)
    })?;

    let copied = block_in_place(|| state.db.duplicate_image(record.id, &new_key));
    if let Err(e) = copied {
        if let Err(cleanup) = block_in_place(|| state.blobs.delete(user_id, &new_key)) {
            tracing::warn!(key = %new_key, error = %cleanup, "blob cleanup failed");
        }
        return Err(e.into());
    }

    Ok((StatusCode::CREATED, Json(json!({ "filename": new_key }))))
}

/// An image the user may read: their own, or one from a gallery shared
/// with them.
pub(super) fn visible_image(
    state: &AppState,
    viewer_id: i64,
    filename: &str,
) -> Result<ImageRecord> {
    let record = block_in_place(|| state.db.get_image_by_key(filename))?
        .ok_or_else(|| ApiError::not_found("Image not found."))?;
    if !block_in_place(|| state.db.can_view_gallery(record.user_id, viewer_id))? {
        return Err(ApiError::forbidden("This gallery is not shared with you."));
    }
    Ok(record)
}

/// An image the user owns. Writes never cross gallery boundaries.
fn owned_image(state: &AppState, user_id: i64, filename: &str) -> Result<ImageRecord> {
    let record = block_in_place(|| state.db.get_image_by_key(filename))?
        .ok_or_else(|| ApiError::not_found("Image not found."))?;
    if record.user_id != user_id {
        return Err(ApiError::forbidden("Not your image."));
    }
    Ok(record)
}

/// Timestamp-prefixed storage key derived from the uploaded filename,
/// restricted to characters the blob store accepts.
fn storage_key_for(original_name: &str) -> String {
    let name: String = original_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let name = if name.is_empty() {
        "upload.jpg".to_string()
    } else {
        name
    };
    format!("{}-{}", Utc::now().timestamp_millis(), name)
}

/// Force a `.jpg` extension on the generated storage key.
fn jpeg_storage_key(original_name: &str) -> String {
    let key = storage_key_for(original_name);
    match key.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.jpg"),
        None => format!("{key}.jpg"),
    }
}

/// Upload-time display filters. Unknown names pass the image through
/// unchanged.
fn apply_filter(img: image::DynamicImage, filter: &str) -> image::DynamicImage {
    match filter {
        "evening" => scale_brightness(&img, 0.8),
        "incbrightness" => scale_brightness(&img, 1.3),
        "greyscale" => img.grayscale(),
        "invert" => {
            let mut img = img;
            img.invert();
            img
        }
        _ => img,
    }
}

fn scale_brightness(img: &image::DynamicImage, factor: f32) -> image::DynamicImage {
    let mut rgb = img.to_rgb8();
    for px in rgb.pixels_mut() {
        for channel in px.0.iter_mut() {
            *channel = (*channel as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    image::DynamicImage::ImageRgb8(rgb)
}

fn parse_tags(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn content_type(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(str::to_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_strip_hostile_characters() {
        let key = storage_key_for("../../etc/passwd");
        assert!(!key.contains('/'));
        assert!(key.ends_with("....etcpasswd"));
    }

    #[test]
    fn empty_filename_gets_a_default() {
        let key = storage_key_for("//");
        assert!(key.ends_with("-upload.jpg"));
    }

    #[test]
    fn tags_are_trimmed_and_emptied() {
        assert_eq!(
            parse_tags(Some(" sea, sun ,, ")),
            vec!["sea".to_string(), "sun".to_string()]
        );
        assert!(parse_tags(None).is_empty());
    }

    #[test]
    fn jpeg_storage_key_replaces_the_extension() {
        assert!(jpeg_storage_key("photo.png").ends_with("-photo.jpg"));
        assert!(jpeg_storage_key("noext").ends_with("-noext.jpg"));
        assert!(jpeg_storage_key("archive.tar.gz").ends_with("-archive.tar.jpg"));
    }

    #[test]
    fn filters_transform_pixels() {
        use image::{DynamicImage, Rgb, RgbImage};

        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, Rgb([100, 200, 50]));
        let img = DynamicImage::ImageRgb8(img);

        let dimmed = apply_filter(img.clone(), "evening").to_rgb8();
        assert_eq!(dimmed.get_pixel(0, 0).0, [80, 160, 40]);

        // Brightening clamps at channel maximum
        let brightened = apply_filter(img.clone(), "incbrightness").to_rgb8();
        assert_eq!(brightened.get_pixel(0, 0).0, [130, 255, 65]);

        let inverted = apply_filter(img.clone(), "invert").to_rgb8();
        assert_eq!(inverted.get_pixel(0, 0).0, [155, 55, 205]);

        let grey = apply_filter(img.clone(), "greyscale").to_rgb8();
        let px = grey.get_pixel(0, 0).0;
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);

        // Unknown filter is a pass-through
        let same = apply_filter(img.clone(), "sepia").to_rgb8();
        assert_eq!(same.get_pixel(0, 0).0, [100, 200, 50]);
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type("a.PNG"), "image/png");
        assert_eq!(content_type("123-photo.jpeg"), "image/jpeg");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }
}
