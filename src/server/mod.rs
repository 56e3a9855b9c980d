mod albums;
mod auth;
mod error;
mod faces;
mod images;
mod search;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

pub use self::state::AppState;

/// Build the API router
pub fn create_app(state: Arc<AppState>) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/images", post(images::upload).get(images::list))
        .route("/images/filtered", post(images::upload_filtered))
        .route("/images/by-tags", get(search::by_tags))
        .route(
            "/images/{filename}",
            get(images::data)
                .patch(images::update)
                .delete(images::remove),
        )
        .route("/images/{filename}/info", get(images::info))
        .route("/images/{filename}/faces", get(faces::for_image))
        .route("/images/{filename}/duplicate", post(images::duplicate))
        .route("/search", get(search::by_title))
        .route("/search/face", post(faces::search))
        .route("/tags", get(search::tags))
        .route("/faces", get(faces::list))
        .route("/faces/preview", post(faces::preview))
        .route("/shares", post(albums::create_share).get(albums::list_shares))
        .route("/shared/{user_id}/images", get(search::shared_images))
        .route("/shared/{user_id}/images/by-tags", get(search::shared_by_tags))
        .route("/shared/{user_id}/search", get(search::shared_by_title))
        .route("/shared/{user_id}/faces", get(faces::shared_faces))
        .route("/shared/{user_id}/search/face", post(faces::shared_search))
        .route("/albums", post(albums::create_album).get(albums::list_albums))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload))
        .with_state(state)
}
