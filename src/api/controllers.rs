use axum::extract::DefaultBodyLimit;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use crate::api::{DEFAULT_AVATAR_PATH, PLACEHOLDER_PATH};

mod assets;
mod media;
mod tags;

const PLACEHOLDER: &[u8] = include_bytes!("assets/placeholder.svg");
const DEFAULT_AVATAR: &[u8] = include_bytes!("assets/default_avatar.svg");
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

pub fn router(max_upload_size: u64) -> Router {
    let body_limit = usize::try_from(max_upload_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX);
    assets::router()
        .merge(media::router())
        .merge(tags::router())
        .route(PLACEHOLDER_PATH, get(placeholder))
        .route(DEFAULT_AVATAR_PATH, get(default_avatar))
        .layer(DefaultBodyLimit::max(body_limit))
}

fn svg(bytes: &'static [u8]) -> impl IntoResponse {
    ([(CONTENT_TYPE, "image/svg+xml"), (CACHE_CONTROL, "public, max-age=31536000")], bytes)
}

async fn placeholder() -> impl IntoResponse {
    svg(PLACEHOLDER)
}

async fn default_avatar() -> impl IntoResponse {
    svg(DEFAULT_AVATAR)
}
