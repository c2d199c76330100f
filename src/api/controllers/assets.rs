use std::path::Path as FsPath;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{debug, warn};
use crate::api::{ApiContext, ApiError, QueryParams, DEFAULT_AVATAR_PATH, PLACEHOLDER_PATH};
use crate::delivery::{not_found, redirect_to, serve_file, Delivery};
use crate::entities::{AssetId, MediaAsset};
use crate::error::MediaError;
use crate::variants::{is_scalable, negotiate_format};

const THUMBNAIL_MIME: &str = "image/jpeg";

pub fn router() -> Router {
    Router::new()
        .route("/assets/media/:id", get(get_media))
        .route("/assets/media/:id/:filename", get(get_named_media))
        .route("/assets/thumbnail/:id", get(get_thumbnail))
        .route("/assets/thumbnail/:id/:filename", get(get_named_thumbnail))
        .route("/assets/avatar/:username", get(get_avatar))
        .route("/assets/avatar/:username/:filename", get(get_named_avatar))
        .route("/assets/mood/:id", get(get_mood))
        .route("/assets/mood/:id/:filename", get(get_named_mood))
        .route("/assets/logo", get(get_random_logo))
        .route("/assets/logo/:filename", get(get_named_logo))
}

#[derive(serde::Deserialize, Debug, Default)]
struct VariantQuery {
    width: Option<String>,
    height: Option<String>,
    format: Option<String>,
}

/// Positive pixel count, or nothing.
fn dimension(raw: Option<&str>) -> Option<u32> {
    raw?.trim().parse::<u32>().ok().filter(|x| *x > 0)
}

fn parse_id(raw: &str) -> Option<AssetId> {
    raw.trim().parse().ok()
}

fn guess_mime(path: &FsPath) -> String {
    mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string()
}

fn display_name(path: &FsPath) -> String {
    path.file_name().map(|x| x.to_string_lossy().to_string()).unwrap_or_default()
}

/// Streams `delivery`, turning a file that vanished from disk into a plain 404.
async fn deliver(method: &Method, headers: &HeaderMap, delivery: Delivery<'_>) -> Response {
    match serve_file(method, headers, delivery).await {
        Ok(response) => response,
        Err(MediaError::FileIOError(e)) if e.kind() == std::io::ErrorKind::NotFound => not_found(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// media

async fn get_media(
    ctx: Extension<ApiContext>,
    method: Method,
    headers: HeaderMap,
    Path(id): Path<String>,
    QueryParams(query): QueryParams<VariantQuery>,
) -> Response {
    media_response(&ctx, &method, &headers, &id, false, query).await
}

async fn get_named_media(
    ctx: Extension<ApiContext>,
    method: Method,
    headers: HeaderMap,
    Path((id, _filename)): Path<(String, String)>,
    QueryParams(query): QueryParams<VariantQuery>,
) -> Response {
    media_response(&ctx, &method, &headers, &id, true, query).await
}

async fn media_response(ctx: &ApiContext, method: &Method, headers: &HeaderMap, id: &str, named: bool, query: VariantQuery) -> Response {
    let Some(asset) = find_asset(ctx, id).await else {
        return not_found();
    };
    let original = ctx.store.original_path(&asset);
    let width = dimension(query.width.as_deref());
    let height = dimension(query.height.as_deref());

    if (width.is_some() || height.is_some()) && is_scalable(&asset.mime_type) {
        let format = negotiate_format(&asset.storage_key, query.format.as_deref());
        match ctx.cache.get_or_create_scaled(&asset.storage_key, &original, width, height, &format).await {
            Ok(variant) => {
                let name = FsPath::new(&asset.original_filename).with_extension(&format);
                let name = display_name(&name);
                let mime_type = guess_mime(&variant);
                let delivery = Delivery {
                    path: &variant,
                    mime_type: &mime_type,
                    etag: None,
                    disposition_name: (!named).then_some(name.as_str()),
                    no_store: false,
                };
                return deliver(method, headers, delivery).await;
            }
            Err(e) => warn!("Scaling asset {} failed, serving original: {}", asset.id, e),
        }
    }

    let delivery = Delivery {
        path: &original,
        mime_type: &asset.mime_type,
        etag: Some(&asset.content_hash),
        disposition_name: (!named).then_some(asset.original_filename.as_str()),
        no_store: false,
    };
    deliver(method, headers, delivery).await
}

async fn find_asset(ctx: &ApiContext, id: &str) -> Option<MediaAsset> {
    ctx.store.fetch_by_id(parse_id(id)?).await
}

// thumbnails

async fn get_thumbnail(ctx: Extension<ApiContext>, method: Method, headers: HeaderMap, Path(id): Path<String>) -> Response {
    thumbnail_response(&ctx, &method, &headers, &id, false).await
}

async fn get_named_thumbnail(
    ctx: Extension<ApiContext>,
    method: Method,
    headers: HeaderMap,
    Path((id, _filename)): Path<(String, String)>,
) -> Response {
    thumbnail_response(&ctx, &method, &headers, &id, true).await
}

async fn thumbnail_response(ctx: &ApiContext, method: &Method, headers: &HeaderMap, id: &str, named: bool) -> Response {
    let Some(asset) = find_asset(ctx, id).await else {
        return not_found();
    };
    let Some(path) = ctx.store.existing_thumbnail_path(&asset).await else {
        return redirect_to(PLACEHOLDER_PATH);
    };
    let name = display_name(&FsPath::new(&asset.original_filename).with_extension("jpg"));
    let delivery = Delivery {
        path: &path,
        mime_type: THUMBNAIL_MIME,
        etag: None,
        disposition_name: (!named).then_some(name.as_str()),
        no_store: false,
    };
    deliver(method, headers, delivery).await
}

// avatars

async fn get_avatar(ctx: Extension<ApiContext>, method: Method, headers: HeaderMap, Path(username): Path<String>) -> Response {
    avatar_response(&ctx, &method, &headers, &username, false).await
}

async fn get_named_avatar(
    ctx: Extension<ApiContext>,
    method: Method,
    headers: HeaderMap,
    Path((username, _filename)): Path<(String, String)>,
) -> Response {
    avatar_response(&ctx, &method, &headers, &username, true).await
}

async fn avatar_response(ctx: &ApiContext, method: &Method, headers: &HeaderMap, username: &str, named: bool) -> Response {
    let Some(path) = ctx.icons.avatar_path(username).await else {
        return redirect_to(DEFAULT_AVATAR_PATH);
    };
    let name = display_name(&path);
    let mime_type = guess_mime(&path);
    let delivery = Delivery {
        path: &path,
        mime_type: &mime_type,
        etag: None,
        disposition_name: (!named).then_some(name.as_str()),
        no_store: false,
    };
    deliver(method, headers, delivery).await
}

// moods

async fn get_mood(ctx: Extension<ApiContext>, method: Method, headers: HeaderMap, Path(id): Path<String>) -> Response {
    mood_response(&ctx, &method, &headers, &id, false).await
}

async fn get_named_mood(
    ctx: Extension<ApiContext>,
    method: Method,
    headers: HeaderMap,
    Path((id, _filename)): Path<(String, String)>,
) -> Response {
    mood_response(&ctx, &method, &headers, &id, true).await
}

async fn mood_response(ctx: &ApiContext, method: &Method, headers: &HeaderMap, id: &str, named: bool) -> Response {
    let Some(id) = parse_id(id) else {
        return not_found();
    };
    let Some((mood, path)) = ctx.icons.resolve_mood(id).await else {
        return not_found();
    };
    let name = format!("{}.{}", mood.name, path.extension().map(|x| x.to_string_lossy()).unwrap_or_default());
    let mime_type = guess_mime(&path);
    let delivery = Delivery {
        path: &path,
        mime_type: &mime_type,
        etag: None,
        disposition_name: (!named).then_some(name.as_str()),
        no_store: false,
    };
    deliver(method, headers, delivery).await
}

// logos

async fn get_random_logo(ctx: Extension<ApiContext>, method: Method, headers: HeaderMap) -> Response {
    match ctx.icons.random_logo().await {
        Ok(Some(path)) => logo_response(&method, &headers, &path, false).await,
        Ok(None) => not_found(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn get_named_logo(ctx: Extension<ApiContext>, method: Method, headers: HeaderMap, Path(filename): Path<String>) -> Response {
    match ctx.icons.find_logo(&filename).await {
        Ok(Some(path)) => logo_response(&method, &headers, &path, true).await,
        Ok(None) => not_found(),
        Err(e) => {
            debug!("Rejected logo name {:?}: {}", filename, e);
            not_found()
        }
    }
}

async fn logo_response(method: &Method, headers: &HeaderMap, path: &FsPath, named: bool) -> Response {
    let name = display_name(path);
    let mime_type = guess_mime(path);
    let delivery = Delivery {
        path,
        mime_type: &mime_type,
        etag: None,
        disposition_name: (!named).then_some(name.as_str()),
        no_store: true,
    };
    deliver(method, headers, delivery).await
}
