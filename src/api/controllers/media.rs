use std::collections::BTreeSet;
use axum::extract::{Extension, Multipart, Path};
use axum::extract::multipart::Field;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use crate::api::{success, ApiContext, ApiError, JsonBody, QueryParams, Result, Success, Writer};
use crate::cursor::{find_adjacent, CursorFilter, Direction};
use crate::entities::{AssetId, MediaAsset, MoodId, SortOrder};
use crate::error::ValidationCode;
use crate::icons::IconSource;
use crate::store::{EditRequest, Ingested, StagedUpload, UploadRequest};
use crate::utils::str_utils::parse_tag_list;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;
const FALLBACK_FILENAME: &str = "upload";

pub fn router() -> Router {
    Router::new()
        .route("/media/upload", post(upload_media))
        .route("/media/edit", post(edit_media))
        .route("/media/delete", post(delete_media))
        .route("/media/avatar", post(upload_avatar))
        .route("/media/mood", post(create_mood))
        .route("/media/mood/delete", post(delete_mood))
        .route("/media/collection", post(update_collection))
        .route("/media/list", get(list_media))
        .route("/media/:media_id/adjacent", get(get_adjacent))
}

/// The `file` part of a multipart form, staged to disk, plus the plain text fields around it.
struct UploadForm {
    file: Option<StagedFile>,
    fields: Vec<(String, String)>,
}

struct StagedFile {
    staged: StagedUpload,
    filename: String,
    content_type: Option<String>,
}

impl UploadForm {
    async fn read(ctx: &ApiContext, mut multipart: Multipart) -> Result<Self> {
        let mut form = Self { file: None, fields: Vec::new() };
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == "file" {
                if form.file.is_some() {
                    return Err(ApiError::validation(ValidationCode::InvalidRequest));
                }
                form.file = Some(Self::stage(ctx, field).await?);
            } else {
                form.fields.push((name, field.text().await?));
            }
        }
        Ok(form)
    }

    async fn stage(ctx: &ApiContext, mut field: Field<'_>) -> Result<StagedFile> {
        let filename = field.file_name()
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .unwrap_or(FALLBACK_FILENAME)
            .to_string();
        let content_type = field.content_type().map(str::to_string);
        let mut staged = ctx.store.stage().await?;
        while let Some(chunk) = field.chunk().await? {
            staged.push(&chunk).await?;
        }
        Ok(StagedFile { staged, filename, content_type })
    }

    fn take_file(&mut self) -> Result<StagedFile> {
        self.file.take().ok_or(ApiError::validation(ValidationCode::MissingFile))
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(ApiError::validation(ValidationCode::InvalidRequest)),
    }
}

async fn upload_media(
    ctx: Extension<ApiContext>,
    Writer(principal): Writer,
    multipart: Multipart,
) -> Result<Json<Success<Ingested>>> {
    let mut form = UploadForm::read(&ctx, multipart).await?;
    let file = form.take_file()?;

    let mut request = UploadRequest::new(file.filename, file.content_type, principal.name);
    request.title = form.field("title").map(str::to_string);
    request.tags = form.field("tags").map(parse_tag_list).unwrap_or_default();
    request.comment = form.field("comment").map(str::to_string);
    if let Some(gallery) = form.field("gallery") {
        request.gallery_visible = parse_flag(gallery)?;
    }

    let ingested = ctx.store.ingest_staged(file.staged, request).await?;
    Ok(success(ingested))
}

#[derive(Deserialize, Debug)]
struct EditBody {
    id: AssetId,
    title: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_true", alias = "gallery")]
    gallery_visible: bool,
    comment: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct MediaBody {
    media: MediaAsset,
}

async fn edit_media(
    ctx: Extension<ApiContext>,
    Writer(_): Writer,
    JsonBody(req): JsonBody<EditBody>,
) -> Result<Json<Success<MediaBody>>> {
    let request = EditRequest {
        title: req.title,
        tags: req.tags,
        gallery_visible: req.gallery_visible,
        comment: req.comment,
    };
    let media = ctx.store.edit(req.id, request).await?;
    Ok(success(MediaBody { media }))
}

#[derive(Deserialize, Debug)]
struct IdsBody {
    ids: Vec<AssetId>,
}

#[derive(Serialize)]
struct CountBody {
    count: usize,
}

async fn delete_media(
    ctx: Extension<ApiContext>,
    Writer(_): Writer,
    JsonBody(req): JsonBody<IdsBody>,
) -> Result<Json<Success<CountBody>>> {
    if req.ids.is_empty() {
        return Err(ApiError::validation(ValidationCode::InvalidId));
    }
    let count = ctx.store.delete(&req.ids).await?;
    Ok(success(CountBody { count }))
}

#[derive(Serialize)]
struct KeyBody {
    key: String,
}

async fn upload_avatar(
    ctx: Extension<ApiContext>,
    Writer(principal): Writer,
    multipart: Multipart,
) -> Result<Json<Success<KeyBody>>> {
    let mut form = UploadForm::read(&ctx, multipart).await?;
    let file = form.take_file()?;
    let (temp, _, _) = file.staged.finish().await?;
    let source = IconSource { path: &temp, filename: &file.filename, declared_mime: file.content_type.as_deref() };
    let key = ctx.icons.set_avatar(&principal.name, source).await?;
    Ok(success(KeyBody { key }))
}

#[derive(Serialize)]
struct IdBody {
    id: u64,
}

async fn create_mood(
    ctx: Extension<ApiContext>,
    Writer(principal): Writer,
    multipart: Multipart,
) -> Result<Json<Success<IdBody>>> {
    let mut form = UploadForm::read(&ctx, multipart).await?;
    let name = form.field("name").unwrap_or_default().to_string();
    let character_id = form.field("character_id")
        .and_then(|x| x.trim().parse::<u64>().ok())
        .ok_or(ApiError::validation(ValidationCode::InvalidId))?;
    let file = form.take_file()?;
    let (temp, _, _) = file.staged.finish().await?;
    let source = IconSource { path: &temp, filename: &file.filename, declared_mime: file.content_type.as_deref() };
    let mood = ctx.icons.create_mood(&name, character_id, &principal.name, source).await?;
    Ok(success(IdBody { id: mood.id }))
}

#[derive(Deserialize, Debug)]
struct MoodIdBody {
    id: MoodId,
}

async fn delete_mood(
    ctx: Extension<ApiContext>,
    Writer(_): Writer,
    JsonBody(req): JsonBody<MoodIdBody>,
) -> Result<Json<Success<IdBody>>> {
    let mood = ctx.icons.delete_mood(req.id).await?;
    Ok(success(IdBody { id: mood.id }))
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum CollectionAction {
    Add,
    Remove,
}

#[derive(Deserialize, Debug)]
struct CollectionBody {
    collection_id: u64,
    ids: Vec<AssetId>,
    action: CollectionAction,
}

async fn update_collection(
    ctx: Extension<ApiContext>,
    Writer(_): Writer,
    JsonBody(req): JsonBody<CollectionBody>,
) -> Result<Json<Success<CountBody>>> {
    let mut db = ctx.db().write().await;
    let mut count = 0;
    for id in req.ids {
        let changed = match req.action {
            CollectionAction::Add => db.add_to_collection(req.collection_id, id).await?,
            CollectionAction::Remove => db.remove_from_collection(req.collection_id, id).await?,
        };
        if changed {
            count += 1;
        }
    }
    Ok(success(CountBody { count }))
}

#[derive(Deserialize, Debug, Default)]
struct ListQuery {
    tags: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
    order: Option<SortOrder>,
}

#[derive(Serialize)]
struct ListBody {
    total: usize,
    items: Vec<MediaAsset>,
}

async fn list_media(
    ctx: Extension<ApiContext>,
    QueryParams(query): QueryParams<ListQuery>,
) -> Result<Json<Success<ListBody>>> {
    let tags: BTreeSet<String> = query.tags.as_deref().map(parse_tag_list).unwrap_or_default();
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let order = query.order.unwrap_or_default();
    let total = ctx.store.count_gallery_visible_by_tags(&tags).await;
    let items = ctx.store.fetch_gallery_visible_by_tags(&tags, offset, limit, order).await;
    Ok(success(ListBody { total, items }))
}

#[derive(Deserialize, Debug)]
struct AdjacentQuery {
    direction: Direction,
    tags: Option<String>,
    collection: Option<u64>,
    uploader: Option<String>,
}

async fn get_adjacent(
    ctx: Extension<ApiContext>,
    Path(media_id): Path<String>,
    QueryParams(query): QueryParams<AdjacentQuery>,
) -> Result<Json<Success<IdBody>>> {
    let reference_id: AssetId = media_id.trim().parse()
        .map_err(|_| ApiError::validation(ValidationCode::InvalidId))?;
    let filter = CursorFilter {
        tags: query.tags.as_deref().map(parse_tag_list).unwrap_or_default(),
        collection: query.collection,
        uploader: query.uploader.map(|x| x.trim().to_string()).filter(|x| !x.is_empty()),
    };
    let db = ctx.db().read().await;
    let id = find_adjacent(&db, query.direction, reference_id, &filter).unwrap_or(reference_id);
    Ok(success(IdBody { id }))
}
