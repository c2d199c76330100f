use axum::extract::Extension;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use crate::api::{success, ApiContext, QueryParams, Result, Success};
use crate::entities::TagUsage;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

pub fn router() -> Router {
    Router::new()
        .route("/tags", get(list_tags))
}

#[derive(Deserialize, Debug, Default)]
struct TagsQuery {
    q: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct TagsBody {
    total: usize,
    tags: Vec<TagUsage>,
}

async fn list_tags(
    ctx: Extension<ApiContext>,
    QueryParams(query): QueryParams<TagsQuery>,
) -> Result<Json<Success<TagsBody>>> {
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let (total, tags) = ctx.tags.page(query.q.as_deref(), offset, limit);
    Ok(success(TagsBody { total, tags }))
}
