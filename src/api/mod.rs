use std::sync::Arc;
use anyhow::Context;
use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Query};
use axum::http::request::Parts;
use axum::{Extension, Json, Router};
use log::info;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
pub use error::ApiError;
use crate::auth::{Authorizer, Principal, TokenAuthorizer};
use crate::config::AppConfig;
use crate::db::{MediaDb, SharedDb};
use crate::icons::IconService;
use crate::storage::FileStorage;
use crate::store::AssetStore;
use crate::tags::TagIndex;
use crate::transcoder::Transcoder;
use crate::variants::VariantCache;

mod error;
mod controllers;

pub const PLACEHOLDER_PATH: &str = "/static/placeholder.svg";
pub const DEFAULT_AVATAR_PATH: &str = "/static/default_avatar.svg";

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<AssetStore>,
    pub icons: Arc<IconService>,
    pub cache: Arc<VariantCache>,
    pub tags: Arc<TagIndex>,
    pub authorizer: Arc<dyn Authorizer>,
    pub max_upload_size: u64,
}

impl ApiContext {
    /// Replays the database and wires every service over the media root.
    pub async fn new(config: &AppConfig, transcoder: Arc<dyn Transcoder>) -> anyhow::Result<Self> {
        let mut db = MediaDb::new(Box::new(FileStorage::new(config.dirs.db_path.clone())));
        db.init().await.context("failed to replay database")?;
        let db = db.into_shared();

        let cache = Arc::new(VariantCache::new(config.dirs.cache.clone(), transcoder.clone()));
        let store = AssetStore::new(db.clone(), config.dirs.clone(), transcoder.clone(), cache.clone(), config.max_upload_size);
        let icons = IconService::new(db.clone(), config.dirs.clone(), transcoder);
        let tags = Arc::new(TagIndex::new());
        tags.rebuild(&db).await;

        Ok(Self {
            store: Arc::new(store),
            icons: Arc::new(icons),
            cache,
            tags,
            authorizer: Arc::new(TokenAuthorizer::new(&config.api_tokens)),
            max_upload_size: config.max_upload_size,
        })
    }

    pub fn db(&self) -> &SharedDb {
        self.store.db()
    }
}

pub fn app(ctx: ApiContext) -> Router {
    controllers::router(ctx.max_upload_size)
        .layer(CorsLayer::new().allow_methods(Any).allow_headers(Any).allow_origin(Any))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(ctx))
                .layer(TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO))),
        )
}

pub async fn serve(ctx: ApiContext, bind: &str, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await
        .with_context(|| format!("failed to bind to {}", bind))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app(ctx))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("error running HTTP server")
}

/// `{ "status": "success", ...body }`
#[derive(Serialize)]
pub struct Success<T: Serialize> {
    status: &'static str,
    #[serde(flatten)]
    body: T,
}

pub fn success<T: Serialize>(body: T) -> Json<Success<T>> {
    Json(Success { status: "success", body })
}

/// The caller of a write endpoint. Anonymous requests are rejected with `forbidden`.
pub struct Writer(pub Principal);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Writer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let ctx = parts.extensions.get::<ApiContext>()
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("api context is not installed")))?;
        ctx.authorizer.authorize(&parts.headers).map(Writer).ok_or(ApiError::Forbidden)
    }
}

/// JSON body whose rejections use the error envelope.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// Query string whose rejections use the error envelope.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);
