mod api;
mod error;
mod state;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::{ServeDir, ServeFile};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::error::AppError;
pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::index_images_handler,
        api::search_handler,
        api::upload_images_handler,
        api::delete_image_handler,
        api::list_local_files_handler,
    ),
    components(schemas(
        crate::searcher::SearchResult,
        types::UploadForm,
        types::MessageResponse,
        types::ErrorResponse,
        types::UploadResponse,
        types::ListResponse,
    ))
)]
pub struct ApiDoc;

/// 静态文件与请求限制
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// 本地图片目录，非生产模式下挂载在 `/data`
    pub source_folder: PathBuf,
    /// 前端构建产物，生产模式下作为兜底路由
    pub frontend_dist: Option<PathBuf>,
    /// 请求体大小上限，单位为字节
    pub body_limit: usize,
}

/// 构建API服务器
pub fn create_app(state: Arc<AppState>, opts: ServeOptions) -> Router {
    let router = Router::new()
        .route("/indexImages", get(api::index_images_handler))
        .route("/search", get(api::search_handler))
        .route("/uploadImages", post(api::upload_images_handler))
        .route("/deleteImage", delete(api::delete_image_handler))
        .route("/listLocalFiles", get(api::list_local_files_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let router = match opts.frontend_dist {
        Some(dist) => {
            let index = ServeFile::new(dist.join("index.html"));
            router.fallback_service(ServeDir::new(dist).fallback(index))
        }
        None => router.nest_service("/data", ServeDir::new(opts.source_folder)),
    };

    router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(opts.body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
