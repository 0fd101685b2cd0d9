use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use axum_typed_multipart::TypedMultipart;
use log::info;

use super::error::{Result, ResultExt};
use super::state::AppState;
use super::types::*;
use crate::metrics;
use crate::searcher::SearchResult;
use crate::utils::parse_page_size;

const DEFAULT_PAGE_SIZE: usize = 10;

/// 嵌入图片目录中的图片并写入向量库
#[utoipa::path(
    get,
    path = "/indexImages",
    responses(
        (status = 200, body = MessageResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn index_images_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>> {
    let start = Instant::now();
    info!("开始索引图片目录");

    let count = state
        .searcher
        .index_all(&state.selection, |report| {
            info!("分块 {} 完成: {}/{}", report.index + 1, report.completed, report.total);
        })
        .await
        .or_error("Error indexing images")?;

    metrics::observe_request_duration("index", start.elapsed().as_secs_f32());
    info!("索引完成，共 {} 张图片", count);
    Ok(Json(MessageResponse::new("Indexing complete")))
}

/// 搜索相似图片
#[utoipa::path(
    get,
    path = "/search",
    params(SearchQuery),
    responses(
        (status = 200, body = Vec<SearchResult>),
        (status = 400, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>> {
    let start = Instant::now();
    info!("正在搜索: {} {:?}", query.image_path, query.name);

    let result = state
        .searcher
        .search(&query.image_path, query.name.as_deref())
        .await
        .or_error("Error fetching images")?;

    metrics::observe_request_duration("search", start.elapsed().as_secs_f32());
    Ok(Json(result))
}

/// 上传图片并立即写入向量库
#[utoipa::path(
    post,
    path = "/uploadImages",
    params(UploadQuery),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = UploadResponse),
        (status = 400, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn upload_images_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    data: TypedMultipart<UploadRequest>,
) -> Result<Json<UploadResponse>> {
    let start = Instant::now();
    let files = data
        .0
        .images
        .into_iter()
        .map(|file| (file.metadata.file_name, file.contents))
        .collect::<Vec<_>>();
    info!("收到 {} 张上传图片", files.len());

    let paths = state.searcher.upload(&files).await.or_error("Error uploading images")?;

    let page_size = parse_page_size(query.page_size.as_deref(), DEFAULT_PAGE_SIZE);
    let page_of_first_image = state
        .searcher
        .page_of(&paths[0], page_size)
        .await
        .or_error("Error uploading images")?;

    metrics::observe_request_duration("upload", start.elapsed().as_secs_f32());
    Ok(Json(UploadResponse { page_of_first_image }))
}

/// 从向量库中删除图片，并将文件重命名为已删除
#[utoipa::path(
    delete,
    path = "/deleteImage",
    params(DeleteQuery),
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn delete_image_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<MessageResponse>> {
    let start = Instant::now();
    info!("删除图片: {}", query.image_path);

    state.searcher.delete(&query.image_path).await.or_error("Error deleting image")?;

    metrics::observe_request_duration("delete", start.elapsed().as_secs_f32());
    Ok(Json(MessageResponse::new("Image deleted")))
}

/// 列出本地图片
#[utoipa::path(
    get,
    path = "/listLocalFiles",
    responses(
        (status = 200, body = ListResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn list_local_files_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListResponse>> {
    let image_paths = state.searcher.list().await.or_error("Error listing images")?;
    Ok(Json(ListResponse { image_paths }))
}
