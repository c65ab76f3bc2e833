use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thumbnail_cache::{is_image_extension, AssetCategory};
use tracing::{debug, info, warn};

use crate::{
    error::{ApiResponse, AppError},
    listing::{collect_assets, format_timestamp, Paging},
    state::State as AppState,
};

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub code: u16,
    pub msg: String,
    pub data: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageItem {
    pub name: String,
    pub url: String,
    pub thumb_url: String,
    pub size: u64,
    pub created: String,
}

#[derive(Debug, Serialize)]
pub struct FileItem {
    pub name: String,
    pub url: String,
    pub size: u64,
    pub created: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub code: u16,
    pub msg: String,
    pub file_name: String,
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub url: String,
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::UploadFailed(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let client_name = field
            .file_name()
            .map(base_name)
            .ok_or_else(|| AppError::UploadFailed("file part has no file name".to_string()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::UploadFailed(e.to_string()))?;

        let url = store_upload(&state, &client_name, &data).await?;
        return Ok(Json(UploadResponse {
            code: 200,
            msg: "upload succeeded".to_string(),
            file_name: client_name,
            url,
        }));
    }

    Err(AppError::UploadFailed("request has no file part".to_string()))
}

/// Persist an upload and warm its thumbnail; returns the asset URL
async fn store_upload(state: &AppState, client_name: &str, data: &[u8]) -> Result<String, AppError> {
    let stored_name = stored_file_name(client_name, Local::now()).ok_or(AppError::InvalidParameter)?;
    let category = AssetCategory::for_file_name(&stored_name);

    let url = format!("{}{}", category.url_prefix(), stored_name);
    let target = state
        .store
        .layout()
        .resolve(&url, category)
        .map_err(|_| AppError::InvalidParameter)?;

    if let Some(parent) = target.path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::UploadFailed(e.to_string()))?;
    }
    tokio::fs::write(&target.path, data)
        .await
        .map_err(|e| AppError::UploadFailed(e.to_string()))?;
    info!(url = %target.url, bytes = data.len(), "stored upload");

    if category == AssetCategory::Image {
        let store = Arc::clone(&state.store);
        let warm_url = target.url.clone();
        // Failure here only means the first listing pays for generation
        if let Err(e) = tokio::task::spawn_blocking(move || store.ensure_thumbnail(&warm_url)).await {
            warn!(url = %target.url, "thumbnail warm-up after upload failed: {e}");
        }
    }

    Ok(target.url)
}

/// Last path component of a client-supplied file name
fn base_name(client_name: &str) -> String {
    client_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// `<timestamp>_<name>` with directories stripped and spaces replaced
fn stored_file_name(client_name: &str, now: DateTime<Local>) -> Option<String> {
    let base = base_name(client_name).replace(' ', "_");
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(format!("{}_{}", now.format("%Y%m%d%H%M%S"), base))
}

pub async fn image_list_handler(
    State(state): State<Arc<AppState>>,
    Query(paging): Query<Paging>,
) -> Result<Json<ListResponse<ImageItem>>, AppError> {
    let store = Arc::clone(&state.store);

    let (items, total) = tokio::task::spawn_blocking(move || {
        let layout = store.layout();
        let pruned = [layout.thumb_dir(), layout.category_dir(AssetCategory::File)];
        let assets = collect_assets(layout, &layout.upload_dir(), &pruned, is_image_extension);

        let total = assets.len();
        let items: Vec<ImageItem> = assets[paging.window(total)]
            .iter()
            .map(|asset| ImageItem {
                thumb_url: store.ensure_thumbnail(&asset.url),
                name: asset.name.clone(),
                url: asset.url.clone(),
                size: asset.size,
                created: format_timestamp(asset.modified),
            })
            .collect();
        (items, total)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ListResponse {
        code: 200,
        msg: "query succeeded".to_string(),
        data: items,
        total,
    }))
}

pub async fn file_list_handler(
    State(state): State<Arc<AppState>>,
    Query(paging): Query<Paging>,
) -> Result<Json<ListResponse<FileItem>>, AppError> {
    let store = Arc::clone(&state.store);

    let (items, total) = tokio::task::spawn_blocking(move || {
        let layout = store.layout();
        let file_dir = layout.category_dir(AssetCategory::File);
        let assets = collect_assets(layout, &file_dir, &[], |_| true);

        let total = assets.len();
        let items: Vec<FileItem> = assets[paging.window(total)]
            .iter()
            .map(|asset| FileItem {
                name: asset.name.clone(),
                url: asset.url.clone(),
                size: asset.size,
                created: format_timestamp(asset.modified),
            })
            .collect();
        (items, total)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ListResponse {
        code: 200,
        msg: "query succeeded".to_string(),
        data: items,
        total,
    }))
}

pub async fn image_delete_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<ApiResponse>, AppError> {
    delete_asset(&state, &query.url, AssetCategory::Image).await
}

pub async fn file_delete_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<ApiResponse>, AppError> {
    delete_asset(&state, &query.url, AssetCategory::File).await
}

async fn delete_asset(
    state: &AppState,
    raw_url: &str,
    category: AssetCategory,
) -> Result<Json<ApiResponse>, AppError> {
    let target = state
        .store
        .layout()
        .resolve(raw_url, category)
        .map_err(|e| {
            debug!(raw_url, "rejected delete: {e}");
            AppError::InvalidParameter
        })?;

    let metadata = tokio::fs::metadata(&target.path)
        .await
        .map_err(|_| AppError::NotFound)?;
    if metadata.is_dir() {
        return Err(AppError::InvalidParameter);
    }

    tokio::fs::remove_file(&target.path)
        .await
        .map_err(AppError::DeleteFailed)?;
    info!(url = %target.url, "deleted asset");

    if category == AssetCategory::Image {
        let store = Arc::clone(&state.store);
        let source_url = target.url.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.remove_thumbnail(&source_url)).await {
            warn!(url = %target.url, "thumbnail removal task failed: {e}");
        }
    }

    Ok(Json(ApiResponse::ok("delete succeeded")))
}
