use crate::AppState;
use crate::api::error::{AlertType, AppError, ControlledError};
use crate::entities::files;
use crate::services::archive::{ArchiveEntry, zip_entries};
use crate::services::file_processor::{FileProcessOption, FileProcessResult, FileProcessor};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use sea_orm::TransactionTrait;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SaveFileSetQuery {
    /// Upper bound on non-thumbnail files in the set after the operation
    pub max_file_count: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub id: i32,
    pub order: Option<i32>,
    pub origin_id: Option<i32>,
    pub original_name: String,
    pub extension: String,
}

impl From<files::Model> for FileResponse {
    fn from(file: files::Model) -> Self {
        Self {
            id: file.id,
            order: file.sort_order,
            origin_id: file.origin_id,
            original_name: file.original_name,
            extension: file.extension,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSetResponse {
    pub files: Vec<FileResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn attachments_gone() -> ControlledError {
    ControlledError::new("The attachments were deleted or do not exist.")
        .with_status(StatusCode::NOT_FOUND)
        .with_alert(AlertType::Fail, 3000)
}

#[utoipa::path(
    post,
    path = "/file-sets",
    params(SaveFileSetQuery),
    request_body(
        content = String,
        content_type = "multipart/form-data",
        description = "fileSetId, processCmds, jsonData and file parts named id|uploadId|name.ext"
    ),
    responses(
        (status = 200, description = "Commands applied", body = FileProcessResult),
        (status = 400, description = "Rejected upload or command"),
        (status = 413, description = "File too large")
    ),
    tag = "file-sets"
)]
pub async fn save_file_set(
    State(state): State<AppState>,
    Query(query): Query<SaveFileSetQuery>,
    mut multipart: Multipart,
) -> Result<Json<FileProcessResult>, AppError> {
    let mut processor = state.file_store.processor(FileProcessOption {
        max_file_count: query.max_file_count,
    });

    // Drain the whole body before any row lock is taken
    let staged = match processor.stage(&mut multipart).await {
        Ok(staged) => staged,
        Err(e) => {
            // Consume the remaining stream so the client sees the error, not a reset
            tracing::warn!("Upload failed early: {}. Consuming remaining stream...", e);
            while let Ok(Some(mut field)) = multipart.next_field().await {
                while let Ok(Some(_)) = field.chunk().await {}
            }
            // Nothing was stored yet; only staged uploads need removing
            if let Err(cleanup) = processor.finish().await {
                tracing::warn!("Failed to remove staged uploads: {}", cleanup);
            }
            return Err(e);
        }
    };

    let txn = state.db.begin().await?;
    match processor.sync_with_file_system(&txn, staged).await {
        Ok(result) => {
            if let Err(e) = txn.commit().await {
                reset_quietly(processor).await;
                return Err(e.into());
            }
            if let Err(e) = processor.finish().await {
                tracing::warn!("Post-commit cleanup failed: {}", e);
            }
            tracing::info!("💾 Saved file set {:?}", result.file_set_id);
            Ok(Json(result))
        }
        Err(e) => {
            reset_quietly(processor).await;
            if let Err(rollback) = txn.rollback().await {
                tracing::error!("Rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}

#[utoipa::path(
    delete,
    path = "/file-sets/{id}",
    params(
        ("id" = i32, Path, description = "File set ID")
    ),
    responses(
        (status = 204, description = "File set removed (or already absent)")
    ),
    tag = "file-sets"
)]
pub async fn destroy_file_set(
    State(state): State<AppState>,
    Path(file_set_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let mut processor = state.file_store.processor(FileProcessOption::default());
    let txn = state.db.begin().await?;

    if let Err(e) = processor.destroy(&txn, Some(file_set_id)).await {
        reset_quietly(processor).await;
        if let Err(rollback) = txn.rollback().await {
            tracing::error!("Rollback failed: {}", rollback);
        }
        return Err(e);
    }

    if let Err(e) = txn.commit().await {
        reset_quietly(processor).await;
        return Err(e.into());
    }
    if let Err(e) = processor.finish().await {
        tracing::warn!("Post-commit cleanup failed: {}", e);
    }

    tracing::info!("🗑️  Destroyed file set {}", file_set_id);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/file-sets/{id}",
    params(
        ("id" = i32, Path, description = "File set ID")
    ),
    responses(
        (status = 200, description = "Visible files of the set", body = FileSetResponse),
        (status = 404, description = "File set not found")
    ),
    tag = "file-sets"
)]
pub async fn get_file_set(
    State(state): State<AppState>,
    Path(file_set_id): Path<i32>,
) -> Result<Json<FileSetResponse>, AppError> {
    let repo = state.file_store.repository();
    let file_set = repo
        .find_file_set(&state.db, file_set_id)
        .await?
        .ok_or_else(attachments_gone)?;

    let files = repo.find_visible_files(&state.db, file_set.id).await?;
    if files.is_empty() {
        return Err(attachments_gone().into());
    }

    Ok(Json(FileSetResponse {
        files: files.into_iter().map(FileResponse::from).collect(),
        created_at: file_set.created_at,
        updated_at: file_set.updated_at,
    }))
}

#[utoipa::path(
    get,
    path = "/files/{id}/download",
    params(
        ("id" = i32, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "File content stream"),
        (status = 404, description = "File not found")
    ),
    tag = "file-sets"
)]
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<i32>,
) -> Result<Response, AppError> {
    let (file, file_set) = state
        .file_store
        .repository()
        .find_file_with_set(&state.db, file_id)
        .await?
        .ok_or_else(|| {
            ControlledError::new("The file was deleted or does not exist.")
                .with_status(StatusCode::NOT_FOUND)
                .with_alert(AlertType::Fail, 3000)
        })?;

    let path = state
        .file_store
        .roots()
        .file_set_dir(&file_set.base_path_key, file_set.id)?
        .join(file.stored_name());

    let mut handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!("File {} has a row but no bytes at {:?}", file.id, path);
            return Err(ControlledError::new("The file was deleted or does not exist.")
                .with_status(StatusCode::NOT_FOUND)
                .into());
        }
        Err(e) => return Err(e.into()),
    };

    let mut header_buf = [0u8; 512];
    let n = handle.read(&mut header_buf).await?;
    handle.seek(SeekFrom::Start(0)).await?;
    let content_type = infer::get(&header_buf[..n])
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

    let content_disposition = content_disposition(&file, Utc::now());
    let stream = tokio_util::io::ReaderStream::new(handle);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

#[utoipa::path(
    get,
    path = "/file-sets/{id}/thumbnails",
    params(
        ("id" = i32, Path, description = "File set ID")
    ),
    responses(
        (status = 200, description = "Zip of the set's thumbnails, entries named <id>_<order>"),
        (status = 404, description = "File set not found")
    ),
    tag = "file-sets"
)]
pub async fn download_thumbnails(
    State(state): State<AppState>,
    Path(file_set_id): Path<i32>,
) -> Result<Response, AppError> {
    let repo = state.file_store.repository();
    let file_set = repo
        .find_file_set(&state.db, file_set_id)
        .await?
        .ok_or_else(attachments_gone)?;

    let dir = state
        .file_store
        .roots()
        .file_set_dir(&file_set.base_path_key, file_set.id)?;
    let entries = repo
        .find_set_thumbnails(&state.db, file_set.id)
        .await?
        .into_iter()
        .map(|thumbnail| ArchiveEntry {
            name: thumbnail_entry_name(&thumbnail),
            path: dir.join(thumbnail.stored_name()),
        })
        .collect::<Vec<_>>();

    tracing::debug!("Archiving {} thumbnail(s) of file set {}", entries.len(), file_set.id);
    let archive = zip_entries(entries).await?;
    zip_response(archive, &format!("thumbnails_{}.zip", file_set.id))
}

#[utoipa::path(
    get,
    path = "/files/{id}/image",
    params(
        ("id" = i32, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "Zip holding the stored image under its id"),
        (status = 404, description = "Image not found")
    ),
    tag = "file-sets"
)]
pub async fn download_image(
    State(state): State<AppState>,
    Path(file_id): Path<i32>,
) -> Result<Response, AppError> {
    let image_gone = || {
        ControlledError::new("The image was deleted or does not exist.")
            .with_status(StatusCode::NOT_FOUND)
            .with_alert(AlertType::Fail, 3000)
    };

    let (file, file_set) = state
        .file_store
        .repository()
        .find_file_with_set(&state.db, file_id)
        .await?
        .ok_or_else(image_gone)?;

    let path = state
        .file_store
        .roots()
        .file_set_dir(&file_set.base_path_key, file_set.id)?
        .join(file.stored_name());
    if !tokio::fs::try_exists(&path).await? {
        tracing::error!("File {} has a row but no bytes at {:?}", file.id, path);
        return Err(image_gone().into());
    }

    let archive = zip_entries(vec![ArchiveEntry {
        name: file.id.to_string(),
        path,
    }])
    .await?;
    zip_response(archive, &format!("image_{}.zip", file.id))
}

fn thumbnail_entry_name(thumbnail: &files::Model) -> String {
    match thumbnail.sort_order {
        Some(order) => format!("{}_{}", thumbnail.id, order),
        None => format!("{}_null", thumbnail.id),
    }
}

fn zip_response(archive: Vec<u8>, filename: &str) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(archive))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// `attachment` header carrying `<name>_<yyyyMMddHHmmss><ext>`.
fn content_disposition(file: &files::Model, now: DateTime<Utc>) -> String {
    let filename = format!(
        "{}_{}{}",
        file.original_name,
        now.format("%Y%m%d%H%M%S"),
        file.extension
    );

    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .take(64)
        .collect::<String>();
    let fallback_filename = if ascii_filename.is_empty() {
        "file"
    } else {
        &ascii_filename
    };
    let encoded_filename = utf8_percent_encode(&filename, NON_ALPHANUMERIC).to_string();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    )
}

async fn reset_quietly(processor: FileProcessor) {
    if let Err(e) = processor.reset().await {
        tracing::error!("Failed to reset file system changes: {}", e);
    }
}
