use crate::api::error::{AppError, ControlledError};
use crate::services::storage::remove_file_if_exists;
use crate::utils::validation::{
    split_extension, validate_extension, validate_file_size, validate_filename_length,
};
use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::FileProcessor;
use super::types::{FileMeta, FileProcessCmd, RawFileMeta, UploadId};

/// Everything read from one multipart body.
#[derive(Debug, Default)]
pub struct StagedUpload {
    pub file_set_id: Option<i32>,
    pub process_cmds: Option<Vec<FileProcessCmd>>,
    pub json_data: Option<serde_json::Value>,
    pub files: HashMap<UploadId, FileMeta>,
}

/// Decodes a part filename of the form `id|uploadId|name.ext`.
///
/// Segments after the second `|` belong to the name. A non-numeric id means
/// the part has no pre-existing row.
pub fn extract_raw_file_meta(encoded: &str) -> RawFileMeta {
    let mut segments = encoded.splitn(3, '|');
    let id = segments.next().and_then(|s| s.trim().parse::<i32>().ok());
    let upload_id = segments.next().unwrap_or_default().to_string();
    let name_with_ext = segments.next().unwrap_or_default();
    let (file_name, ext) = split_extension(name_with_ext);

    RawFileMeta {
        id,
        upload_id,
        file_name: file_name.to_string(),
        ext: ext.to_string(),
    }
}

pub(crate) fn multipart_error(e: MultipartError) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        ControlledError::warn("Request body exceeds the maximum allowed limit")
            .with_status(StatusCode::PAYLOAD_TOO_LARGE)
            .into()
    } else {
        AppError::Multipart(err_msg)
    }
}

impl FileProcessor {
    /// Drains the multipart body, staging every file part in the temp root.
    ///
    /// Files are keyed by upload id and commands are left unresolved, so the
    /// fields may arrive in any order.
    pub async fn stage(&self, multipart: &mut Multipart) -> Result<StagedUpload, AppError> {
        let mut staged = StagedUpload::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if let Some(encoded) = field.file_name().map(str::to_string) {
                let meta = self.stage_file(&encoded, field).await?;
                debug!("Staged upload {} at {:?}", meta.upload_id, meta.temp_file_path);
                staged.files.insert(meta.upload_id.clone(), meta);
                continue;
            }

            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "fileSetId" if staged.file_set_id.is_none() => {
                    let text = field.text().await.map_err(multipart_error)?;
                    staged.file_set_id = parse_file_set_id(&text)?;
                }
                "processCmds" if staged.process_cmds.is_none() => {
                    let text = field.text().await.map_err(multipart_error)?;
                    let cmds = serde_json::from_str(&text).map_err(|e| {
                        ControlledError::new(format!("processCmds could not be read: {}", e))
                    })?;
                    staged.process_cmds = Some(cmds);
                }
                "jsonData" if staged.json_data.is_none() => {
                    let text = field.text().await.map_err(multipart_error)?;
                    let data = serde_json::from_str(&text).map_err(|e| {
                        ControlledError::new(format!("jsonData could not be read: {}", e))
                    })?;
                    staged.json_data = Some(data);
                }
                _ => {
                    debug!("Ignoring multipart field '{}'", name);
                }
            }
        }

        info!(
            "Staged {} file(s), {} command(s)",
            staged.files.len(),
            staged.process_cmds.as_ref().map_or(0, Vec::len)
        );
        Ok(staged)
    }

    async fn stage_file(&self, encoded: &str, field: Field<'_>) -> Result<FileMeta, AppError> {
        let raw = extract_raw_file_meta(encoded);
        let display_name = format!("{}{}", raw.file_name, raw.ext);
        let limits = self.store.limits;

        validate_filename_length(encoded, &display_name, limits.max_filename_length)
            .map_err(ControlledError::from)?;
        validate_extension(&raw.ext, &display_name).map_err(ControlledError::from)?;

        let temp_root = self.store.roots.temp_root();
        tokio::fs::create_dir_all(temp_root).await?;
        let temp_file_path = temp_root.join(format!("{}{}", Uuid::new_v4(), raw.ext));

        match write_capped(field, &temp_file_path, limits.max_file_size, &display_name).await {
            Ok(size) => {
                debug!("Wrote {} bytes for '{}'", size, display_name);
                self.ledger.push_temp(temp_file_path.clone());
            }
            Err(e) => {
                if let Err(cleanup) = remove_file_if_exists(&temp_file_path).await {
                    warn!(
                        "Failed to remove partial upload {:?}: {}",
                        temp_file_path, cleanup
                    );
                }
                return Err(e);
            }
        }

        Ok(FileMeta {
            id: raw.id,
            upload_id: raw.upload_id,
            file_name: raw.file_name,
            ext: raw.ext,
            temp_file_path,
        })
    }
}

async fn write_capped(
    mut field: Field<'_>,
    path: &Path,
    max_size: usize,
    display_name: &str,
) -> Result<usize, AppError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0usize;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len();
        validate_file_size(written, max_size, display_name).map_err(ControlledError::from)?;
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(written)
}

fn parse_file_set_id(text: &str) -> Result<Option<i32>, AppError> {
    let text = text.trim();
    if text.is_empty() || text == "null" || text == "undefined" {
        return Ok(None);
    }
    text.parse::<i32>()
        .map(Some)
        .map_err(|_| ControlledError::new(format!("fileSetId is not a number: {}", text)).into())
}
