use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

pub type UploadId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessWorkType {
    Create,
    Delete,
    Edit,
}

/// One mutation requested by the client, sent as a JSON array in `processCmds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessCmd {
    pub work_type: ProcessWorkType,
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub origin_id: Option<i32>,
    #[serde(default)]
    pub upload_id: Option<UploadId>,
    #[serde(default)]
    pub order: Option<i32>,
}

/// What the encoded part filename `id|uploadId|name.ext` carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFileMeta {
    pub id: Option<i32>,
    pub upload_id: UploadId,
    pub file_name: String,
    pub ext: String,
}

/// A staged upload waiting in the temp root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub id: Option<i32>,
    pub upload_id: UploadId,
    pub file_name: String,
    pub ext: String,
    pub temp_file_path: PathBuf,
}

/// Compensation log of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePaths {
    /// Staged uploads
    pub temp: Vec<PathBuf>,
    /// Backups of removed files
    pub deleted: Vec<PathBuf>,
    /// Files newly written to final storage
    pub saved: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessResult {
    /// `null` when the operation left the set empty and it was removed
    pub file_set_id: Option<i32>,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileProcessOption {
    pub max_file_count: Option<usize>,
}

impl FileProcessOption {
    pub fn with_max_file_count(max_file_count: usize) -> Self {
        Self {
            max_file_count: Some(max_file_count),
        }
    }
}
