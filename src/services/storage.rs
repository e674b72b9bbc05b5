use crate::api::error::AppError;
use crate::config::{FILE_BASE_DEFAULT, StorageConfig, TEST_FILE_BASE_DEFAULT};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Maps the `base_path_key` stored on every file set to a directory on disk.
///
/// A file set keeps the key it was created under, so rows written while the
/// production root was active still resolve after the active key changes.
#[derive(Debug, Clone)]
pub struct StorageRoots {
    roots: HashMap<String, PathBuf>,
    active_key: &'static str,
    temp_root: PathBuf,
}

impl StorageRoots {
    pub fn new(
        roots: HashMap<String, PathBuf>,
        active_key: &'static str,
        temp_root: PathBuf,
    ) -> Self {
        Self {
            roots,
            active_key,
            temp_root,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        let mut roots = HashMap::new();
        roots.insert(
            FILE_BASE_DEFAULT.to_string(),
            config.file_base_default.clone(),
        );
        roots.insert(
            TEST_FILE_BASE_DEFAULT.to_string(),
            config.test_file_base_default.clone(),
        );
        Self::new(
            roots,
            config.active_base_path_key(),
            config.active_temp_root().clone(),
        )
    }

    /// Key new file sets are created under
    pub fn active_key(&self) -> &'static str {
        self.active_key
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn resolve(&self, base_path_key: &str) -> Result<&Path, AppError> {
        self.roots
            .get(base_path_key)
            .map(PathBuf::as_path)
            .ok_or_else(|| {
                AppError::Internal(format!("Unknown storage root key: {}", base_path_key))
            })
    }

    /// `<root>/<fileSetId>`
    pub fn file_set_dir(&self, base_path_key: &str, file_set_id: i32) -> Result<PathBuf, AppError> {
        Ok(self.resolve(base_path_key)?.join(file_set_id.to_string()))
    }

    pub fn temp_path(&self, file_name: &str) -> PathBuf {
        self.temp_root.join(file_name)
    }

    pub fn all_roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.values().map(PathBuf::as_path)
    }
}

/// Removes a file, treating an already missing file as success.
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Removes a directory tree, treating an already missing directory as success.
pub async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Moves `from` to `to`, overwriting. Falls back to copy + remove when the two
/// paths live on different filesystems.
pub async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(e) => {
            tracing::debug!("rename {:?} -> {:?} failed ({}), copying instead", from, to, e);
            tokio::fs::copy(from, to).await?;
            remove_file_if_exists(from).await
        }
    }
}

pub async fn is_dir_empty(path: &Path) -> std::io::Result<bool> {
    let mut entries = tokio::fs::read_dir(path).await?;
    Ok(entries.next_entry().await?.is_none())
}
