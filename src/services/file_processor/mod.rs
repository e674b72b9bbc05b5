use crate::api::error::{AppError, ControlledError};
use crate::config::StorageConfig;
use crate::entities::{file_sets, files};
use crate::services::file_set_repository::{FileSetRepository, SeaOrmFileSetRepository};
use crate::services::storage::{
    StorageRoots, is_dir_empty, remove_dir_if_exists, remove_file_if_exists,
};
use crate::services::thumbnail_service::ThumbnailService;
use axum::extract::Multipart;
use futures::future::join_all;
use sea_orm::DatabaseTransaction;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub mod crud;
pub mod types;
pub mod upload;

pub use crud::{DeleteTarget, FileCrud};
pub use types::*;
pub use upload::StagedUpload;

#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_file_size: usize,
    pub max_filename_length: usize,
}

impl UploadLimits {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_file_size: config.max_upload_size,
            max_filename_length: config.max_filename_length,
        }
    }
}

/// Shared, long-lived dependencies. Hands out one [`FileProcessor`] per operation.
#[derive(Clone)]
pub struct FileStore {
    repo: Arc<dyn FileSetRepository>,
    roots: Arc<StorageRoots>,
    thumbnails: ThumbnailService,
    limits: UploadLimits,
}

impl FileStore {
    pub fn new(
        repo: Arc<dyn FileSetRepository>,
        roots: Arc<StorageRoots>,
        thumbnails: ThumbnailService,
        limits: UploadLimits,
    ) -> Self {
        Self {
            repo,
            roots,
            thumbnails,
            limits,
        }
    }

    pub fn from_config(roots: Arc<StorageRoots>, config: &StorageConfig) -> Self {
        Self::new(
            Arc::new(SeaOrmFileSetRepository::new()),
            roots,
            ThumbnailService::from_config(config),
            UploadLimits::from_config(config),
        )
    }

    pub fn processor(&self, option: FileProcessOption) -> FileProcessor {
        FileProcessor {
            store: self.clone(),
            option,
            ledger: Ledger::default(),
            file_set_dir: None,
        }
    }

    pub fn repository(&self) -> &dyn FileSetRepository {
        self.repo.as_ref()
    }

    pub fn roots(&self) -> &StorageRoots {
        &self.roots
    }
}

/// Paths touched by one operation, appended to from concurrent branches.
#[derive(Debug, Default)]
pub struct Ledger(Mutex<FilePaths>);

impl Ledger {
    fn lock(&self) -> MutexGuard<'_, FilePaths> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_temp(&self, path: PathBuf) {
        self.lock().temp.push(path);
    }

    pub fn push_deleted(&self, path: PathBuf) {
        self.lock().deleted.push(path);
    }

    pub fn push_saved(&self, path: PathBuf) {
        self.lock().saved.push(path);
    }

    pub fn snapshot(&self) -> FilePaths {
        self.lock().clone()
    }

    fn into_inner(self) -> FilePaths {
        self.0
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
enum Work<'m> {
    Create(&'m FileMeta, &'m FileProcessCmd),
    Delete(i32),
    Edit(&'m FileProcessCmd),
}

/// One staging operation bound to the caller's transaction.
///
/// ```ignore
/// let txn = db.begin().await?;
/// let mut processor = store.processor(FileProcessOption::default());
/// match processor.save(&txn, &mut multipart).await {
///     Ok(result) => {
///         txn.commit().await?;
///         processor.finish().await?;
///     }
///     Err(e) => {
///         processor.reset().await?;
///         txn.rollback().await?;
///     }
/// }
/// ```
pub struct FileProcessor {
    store: FileStore,
    option: FileProcessOption,
    ledger: Ledger,
    file_set_dir: Option<PathBuf>,
}

impl FileProcessor {
    /// Stages the upload, applies its commands to the target file set and
    /// removes the set if it ended up empty.
    pub async fn save(
        &mut self,
        txn: &DatabaseTransaction,
        multipart: &mut Multipart,
    ) -> Result<FileProcessResult, AppError> {
        let staged = self.stage(multipart).await?;
        self.sync_with_file_system(txn, staged).await
    }

    /// Applies already staged uploads. Split from [`save`](Self::save) so the
    /// body can be drained before any lock is taken.
    pub async fn sync_with_file_system(
        &mut self,
        txn: &DatabaseTransaction,
        staged: StagedUpload,
    ) -> Result<FileProcessResult, AppError> {
        let store = self.store.clone();
        let repo = store.repository();
        let cmds = staged.process_cmds.unwrap_or_default();

        let file_set = self.get_or_create_file_set(txn, staged.file_set_id).await?;
        let dir = store
            .roots
            .file_set_dir(&file_set.base_path_key, file_set.id)?;
        self.file_set_dir = Some(dir.clone());

        let existing = repo.locked_find_files_by_set(txn, file_set.id).await?;
        let to_be_file_count = self.validate_file_count(&cmds, &existing)?;
        let works = resolve_commands(&cmds, &staged.files, &existing)?;

        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::create_dir_all(store.roots.temp_root()).await?;

        let crud = FileCrud {
            repo,
            txn,
            file_set: &file_set,
            dir: &dir,
            temp_root: store.roots.temp_root(),
            thumbnails: &store.thumbnails,
            ledger: &self.ledger,
        };

        let results = join_all(works.into_iter().map(|work| execute(&crud, work))).await;
        results.into_iter().collect::<Result<Vec<()>, AppError>>()?;

        let remaining = repo.locked_find_files_by_set(txn, file_set.id).await?;
        let file_set_id = if remaining.is_empty() {
            info!(
                "File set {} is empty (expected {}), removing it",
                file_set.id, to_be_file_count
            );
            repo.delete_file_set(txn, file_set.id).await?;
            remove_dir_if_exists(&dir).await?;
            None
        } else {
            Some(file_set.id)
        };

        Ok(FileProcessResult {
            file_set_id,
            data: staged.json_data.unwrap_or(serde_json::Value::Null),
        })
    }

    /// Deletes a whole file set. Unknown or absent ids are a no-op.
    pub async fn destroy(
        &mut self,
        txn: &DatabaseTransaction,
        file_set_id: Option<i32>,
    ) -> Result<(), AppError> {
        let Some(file_set_id) = file_set_id else {
            return Ok(());
        };

        let store = self.store.clone();
        let repo = store.repository();
        let Some(file_set) = repo.locked_find_by_id(txn, file_set_id).await? else {
            debug!("File set {} not found, nothing to destroy", file_set_id);
            return Ok(());
        };

        let dir = store
            .roots
            .file_set_dir(&file_set.base_path_key, file_set.id)?;
        self.file_set_dir = Some(dir.clone());
        tokio::fs::create_dir_all(store.roots.temp_root()).await?;

        let files = repo.locked_find_files_by_set(txn, file_set.id).await?;
        let file_count = files.len();
        let origin_ids: HashSet<i32> = files
            .iter()
            .filter(|f| !f.is_thumbnail())
            .map(|f| f.id)
            .collect();

        let crud = FileCrud {
            repo,
            txn,
            file_set: &file_set,
            dir: &dir,
            temp_root: store.roots.temp_root(),
            thumbnails: &store.thumbnails,
            ledger: &self.ledger,
        };

        // Originals take their thumbnails with them
        let targets = files
            .into_iter()
            .filter(|f| f.origin_id.is_none_or(|origin| !origin_ids.contains(&origin)));
        let results = join_all(targets.map(|f| crud.delete_file(DeleteTarget::Model(f)))).await;
        results.into_iter().collect::<Result<Vec<()>, AppError>>()?;

        repo.delete_file_set(txn, file_set.id).await?;
        remove_dir_if_exists(&dir).await?;

        info!("Destroyed file set {} ({} files)", file_set.id, file_count);
        Ok(())
    }

    /// Post-commit cleanup: drops staged uploads and delete backups.
    pub async fn finish(self) -> Result<(), AppError> {
        let paths = self.ledger.into_inner();
        debug!(
            "Finishing: {} temp, {} backups",
            paths.temp.len(),
            paths.deleted.len()
        );
        remove_all(paths.temp.iter().chain(paths.deleted.iter())).await
    }

    /// Post-rollback cleanup: removes newly stored files and restores backups
    /// into the file set directory.
    pub async fn reset(self) -> Result<(), AppError> {
        let paths = self.ledger.into_inner();
        remove_all(paths.saved.iter()).await?;

        let Some(dir) = self.file_set_dir else {
            return Ok(());
        };

        if !paths.deleted.is_empty() {
            tokio::fs::create_dir_all(&dir).await?;
            let restores = paths.deleted.iter().map(|backup| restore(backup, &dir));
            join_all(restores)
                .await
                .into_iter()
                .collect::<Result<Vec<()>, AppError>>()?;
        }

        if tokio::fs::try_exists(&dir).await? && is_dir_empty(&dir).await? {
            remove_dir_if_exists(&dir).await?;
        }

        info!(
            "Reset {:?}: removed {} stored, restored {}",
            dir,
            paths.saved.len(),
            paths.deleted.len()
        );
        Ok(())
    }

    /// Paths recorded so far.
    pub fn paths(&self) -> FilePaths {
        self.ledger.snapshot()
    }

    pub fn file_set_dir(&self) -> Option<&Path> {
        self.file_set_dir.as_deref()
    }

    async fn get_or_create_file_set(
        &self,
        txn: &DatabaseTransaction,
        file_set_id: Option<i32>,
    ) -> Result<file_sets::Model, AppError> {
        let repo = self.store.repository();

        if let Some(id) = file_set_id
            && let Some(file_set) = repo.locked_find_by_id(txn, id).await?
        {
            return Ok(file_set);
        }

        let key = self.store.roots.active_key();
        let file_set = repo.create_with_base_path_key(txn, key).await?;
        debug!("Created file set {} under {}", file_set.id, key);
        Ok(file_set)
    }

    fn validate_file_count(
        &self,
        cmds: &[FileProcessCmd],
        existing: &[files::Model],
    ) -> Result<i64, AppError> {
        let current = existing.iter().filter(|f| !f.is_thumbnail()).count() as i64;
        let creates = cmds
            .iter()
            .filter(|cmd| cmd.work_type == ProcessWorkType::Create)
            .count() as i64;
        let deletes = deleted_originals(cmds, existing).len() as i64;
        let to_be_file_count = current + creates - deletes;

        if let Some(max) = self.option.max_file_count
            && to_be_file_count > max as i64
        {
            warn!(
                "Rejecting operation: {} files would exceed the limit of {}",
                to_be_file_count, max
            );
            return Err(ControlledError::warn(format!("You can upload at most {} files.", max)).into());
        }

        Ok(to_be_file_count)
    }
}

/// Turns commands into work items. Every CREATE must name a staged upload,
/// and a thumbnail is never deleted on its own when its original is.
fn resolve_commands<'m>(
    cmds: &'m [FileProcessCmd],
    uploads: &'m HashMap<UploadId, FileMeta>,
    existing: &[files::Model],
) -> Result<Vec<Work<'m>>, AppError> {
    let mut works = Vec::with_capacity(cmds.len());
    let mut delete_ids = Vec::new();

    for cmd in cmds {
        match cmd.work_type {
            ProcessWorkType::Create => {
                let meta = cmd
                    .upload_id
                    .as_ref()
                    .and_then(|upload_id| uploads.get(upload_id))
                    .ok_or_else(|| {
                        ControlledError::new(format!(
                            "No uploaded file for uploadId {}",
                            cmd.upload_id.as_deref().unwrap_or("(none)")
                        ))
                    })?;
                works.push(Work::Create(meta, cmd));
            }
            ProcessWorkType::Delete => {
                for id in [cmd.id, cmd.origin_id].into_iter().flatten() {
                    if !delete_ids.contains(&id) {
                        delete_ids.push(id);
                    }
                }
            }
            ProcessWorkType::Edit => works.push(Work::Edit(cmd)),
        }
    }

    let origin_of: HashMap<i32, i32> = existing
        .iter()
        .filter_map(|f| f.origin_id.map(|origin| (f.id, origin)))
        .collect();
    works.extend(
        delete_ids
            .iter()
            .filter(|id| {
                origin_of
                    .get(*id)
                    .is_none_or(|origin| !delete_ids.contains(origin))
            })
            .map(|&id| Work::Delete(id)),
    );

    Ok(works)
}

/// Originals of this set that the DELETE commands actually remove.
///
/// Ids of other sets or of missing rows remove nothing, and a thumbnail id
/// stands for its original.
fn deleted_originals(cmds: &[FileProcessCmd], existing: &[files::Model]) -> HashSet<i32> {
    let rows: HashMap<i32, &files::Model> = existing.iter().map(|f| (f.id, f)).collect();

    cmds.iter()
        .filter(|cmd| cmd.work_type == ProcessWorkType::Delete)
        .flat_map(|cmd| [cmd.id, cmd.origin_id].into_iter().flatten())
        .filter_map(|id| {
            let row = rows.get(&id)?;
            match row.origin_id {
                Some(origin) => rows.get(&origin).map(|origin| origin.id),
                None => Some(row.id),
            }
        })
        .collect()
}

async fn execute(crud: &FileCrud<'_>, work: Work<'_>) -> Result<(), AppError> {
    match work {
        Work::Create(meta, cmd) => crud.create_file(meta, cmd).await.map(|_| ()),
        Work::Delete(id) => crud.delete_file(DeleteTarget::Id(id)).await,
        Work::Edit(cmd) => crud.edit_file(cmd).await,
    }
}

async fn remove_all<'p>(paths: impl Iterator<Item = &'p PathBuf>) -> Result<(), AppError> {
    let results = join_all(paths.map(|path| remove_file_if_exists(path))).await;
    for result in results {
        result?;
    }
    Ok(())
}

async fn restore(backup: &Path, dir: &Path) -> Result<(), AppError> {
    let Some(name) = backup.file_name() else {
        return Ok(());
    };
    tokio::fs::copy(backup, dir.join(name)).await?;
    remove_file_if_exists(backup).await?;
    Ok(())
}
