use crate::api::error::AppError;
use crate::entities::{file_sets, files};
use crate::services::file_set_repository::{FileSetRepository, NewFile};
use crate::services::storage::{move_file, remove_file_if_exists};
use crate::services::thumbnail_service::ThumbnailService;
use crate::utils::validation::is_image_extension;
use sea_orm::DatabaseTransaction;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

use super::Ledger;
use super::types::{FileMeta, FileProcessCmd};

pub enum DeleteTarget {
    Model(files::Model),
    Id(i32),
}

/// Physical effects of single commands against one locked file set.
pub struct FileCrud<'a> {
    pub(super) repo: &'a dyn FileSetRepository,
    pub(super) txn: &'a DatabaseTransaction,
    pub(super) file_set: &'a file_sets::Model,
    pub(super) dir: &'a Path,
    pub(super) temp_root: &'a Path,
    pub(super) thumbnails: &'a ThumbnailService,
    pub(super) ledger: &'a Ledger,
}

impl FileCrud<'_> {
    /// Inserts the row, moves the staged upload to `<dir>/<id><ext>` and,
    /// for images, stores the thumbnail row and file as well.
    pub async fn create_file(
        &self,
        meta: &FileMeta,
        cmd: &FileProcessCmd,
    ) -> Result<files::Model, AppError> {
        let is_image = is_image_extension(&meta.ext);

        let created = self
            .repo
            .create_file(
                self.txn,
                NewFile {
                    file_set_id: self.file_set.id,
                    origin_id: None,
                    sort_order: cmd.order,
                    is_image,
                    save_name: None,
                    original_name: meta.file_name.clone(),
                    extension: meta.ext.clone(),
                },
            )
            .await?;

        let dest = self.dir.join(created.stored_name());
        self.ledger.push_saved(dest.clone());
        move_file(&meta.temp_file_path, &dest).await?;
        debug!("Stored file {} at {:?}", created.id, dest);

        if is_image {
            self.create_thumbnail(&created, &dest).await?;
        }

        Ok(created)
    }

    async fn create_thumbnail(
        &self,
        origin: &files::Model,
        origin_path: &Path,
    ) -> Result<files::Model, AppError> {
        let bytes = self
            .thumbnails
            .generate(origin_path, &origin.extension)
            .await?;

        let save_name = format!("thumb_{}", origin.save_name);
        let thumb_path = self.dir.join(format!("{}{}", save_name, origin.extension));
        self.ledger.push_saved(thumb_path.clone());
        tokio::fs::write(&thumb_path, bytes).await?;

        let thumbnail = self
            .repo
            .create_file(
                self.txn,
                NewFile {
                    file_set_id: self.file_set.id,
                    origin_id: Some(origin.id),
                    sort_order: origin.sort_order,
                    is_image: true,
                    save_name: Some(save_name),
                    original_name: origin.original_name.clone(),
                    extension: origin.extension.clone(),
                },
            )
            .await?;

        debug!("Stored thumbnail {} of file {}", thumbnail.id, origin.id);
        Ok(thumbnail)
    }

    /// Backs up and removes one file. Deleting an original removes its
    /// thumbnails first. A missing row is a no-op.
    pub async fn delete_file(&self, target: DeleteTarget) -> Result<(), AppError> {
        let file = match target {
            DeleteTarget::Model(file) => file,
            DeleteTarget::Id(id) => match self.repo.locked_find_file(self.txn, id).await? {
                Some(file) => file,
                None => {
                    debug!("File {} already gone, nothing to delete", id);
                    return Ok(());
                }
            },
        };

        if !self.owns(&file) {
            return Ok(());
        }

        if !file.is_thumbnail() {
            for thumbnail in self.repo.locked_find_thumbnails(self.txn, file.id).await? {
                self.backup_and_remove(thumbnail).await?;
            }
        }

        self.backup_and_remove(file).await
    }

    async fn backup_and_remove(&self, file: files::Model) -> Result<(), AppError> {
        let stored_name = file.stored_name();
        let path = self.dir.join(&stored_name);
        let backup = self.temp_root.join(&stored_name);

        match tokio::fs::copy(&path, &backup).await {
            Ok(_) => self.ledger.push_deleted(backup),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("File {} has no bytes at {:?}, deleting row only", file.id, path);
            }
            Err(e) => return Err(e.into()),
        }

        self.repo.delete_file(self.txn, file.id).await?;
        remove_file_if_exists(&path).await?;
        debug!("Deleted file {} ({:?})", file.id, path);
        Ok(())
    }

    /// Reorders `id` and `originId`. Thumbnails follow their original.
    pub async fn edit_file(&self, cmd: &FileProcessCmd) -> Result<(), AppError> {
        for id in [cmd.id, cmd.origin_id].into_iter().flatten() {
            let Some(file) = self.repo.locked_find_file(self.txn, id).await? else {
                debug!("File {} not found, nothing to edit", id);
                continue;
            };
            if !self.owns(&file) {
                continue;
            }

            let file = self.repo.update_file_order(self.txn, file, cmd.order).await?;
            if !file.is_thumbnail() {
                for thumbnail in self.repo.locked_find_thumbnails(self.txn, file.id).await? {
                    self.repo
                        .update_file_order(self.txn, thumbnail, cmd.order)
                        .await?;
                }
            }
        }
        Ok(())
    }

    fn owns(&self, file: &files::Model) -> bool {
        if file.file_set_id == self.file_set.id {
            return true;
        }
        warn!(
            "File {} belongs to file set {}, not {}; ignoring",
            file.id, file.file_set_id, self.file_set.id
        );
        false
    }
}
