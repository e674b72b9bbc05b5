use crate::entities::{file_sets, files, prelude::*};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

/// Values for a new `files` row.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub file_set_id: i32,
    pub origin_id: Option<i32>,
    pub sort_order: Option<i32>,
    pub is_image: bool,
    /// `None` names the row after its own id once inserted
    pub save_name: Option<String>,
    pub original_name: String,
    pub extension: String,
}

/// Persistence for file sets and their files.
///
/// Every mutating method runs on the caller's transaction; `locked_*` reads
/// take a row lock (`SELECT ... FOR UPDATE`) held until that transaction ends.
#[async_trait]
pub trait FileSetRepository: Send + Sync {
    async fn locked_find_by_id(
        &self,
        txn: &DatabaseTransaction,
        file_set_id: i32,
    ) -> Result<Option<file_sets::Model>, DbErr>;

    async fn create_with_base_path_key(
        &self,
        txn: &DatabaseTransaction,
        base_path_key: &str,
    ) -> Result<file_sets::Model, DbErr>;

    async fn locked_find_files_by_set(
        &self,
        txn: &DatabaseTransaction,
        file_set_id: i32,
    ) -> Result<Vec<files::Model>, DbErr>;

    async fn locked_find_file(
        &self,
        txn: &DatabaseTransaction,
        file_id: i32,
    ) -> Result<Option<files::Model>, DbErr>;

    async fn locked_find_thumbnails(
        &self,
        txn: &DatabaseTransaction,
        origin_id: i32,
    ) -> Result<Vec<files::Model>, DbErr>;

    async fn create_file(
        &self,
        txn: &DatabaseTransaction,
        new_file: NewFile,
    ) -> Result<files::Model, DbErr>;

    async fn update_file_order(
        &self,
        txn: &DatabaseTransaction,
        file: files::Model,
        sort_order: Option<i32>,
    ) -> Result<files::Model, DbErr>;

    async fn delete_file(&self, txn: &DatabaseTransaction, file_id: i32) -> Result<(), DbErr>;

    async fn delete_file_set(
        &self,
        txn: &DatabaseTransaction,
        file_set_id: i32,
    ) -> Result<(), DbErr>;

    /// Files a client displays: thumbnails for images, originals otherwise.
    async fn find_visible_files(
        &self,
        db: &DatabaseConnection,
        file_set_id: i32,
    ) -> Result<Vec<files::Model>, DbErr>;

    /// Thumbnail rows of a set by display order.
    async fn find_set_thumbnails(
        &self,
        db: &DatabaseConnection,
        file_set_id: i32,
    ) -> Result<Vec<files::Model>, DbErr>;

    async fn find_file_set(
        &self,
        db: &DatabaseConnection,
        file_set_id: i32,
    ) -> Result<Option<file_sets::Model>, DbErr>;

    async fn find_file_with_set(
        &self,
        db: &DatabaseConnection,
        file_id: i32,
    ) -> Result<Option<(files::Model, file_sets::Model)>, DbErr>;
}

#[derive(Debug, Clone, Default)]
pub struct SeaOrmFileSetRepository;

impl SeaOrmFileSetRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSetRepository for SeaOrmFileSetRepository {
    async fn locked_find_by_id(
        &self,
        txn: &DatabaseTransaction,
        file_set_id: i32,
    ) -> Result<Option<file_sets::Model>, DbErr> {
        FileSets::find_by_id(file_set_id)
            .lock_exclusive()
            .one(txn)
            .await
    }

    async fn create_with_base_path_key(
        &self,
        txn: &DatabaseTransaction,
        base_path_key: &str,
    ) -> Result<file_sets::Model, DbErr> {
        let now = Utc::now();
        file_sets::ActiveModel {
            id: NotSet,
            base_path_key: Set(base_path_key.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
    }

    async fn locked_find_files_by_set(
        &self,
        txn: &DatabaseTransaction,
        file_set_id: i32,
    ) -> Result<Vec<files::Model>, DbErr> {
        Files::find()
            .filter(files::Column::FileSetId.eq(file_set_id))
            .order_by_asc(files::Column::Id)
            .lock_exclusive()
            .all(txn)
            .await
    }

    async fn locked_find_file(
        &self,
        txn: &DatabaseTransaction,
        file_id: i32,
    ) -> Result<Option<files::Model>, DbErr> {
        Files::find_by_id(file_id).lock_exclusive().one(txn).await
    }

    async fn locked_find_thumbnails(
        &self,
        txn: &DatabaseTransaction,
        origin_id: i32,
    ) -> Result<Vec<files::Model>, DbErr> {
        Files::find()
            .filter(files::Column::OriginId.eq(origin_id))
            .lock_exclusive()
            .all(txn)
            .await
    }

    async fn create_file(
        &self,
        txn: &DatabaseTransaction,
        new_file: NewFile,
    ) -> Result<files::Model, DbErr> {
        let name_after_id = new_file.save_name.is_none();
        let created = files::ActiveModel {
            id: NotSet,
            file_set_id: Set(new_file.file_set_id),
            origin_id: Set(new_file.origin_id),
            sort_order: Set(new_file.sort_order),
            is_image: Set(new_file.is_image),
            save_name: Set(new_file.save_name.unwrap_or_default()),
            original_name: Set(new_file.original_name),
            extension: Set(new_file.extension),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await?;

        if !name_after_id {
            return Ok(created);
        }

        let save_name = created.id.to_string();
        let mut active: files::ActiveModel = created.into();
        active.save_name = Set(save_name);
        active.update(txn).await
    }

    async fn update_file_order(
        &self,
        txn: &DatabaseTransaction,
        file: files::Model,
        sort_order: Option<i32>,
    ) -> Result<files::Model, DbErr> {
        let mut active: files::ActiveModel = file.into();
        active.sort_order = Set(sort_order);
        active.update(txn).await
    }

    async fn delete_file(&self, txn: &DatabaseTransaction, file_id: i32) -> Result<(), DbErr> {
        Files::delete_by_id(file_id).exec(txn).await?;
        Ok(())
    }

    async fn delete_file_set(
        &self,
        txn: &DatabaseTransaction,
        file_set_id: i32,
    ) -> Result<(), DbErr> {
        FileSets::delete_by_id(file_set_id).exec(txn).await?;
        Ok(())
    }

    async fn find_visible_files(
        &self,
        db: &DatabaseConnection,
        file_set_id: i32,
    ) -> Result<Vec<files::Model>, DbErr> {
        Files::find()
            .filter(files::Column::FileSetId.eq(file_set_id))
            .filter(
                Condition::any()
                    .add(files::Column::OriginId.is_not_null())
                    .add(files::Column::IsImage.eq(false)),
            )
            .order_by_asc(files::Column::SortOrder)
            .order_by_asc(files::Column::Id)
            .all(db)
            .await
    }

    async fn find_set_thumbnails(
        &self,
        db: &DatabaseConnection,
        file_set_id: i32,
    ) -> Result<Vec<files::Model>, DbErr> {
        Files::find()
            .filter(files::Column::FileSetId.eq(file_set_id))
            .filter(files::Column::OriginId.is_not_null())
            .order_by_asc(files::Column::SortOrder)
            .order_by_asc(files::Column::Id)
            .all(db)
            .await
    }

    async fn find_file_set(
        &self,
        db: &DatabaseConnection,
        file_set_id: i32,
    ) -> Result<Option<file_sets::Model>, DbErr> {
        FileSets::find_by_id(file_set_id).one(db).await
    }

    async fn find_file_with_set(
        &self,
        db: &DatabaseConnection,
        file_id: i32,
    ) -> Result<Option<(files::Model, file_sets::Model)>, DbErr> {
        let found = Files::find_by_id(file_id)
            .find_also_related(FileSets)
            .one(db)
            .await?;
        Ok(found.and_then(|(file, set)| set.map(|set| (file, set))))
    }
}
