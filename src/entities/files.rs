use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub file_set_id: i32,
    /// Set when this row is the thumbnail of another file
    pub origin_id: Option<i32>,
    #[sea_orm(column_name = "order")]
    pub sort_order: Option<i32>,
    pub is_image: bool,
    pub save_name: String,
    pub original_name: String,
    pub extension: String,
    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn is_thumbnail(&self) -> bool {
        self.origin_id.is_some()
    }

    /// Name on disk inside the file set directory.
    pub fn stored_name(&self) -> String {
        format!("{}{}", self.save_name, self.extension)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::file_sets::Entity",
        from = "Column::FileSetId",
        to = "super::file_sets::Column::Id",
        on_update = "Cascade",
        on_delete = "NoAction"
    )]
    FileSets,
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::OriginId",
        to = "Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Origin,
}

impl Related<super::file_sets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FileSets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
