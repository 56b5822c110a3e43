//! 图片实体
//! Image entity

use sea_orm::entity::prelude::*;

/// 计划可引用的图片文件
/// Image file a schedule can reference
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "images")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub file_name: String,
  pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
