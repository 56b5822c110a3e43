//! 计划目标实体
//! Schedule target entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "schedule_targets")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub schedule_id: i64,
  pub device_id: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
