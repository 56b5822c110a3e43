//! 设备实体
//! Device entity

use sea_orm::entity::prelude::*;

/// 设备实体模型
/// Device entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "devices")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub device_id: String,
  pub prod_type: Option<String>,
  pub prod_name: Option<String>,
  pub relay_slots: i32,
  pub last_seen_at: DateTimeWithTimeZone,
  pub online: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
