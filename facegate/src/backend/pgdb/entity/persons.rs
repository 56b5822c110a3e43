//! 人员实体
//! Person entity

use sea_orm::entity::prelude::*;

/// 人员实体模型
/// Person entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "persons")]
pub struct Model {
  /// 手机号，跨系统的人员身份
  /// Phone number, the cross-system identity
  #[sea_orm(primary_key, auto_increment = false)]
  pub phone: String,
  pub person_name: String,
  pub ic_card_id: Option<String>,
  pub id_card_no: Option<String>,
  /// 通行计划 ID 数组（JSON）
  /// Pass plan id array (JSON)
  pub pass_plan_ids: serde_json::Value,
  pub local_image_path: Option<String>,
  pub image_checksum: Option<String>,
  pub member_level: Option<String>,
  pub member_expiry: Option<DateTimeWithTimeZone>,
  pub is_ape_lord: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
