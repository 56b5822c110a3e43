//! 通行记录实体
//! Access record entity

use sea_orm::entity::prelude::*;

/// 通行记录实体模型，(device_id, record_id) 为复合主键
/// Access record entity model with (device_id, record_id) as compound key
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "records")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub device_id: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub record_id: i64,
  pub person_phone: Option<String>,
  pub record_time: i64,
  pub record_type: i32,
  pub record_pass: i32,
  pub similarity: Option<f64>,
  pub temperature: Option<f64>,
  pub qrcode: Option<String>,
  pub health_code_color: Option<String>,
  /// 设备上传的原始内容
  /// Verbatim device payload
  pub raw: serde_json::Value,
  pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
