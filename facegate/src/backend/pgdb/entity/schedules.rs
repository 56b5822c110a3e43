//! 计划实体
//! Schedule entity

use crate::model::{PayloadType, ScheduleStatus};
use sea_orm::entity::prelude::*;

/// 计划状态枚举
/// Schedule status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ScheduleState {
  #[sea_orm(string_value = "draft")]
  Draft,
  #[sea_orm(string_value = "active")]
  Active,
  #[sea_orm(string_value = "inactive")]
  Inactive,
}

/// 推送内容类型枚举
/// Payload kind enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PayloadKind {
  #[sea_orm(string_value = "image")]
  Image,
  #[sea_orm(string_value = "face")]
  Face,
}

/// 计划实体模型
/// Schedule entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "schedules")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub cron: Option<String>,
  pub start_at: DateTimeWithTimeZone,
  pub end_at: Option<DateTimeWithTimeZone>,
  pub payload_type: PayloadKind,
  pub status: ScheduleState,
  /// 关联的图片 ID
  /// Associated image id
  pub image_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<ScheduleState> for ScheduleStatus {
  fn from(state: ScheduleState) -> Self {
    match state {
      ScheduleState::Draft => ScheduleStatus::Draft,
      ScheduleState::Active => ScheduleStatus::Active,
      ScheduleState::Inactive => ScheduleStatus::Inactive,
    }
  }
}

impl From<PayloadKind> for PayloadType {
  fn from(kind: PayloadKind) -> Self {
    match kind {
      PayloadKind::Image => PayloadType::Image,
      PayloadKind::Face => PayloadType::Face,
    }
  }
}
