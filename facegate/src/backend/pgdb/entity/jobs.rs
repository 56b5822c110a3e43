//! 作业实体
//! Job entity

use crate::model::JobState;
use sea_orm::entity::prelude::*;

/// 作业状态枚举
/// Job status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum JobStatus {
  #[sea_orm(string_value = "pending")]
  Pending,
  #[sea_orm(string_value = "sent")]
  Sent,
  #[sea_orm(string_value = "failed")]
  Failed,
}

/// 作业实体模型
/// Job entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub schedule_id: i64,
  pub device_id: String,
  pub state: JobStatus,
  pub retry_count: i32,
  pub last_error: Option<String>,
  pub created_at: DateTimeWithTimeZone,
  pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<JobStatus> for JobState {
  fn from(status: JobStatus) -> Self {
    match status {
      JobStatus::Pending => JobState::Pending,
      JobStatus::Sent => JobState::Sent,
      JobStatus::Failed => JobState::Failed,
    }
  }
}
