//! 领域模型
//! Domain model
//!
//! 设备、人员、通行记录、计划和作业的存储无关表示
//! Store-agnostic representations of devices, persons, access records, schedules and jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 门禁终端
/// Access-control terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
  /// 硬件分配的设备 ID
  /// Hardware-assigned device id
  pub device_id: String,
  pub product_type: Option<String>,
  pub product_name: Option<String>,
  /// 继电器输出口数量
  /// Number of relay output slots
  pub relay_slot_count: i32,
  /// 最近一次注册或心跳时间
  /// Last register or heartbeat time
  pub last_seen_at: DateTime<Utc>,
  pub online: bool,
}

/// registerDevice 携带的设备元数据
/// Device metadata carried by registerDevice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistration {
  pub device_id: String,
  pub product_type: Option<String>,
  pub product_name: Option<String>,
  pub relay_slot_count: i32,
}

/// 白名单人员，以手机号为身份
/// Whitelisted person, identified by phone number
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Person {
  pub phone: String,
  pub person_name: String,
  pub ic_card_id: Option<String>,
  pub id_card_no: Option<String>,
  pub pass_plan_ids: Vec<i64>,
  /// 处理后人脸照片的本地路径
  /// Local path of the processed face photo
  pub local_image_path: Option<String>,
  pub image_checksum: Option<String>,
  pub member_level: Option<String>,
  pub member_expiry: Option<DateTime<Utc>>,
  pub is_ape_lord: bool,
}

impl Person {
  /// 创建只有手机号和姓名的人员
  /// Create a person with only phone and name set
  pub fn new<P: Into<String>, N: Into<String>>(phone: P, person_name: N) -> Self {
    Self {
      phone: phone.into(),
      person_name: person_name.into(),
      ..Default::default()
    }
  }
}

/// 设备上传的通行记录，(device_id, record_id) 唯一
/// Access record uploaded by a device, unique on (device_id, record_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub device_id: String,
  /// 设备分配的序号
  /// Device-assigned sequence number
  pub record_id: i64,
  pub person_phone: Option<String>,
  pub record_time: i64,
  pub record_type: i32,
  pub record_pass: i32,
  pub similarity: Option<f64>,
  pub temperature: Option<f64>,
  pub qrcode: Option<String>,
  pub health_code_color: Option<String>,
  /// 原始上传内容
  /// Verbatim uploaded payload
  pub raw: serde_json::Value,
}

/// 计划状态
/// Schedule status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
  Draft,
  Active,
  Inactive,
}

impl ScheduleStatus {
  /// 物化器只处理草稿和激活状态
  /// The materializer only considers draft and active schedules
  pub fn is_materializable(self) -> bool {
    matches!(self, ScheduleStatus::Draft | ScheduleStatus::Active)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ScheduleStatus::Draft => "draft",
      ScheduleStatus::Active => "active",
      ScheduleStatus::Inactive => "inactive",
    }
  }
}

/// 计划推送的内容类型
/// Kind of content a schedule pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
  Image,
  Face,
}

impl PayloadType {
  pub fn as_str(self) -> &'static str {
    match self {
      PayloadType::Image => "image",
      PayloadType::Face => "face",
    }
  }
}

impl fmt::Display for PayloadType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PayloadType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "image" => Ok(PayloadType::Image),
      "face" => Ok(PayloadType::Face),
      other => Err(format!("Unknown payload type: {other}")),
    }
  }
}

/// 管理员定义的推送计划
/// Administrator-defined push schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
  pub id: i64,
  /// 五段 cron 表达式，缺省表示只执行一次
  /// Five-field cron expression; absent means "once"
  pub cron: Option<String>,
  pub start_at: DateTime<Utc>,
  pub end_at: Option<DateTime<Utc>>,
  pub payload_type: PayloadType,
  pub status: ScheduleStatus,
  /// 关联图片的文件名（payload_type = image 时使用）
  /// File name of the associated image (used when payload_type = image)
  pub image_file: Option<String>,
  /// 目标设备 ID
  /// Target device ids
  pub targets: Vec<String>,
}

/// 作业状态
/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
  Pending,
  Sent,
  Failed,
}

impl JobState {
  pub fn as_str(self) -> &'static str {
    match self {
      JobState::Pending => "pending",
      JobState::Sent => "sent",
      JobState::Failed => "failed",
    }
  }
}

impl fmt::Display for JobState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 某个计划对某台设备的一次具体执行
/// One concrete occurrence of a schedule for one target device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
  pub id: i64,
  pub schedule_id: i64,
  pub device_id: String,
  pub state: JobState,
  pub retry_count: i32,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// 待派发作业及其计划中派发所需的字段
/// A pending job together with the schedule fields needed to dispatch it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
  pub job: Job,
  pub payload_type: PayloadType,
  pub image_file: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_schedule_status_materializable() {
    assert!(ScheduleStatus::Draft.is_materializable());
    assert!(ScheduleStatus::Active.is_materializable());
    assert!(!ScheduleStatus::Inactive.is_materializable());
  }

  #[test]
  fn test_payload_type_from_str() {
    assert_eq!("image".parse::<PayloadType>(), Ok(PayloadType::Image));
    assert_eq!("face".parse::<PayloadType>(), Ok(PayloadType::Face));
    assert!("video".parse::<PayloadType>().is_err());
  }

  #[test]
  fn test_job_state_serde() {
    let json = serde_json::to_string(&JobState::Failed).unwrap();
    assert_eq!(json, "\"failed\"");
    assert_eq!(JobState::Pending.to_string(), "pending");
  }
}
