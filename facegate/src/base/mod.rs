//! 存储模块
//! Store module
//!
//! 定义了网关与持久化存储交互的抽象层
//! Defines the abstraction layer between the gateway and its persistent store

use crate::error::Result;
use crate::model::{Device, DeviceRegistration, Job, PendingJob, Person, Record, Schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod constants;

/// 存储特性，定义了设备、人员、记录、计划和作业的持久化接口
/// Store trait, the persistence interface for devices, persons, records, schedules and jobs
///
/// 作业状态迁移都是条件更新：只有当前状态匹配时才会写入，返回值表示是否发生了迁移
/// Job transitions are conditional updates: they only write when the current state matches,
/// and the returned flag tells whether the transition happened
#[async_trait]
pub trait Store: Send + Sync {
  // === 设备 / Devices ===

  /// 注册设备（插入或更新），并标记在线
  /// Register a device (insert or update) and mark it online
  async fn upsert_device(&self, reg: &DeviceRegistration, now: DateTime<Utc>) -> Result<()>;

  /// 心跳：刷新 last_seen_at 并标记在线，设备不存在时返回 false
  /// Heartbeat: advance last_seen_at and mark online; false if the device is unknown
  async fn touch_device(&self, device_id: &str, now: DateTime<Utc>) -> Result<bool>;

  /// 设置在线标志
  /// Set the online flag
  async fn set_device_online(&self, device_id: &str, online: bool) -> Result<()>;

  /// 按 ID 获取设备
  /// Get a device by id
  async fn get_device(&self, device_id: &str) -> Result<Option<Device>>;

  // === 人员 / Persons ===

  /// 人员总数
  /// Total number of persons
  async fn count_persons(&self) -> Result<u64>;

  /// 分页列出人员，按手机号排序
  /// List persons page by page, ordered by phone
  async fn list_persons(&self, offset: u64, limit: u64) -> Result<Vec<Person>>;

  /// 按手机号批量查找人员
  /// Find persons by a set of phone numbers
  async fn find_persons(&self, phones: &[String]) -> Result<Vec<Person>>;

  /// 插入或整体替换人员
  /// Insert or replace a person
  async fn upsert_person(&self, person: &Person) -> Result<()>;

  /// 记录人员的照片路径和校验值，人员不存在时返回 false
  /// Record a person's photo path and checksum; false if the person is unknown
  async fn update_person_image(&self, phone: &str, local_path: &str, checksum: &str)
    -> Result<bool>;

  // === 通行记录 / Records ===

  /// 幂等插入：(device_id, record_id) 已存在时不做任何修改，返回是否插入
  /// Idempotent insert: a no-op when (device_id, record_id) exists; returns whether it inserted
  async fn insert_record(&self, record: &Record) -> Result<bool>;

  /// 按复合键获取记录
  /// Get a record by its compound key
  async fn get_record(&self, device_id: &str, record_id: i64) -> Result<Option<Record>>;

  // === 计划 / Schedules ===

  /// 列出处于草稿或激活状态的计划（新的在前），包含目标设备
  /// List draft/active schedules, newest first, with their targets
  async fn list_active_schedules(&self, limit: u64) -> Result<Vec<Schedule>>;

  // === 作业 / Jobs ===

  /// 是否存在该 (计划, 设备) 的任何作业
  /// Whether any job exists for (schedule, device)
  async fn job_exists(&self, schedule_id: i64, device_id: &str) -> Result<bool>;

  /// 是否存在 updated_at >= since 的 (计划, 设备) 作业
  /// Whether a job for (schedule, device) was updated at or after `since`
  async fn job_updated_since(
    &self,
    schedule_id: i64,
    device_id: &str,
    since: DateTime<Utc>,
  ) -> Result<bool>;

  /// 创建 pending 作业
  /// Create a pending job
  async fn create_job(&self, schedule_id: i64, device_id: &str, now: DateTime<Utc>)
    -> Result<Job>;

  /// 按 ID 升序列出 pending 作业及其计划信息
  /// List pending jobs in id order together with their schedule fields
  async fn list_pending_jobs(&self, limit: u64) -> Result<Vec<PendingJob>>;

  /// pending -> sent
  async fn mark_job_sent(&self, job_id: i64, now: DateTime<Utc>) -> Result<bool>;

  /// pending -> failed，retry_count 加一并记录错误
  /// pending -> failed, incrementing retry_count and recording the error
  async fn mark_job_failed(&self, job_id: i64, error: &str, now: DateTime<Utc>) -> Result<bool>;

  /// 列出可重试的失败作业：updated_at < before 且 retry_count < max_retry
  /// List retryable failed jobs: updated_at < before and retry_count < max_retry
  async fn list_retryable_jobs(
    &self,
    before: DateTime<Utc>,
    max_retry: i32,
    limit: u64,
  ) -> Result<Vec<Job>>;

  /// failed -> pending（保留 retry_count），仅当 retry_count < max_retry
  /// failed -> pending (retry_count kept), only while retry_count < max_retry
  async fn requeue_job(&self, job_id: i64, max_retry: i32, now: DateTime<Utc>) -> Result<bool>;

  /// 按 ID 获取作业
  /// Get a job by id
  async fn get_job(&self, job_id: i64) -> Result<Option<Job>>;
}
