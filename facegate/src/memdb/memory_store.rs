//! 内存存储实现
//! Memory store implementation

use crate::model::{Device, Job, Person, Record, Schedule};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 内存中的全部数据
/// All in-memory data
#[derive(Default)]
pub struct MemoryStorage {
  /// 设备 - key: device_id
  /// Devices - key: device_id
  pub devices: HashMap<String, Device>,
  /// 人员 - key: phone，按手机号有序以支持稳定分页
  /// Persons - key: phone, ordered so paging is stable
  pub persons: BTreeMap<String, Person>,
  /// 通行记录 - key: (device_id, record_id)
  /// Records - key: (device_id, record_id)
  pub records: HashMap<(String, i64), Record>,
  /// 计划 - key: id
  /// Schedules - key: id
  pub schedules: BTreeMap<i64, Schedule>,
  /// 作业 - key: id，按 ID 有序
  /// Jobs - key: id, in id order
  pub jobs: BTreeMap<i64, Job>,
  /// 下一个作业 ID
  /// Next job id
  pub next_job_id: i64,
}

/// 内存存储
/// Memory store
#[derive(Default, Clone)]
pub struct MemoryStore {
  pub(crate) storage: Arc<RwLock<MemoryStorage>>,
}

impl MemoryStore {
  /// 创建新的内存存储实例
  /// Create a new memory store instance
  pub fn new() -> Self {
    Self::default()
  }

  /// 获取存储的引用
  /// Get storage reference
  pub fn storage(&self) -> &Arc<RwLock<MemoryStorage>> {
    &self.storage
  }

  /// 写入计划（计划由管理端维护，这里只用于初始化和测试）
  /// Write a schedule (schedules belong to the admin surface; this is for seeding and tests)
  pub async fn insert_schedule(&self, schedule: Schedule) {
    let mut storage = self.storage.write().await;
    storage.schedules.insert(schedule.id, schedule);
  }

  /// 所有作业的快照，按 ID 排序
  /// Snapshot of all jobs in id order
  pub async fn jobs(&self) -> Vec<Job> {
    self.storage.read().await.jobs.values().cloned().collect()
  }

  /// 所有记录的快照
  /// Snapshot of all records
  pub async fn records(&self) -> Vec<Record> {
    self.storage.read().await.records.values().cloned().collect()
  }

  /// 直接覆盖一个作业（测试中用来构造旧的失败作业）
  /// Overwrite a job directly (used by tests to fabricate aged failed jobs)
  pub async fn put_job(&self, job: Job) {
    let mut storage = self.storage.write().await;
    storage.next_job_id = storage.next_job_id.max(job.id);
    storage.jobs.insert(job.id, job);
  }
}
