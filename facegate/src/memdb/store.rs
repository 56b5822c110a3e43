//! 内存存储的 Store 特性实现
//! Store trait implementation for the memory store

use crate::base::Store;
use crate::error::Result;
use crate::memdb::MemoryStore;
use crate::model::{
  Device, DeviceRegistration, Job, JobState, PendingJob, Person, Record, Schedule,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[async_trait]
impl Store for MemoryStore {
  async fn upsert_device(&self, reg: &DeviceRegistration, now: DateTime<Utc>) -> Result<()> {
    let mut storage = self.storage.write().await;
    storage.devices.insert(
      reg.device_id.clone(),
      Device {
        device_id: reg.device_id.clone(),
        product_type: reg.product_type.clone(),
        product_name: reg.product_name.clone(),
        relay_slot_count: reg.relay_slot_count,
        last_seen_at: now,
        online: true,
      },
    );
    Ok(())
  }

  async fn touch_device(&self, device_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let mut storage = self.storage.write().await;
    match storage.devices.get_mut(device_id) {
      Some(device) => {
        // last_seen_at 只前进不后退
        // last_seen_at only moves forward
        if now > device.last_seen_at {
          device.last_seen_at = now;
        }
        device.online = true;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  async fn set_device_online(&self, device_id: &str, online: bool) -> Result<()> {
    let mut storage = self.storage.write().await;
    if let Some(device) = storage.devices.get_mut(device_id) {
      device.online = online;
    }
    Ok(())
  }

  async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
    Ok(self.storage.read().await.devices.get(device_id).cloned())
  }

  async fn count_persons(&self) -> Result<u64> {
    Ok(self.storage.read().await.persons.len() as u64)
  }

  async fn list_persons(&self, offset: u64, limit: u64) -> Result<Vec<Person>> {
    let storage = self.storage.read().await;
    Ok(
      storage
        .persons
        .values()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect(),
    )
  }

  async fn find_persons(&self, phones: &[String]) -> Result<Vec<Person>> {
    let storage = self.storage.read().await;
    let wanted: HashSet<&str> = phones.iter().map(String::as_str).collect();
    Ok(
      storage
        .persons
        .values()
        .filter(|p| wanted.contains(p.phone.as_str()))
        .cloned()
        .collect(),
    )
  }

  async fn upsert_person(&self, person: &Person) -> Result<()> {
    let mut storage = self.storage.write().await;
    storage.persons.insert(person.phone.clone(), person.clone());
    Ok(())
  }

  async fn update_person_image(
    &self,
    phone: &str,
    local_path: &str,
    checksum: &str,
  ) -> Result<bool> {
    let mut storage = self.storage.write().await;
    match storage.persons.get_mut(phone) {
      Some(person) => {
        person.local_image_path = Some(local_path.to_string());
        person.image_checksum = Some(checksum.to_string());
        Ok(true)
      }
      None => Ok(false),
    }
  }

  async fn insert_record(&self, record: &Record) -> Result<bool> {
    let mut storage = self.storage.write().await;
    let key = (record.device_id.clone(), record.record_id);
    if storage.records.contains_key(&key) {
      return Ok(false);
    }
    storage.records.insert(key, record.clone());
    Ok(true)
  }

  async fn get_record(&self, device_id: &str, record_id: i64) -> Result<Option<Record>> {
    let storage = self.storage.read().await;
    Ok(
      storage
        .records
        .get(&(device_id.to_string(), record_id))
        .cloned(),
    )
  }

  async fn list_active_schedules(&self, limit: u64) -> Result<Vec<Schedule>> {
    let storage = self.storage.read().await;
    Ok(
      storage
        .schedules
        .values()
        .rev()
        .filter(|s| s.status.is_materializable())
        .take(limit as usize)
        .cloned()
        .collect(),
    )
  }

  async fn job_exists(&self, schedule_id: i64, device_id: &str) -> Result<bool> {
    let storage = self.storage.read().await;
    Ok(
      storage
        .jobs
        .values()
        .any(|j| j.schedule_id == schedule_id && j.device_id == device_id),
    )
  }

  async fn job_updated_since(
    &self,
    schedule_id: i64,
    device_id: &str,
    since: DateTime<Utc>,
  ) -> Result<bool> {
    let storage = self.storage.read().await;
    Ok(storage.jobs.values().any(|j| {
      j.schedule_id == schedule_id && j.device_id == device_id && j.updated_at >= since
    }))
  }

  async fn create_job(
    &self,
    schedule_id: i64,
    device_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Job> {
    let mut storage = self.storage.write().await;
    storage.next_job_id += 1;
    let job = Job {
      id: storage.next_job_id,
      schedule_id,
      device_id: device_id.to_string(),
      state: JobState::Pending,
      retry_count: 0,
      last_error: None,
      created_at: now,
      updated_at: now,
    };
    storage.jobs.insert(job.id, job.clone());
    Ok(job)
  }

  async fn list_pending_jobs(&self, limit: u64) -> Result<Vec<PendingJob>> {
    let storage = self.storage.read().await;
    Ok(
      storage
        .jobs
        .values()
        .filter(|j| j.state == JobState::Pending)
        .filter_map(|j| {
          // 计划已被删除的作业无法派发，跳过
          // Jobs whose schedule was deleted cannot be dispatched; skip them
          storage.schedules.get(&j.schedule_id).map(|s| PendingJob {
            job: j.clone(),
            payload_type: s.payload_type,
            image_file: s.image_file.clone(),
          })
        })
        .take(limit as usize)
        .collect(),
    )
  }

  async fn mark_job_sent(&self, job_id: i64, now: DateTime<Utc>) -> Result<bool> {
    let mut storage = self.storage.write().await;
    match storage.jobs.get_mut(&job_id) {
      Some(job) if job.state == JobState::Pending => {
        job.state = JobState::Sent;
        job.updated_at = now;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn mark_job_failed(&self, job_id: i64, error: &str, now: DateTime<Utc>) -> Result<bool> {
    let mut storage = self.storage.write().await;
    match storage.jobs.get_mut(&job_id) {
      Some(job) if job.state == JobState::Pending => {
        job.state = JobState::Failed;
        job.retry_count += 1;
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn list_retryable_jobs(
    &self,
    before: DateTime<Utc>,
    max_retry: i32,
    limit: u64,
  ) -> Result<Vec<Job>> {
    let storage = self.storage.read().await;
    Ok(
      storage
        .jobs
        .values()
        .filter(|j| j.state == JobState::Failed && j.updated_at < before && j.retry_count < max_retry)
        .take(limit as usize)
        .cloned()
        .collect(),
    )
  }

  async fn requeue_job(&self, job_id: i64, max_retry: i32, now: DateTime<Utc>) -> Result<bool> {
    let mut storage = self.storage.write().await;
    match storage.jobs.get_mut(&job_id) {
      Some(job) if job.state == JobState::Failed && job.retry_count < max_retry => {
        job.state = JobState::Pending;
        job.updated_at = now;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
    Ok(self.storage.read().await.jobs.get(&job_id).cloned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{PayloadType, ScheduleStatus};
  use chrono::Duration;

  fn record(device_id: &str, record_id: i64, record_time: i64) -> Record {
    Record {
      device_id: device_id.to_string(),
      record_id,
      person_phone: None,
      record_time,
      record_type: 1,
      record_pass: 1,
      similarity: None,
      temperature: None,
      qrcode: None,
      health_code_color: None,
      raw: serde_json::json!({ "RecordID": record_id }),
    }
  }

  #[tokio::test]
  async fn test_insert_record_is_idempotent() {
    let store = MemoryStore::new();
    assert!(store.insert_record(&record("D1", 42, 1000)).await.unwrap());
    assert!(!store.insert_record(&record("D1", 42, 2000)).await.unwrap());
    assert!(store.insert_record(&record("D2", 42, 3000)).await.unwrap());

    let stored = store.get_record("D1", 42).await.unwrap().unwrap();
    assert_eq!(stored.record_time, 1000);
    assert_eq!(store.records().await.len(), 2);
  }

  #[tokio::test]
  async fn test_touch_unknown_device() {
    let store = MemoryStore::new();
    assert!(!store.touch_device("nope", Utc::now()).await.unwrap());
  }

  #[tokio::test]
  async fn test_device_lifecycle() {
    let store = MemoryStore::new();
    let t0 = Utc::now();
    let reg = DeviceRegistration {
      device_id: "D1".into(),
      product_type: Some("FG".into()),
      product_name: None,
      relay_slot_count: 2,
    };
    store.upsert_device(&reg, t0).await.unwrap();
    store.set_device_online("D1", false).await.unwrap();
    assert!(store.touch_device("D1", t0 + Duration::seconds(5)).await.unwrap());
    // 迟到的心跳不会让 last_seen_at 回退
    // A late heartbeat does not move last_seen_at backwards
    assert!(store.touch_device("D1", t0).await.unwrap());

    let device = store.get_device("D1").await.unwrap().unwrap();
    assert!(device.online);
    assert_eq!(device.relay_slot_count, 2);
    assert_eq!(device.last_seen_at, t0 + Duration::seconds(5));
  }

  #[tokio::test]
  async fn test_person_paging_is_ordered() {
    let store = MemoryStore::new();
    for phone in ["13900000003", "13900000001", "13900000002"] {
      store.upsert_person(&Person::new(phone, "p")).await.unwrap();
    }
    let page = store.list_persons(1, 5).await.unwrap();
    let phones: Vec<_> = page.iter().map(|p| p.phone.as_str()).collect();
    assert_eq!(phones, vec!["13900000002", "13900000003"]);
    assert_eq!(store.count_persons().await.unwrap(), 3);
  }

  #[tokio::test]
  async fn test_job_transitions_are_conditional() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let job = store.create_job(1, "D1", now).await.unwrap();

    assert!(store.mark_job_sent(job.id, now).await.unwrap());
    // 已发送的作业不能再次发送或失败
    // A sent job can be neither sent again nor failed
    assert!(!store.mark_job_sent(job.id, now).await.unwrap());
    assert!(!store.mark_job_failed(job.id, "boom", now).await.unwrap());
    assert!(!store.requeue_job(job.id, 3, now).await.unwrap());
  }

  #[tokio::test]
  async fn test_requeue_respects_retry_ceiling() {
    let store = MemoryStore::new();
    let old = Utc::now() - Duration::hours(1);
    store
      .put_job(Job {
        id: 7,
        schedule_id: 1,
        device_id: "D1".into(),
        state: JobState::Failed,
        retry_count: 3,
        last_error: Some("Device offline".into()),
        created_at: old,
        updated_at: old,
      })
      .await;

    let listed = store.list_retryable_jobs(Utc::now(), 3, 100).await.unwrap();
    assert!(listed.is_empty());
    assert!(!store.requeue_job(7, 3, Utc::now()).await.unwrap());
  }

  #[tokio::test]
  async fn test_pending_jobs_carry_schedule_fields() {
    let store = MemoryStore::new();
    let now = Utc::now();
    store
      .insert_schedule(Schedule {
        id: 1,
        cron: None,
        start_at: now,
        end_at: None,
        payload_type: PayloadType::Image,
        status: ScheduleStatus::Active,
        image_file: Some("banner.jpg".into()),
        targets: vec!["D1".into()],
      })
      .await;
    store.create_job(1, "D1", now).await.unwrap();
    // 计划不存在的作业不会被列出
    // Jobs without a schedule are not listed
    store.create_job(99, "D1", now).await.unwrap();

    let pending = store.list_pending_jobs(50).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload_type, PayloadType::Image);
    assert_eq!(pending[0].image_file.as_deref(), Some("banner.jpg"));
  }
}
