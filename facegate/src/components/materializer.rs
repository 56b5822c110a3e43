//! ScheduleMaterializer 模块
//! ScheduleMaterializer module
//!
//! 定期扫描草稿/激活状态的计划，在时间窗口内且 cron 到期时为每个目标设备创建作业
//! Periodically scans draft/active schedules and, when inside the time window and the cron is
//! due, creates a job for each target device
//!
//! 去重规则 / Deduplication:
//! - 无 cron：每个 (计划, 设备) 终身只有一个作业 / no cron: one job per (schedule, device), ever
//! - 有 cron：去重窗口内最多一个 / cron: at most one per dedup window

use crate::base::constants::{
  DEFAULT_CRON_DEDUP_WINDOW, DEFAULT_MATERIALIZE_INTERVAL, DEFAULT_SCHEDULE_SCAN_LIMIT,
};
use crate::base::Store;
use crate::components::ComponentLifecycle;
use crate::cron::{is_cron_due, is_within_window};
use crate::error::{Error, Result};
use crate::model::Schedule;
use chrono::{DateTime, Local, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// ScheduleMaterializer 配置
/// ScheduleMaterializer configuration
#[derive(Debug, Clone)]
pub struct MaterializerConfig {
  /// 扫描间隔
  /// Scan interval
  pub interval: Duration,
  /// 每轮最多扫描的计划数
  /// Max schedules scanned per round
  pub scan_limit: u64,
  /// cron 计划的去重窗口，应略小于一分钟且大于扫描间隔
  /// Dedup window for cron schedules; keep it just under a minute and above the interval
  pub cron_dedup_window: Duration,
}

impl Default for MaterializerConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_MATERIALIZE_INTERVAL,
      scan_limit: DEFAULT_SCHEDULE_SCAN_LIMIT,
      cron_dedup_window: DEFAULT_CRON_DEDUP_WINDOW,
    }
  }
}

/// ScheduleMaterializer - 把计划物化为作业
/// ScheduleMaterializer - turns schedules into jobs
pub struct ScheduleMaterializer {
  store: Arc<dyn Store>,
  config: MaterializerConfig,
  done: Arc<AtomicBool>,
}

impl ScheduleMaterializer {
  pub fn new(store: Arc<dyn Store>, config: MaterializerConfig) -> Self {
    Self {
      store,
      config,
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("ScheduleMaterializer: shutting down");
          break;
        }

        if let Err(e) = self.materialize().await {
          tracing::error!("ScheduleMaterializer error: {}", e);
        }
      }
    })
  }

  /// 以当前时间执行一轮物化
  /// Run one materialization round at the current time
  pub async fn materialize(&self) -> Result<usize> {
    self.materialize_at(Utc::now()).await
  }

  /// 以给定时间执行一轮物化，返回新建的作业数
  /// Run one materialization round at `now`, returning how many jobs were created
  ///
  /// cron 按本地时间计算
  /// Cron fields are evaluated in local time
  pub async fn materialize_at(&self, now: DateTime<Utc>) -> Result<usize> {
    let schedules = self.store.list_active_schedules(self.config.scan_limit).await?;
    let mut created = 0;

    for schedule in &schedules {
      if schedule.targets.is_empty() || !self.is_due(schedule, now) {
        continue;
      }
      match self.materialize_schedule(schedule, now).await {
        Ok(n) => created += n,
        Err(e) => {
          tracing::warn!(schedule_id = schedule.id, error = %e, "Failed to materialize schedule");
        }
      }
    }

    if created > 0 {
      tracing::info!(created, "Jobs materialized");
    }
    Ok(created)
  }

  fn is_due(&self, schedule: &Schedule, now: DateTime<Utc>) -> bool {
    if !is_within_window(schedule.start_at, schedule.end_at, now) {
      return false;
    }
    match schedule.cron.as_deref() {
      Some(cron) => is_cron_due(cron, &now.with_timezone(&Local)),
      None => true,
    }
  }

  async fn materialize_schedule(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<usize> {
    let window = chrono::Duration::from_std(self.config.cron_dedup_window)
      .map_err(|e| Error::other(format!("Invalid dedup window: {e}")))?;
    let mut created = 0;

    for device_id in &schedule.targets {
      let exists = match schedule.cron {
        None => self.store.job_exists(schedule.id, device_id).await?,
        Some(_) => {
          self
            .store
            .job_updated_since(schedule.id, device_id, now - window)
            .await?
        }
      };
      if exists {
        continue;
      }

      let job = self.store.create_job(schedule.id, device_id, now).await?;
      tracing::debug!(
        job_id = job.id,
        schedule_id = schedule.id,
        device_id = %device_id,
        "Job created"
      );
      created += 1;
    }
    Ok(created)
  }

  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for ScheduleMaterializer {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    ScheduleMaterializer::start(self)
  }

  fn shutdown(&self) {
    ScheduleMaterializer::shutdown(self)
  }

  fn is_done(&self) -> bool {
    ScheduleMaterializer::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdb::MemoryStore;
  use crate::model::{PayloadType, ScheduleStatus};
  use chrono::Duration as ChronoDuration;

  fn schedule(id: i64, cron: Option<&str>, status: ScheduleStatus, targets: &[&str]) -> Schedule {
    let now = Utc::now();
    Schedule {
      id,
      cron: cron.map(String::from),
      start_at: now - ChronoDuration::hours(1),
      end_at: Some(now + ChronoDuration::hours(1)),
      payload_type: PayloadType::Image,
      status,
      image_file: Some("banner.jpg".into()),
      targets: targets.iter().map(|s| s.to_string()).collect(),
    }
  }

  #[test]
  fn test_materializer_config_default() {
    let config = MaterializerConfig::default();
    assert_eq!(config.interval, Duration::from_secs(10));
    assert_eq!(config.scan_limit, 200);
    assert_eq!(config.cron_dedup_window, Duration::from_secs(55));
  }

  #[tokio::test]
  async fn test_inactive_and_untargeted_schedules_are_ignored() {
    let store = MemoryStore::new();
    store
      .insert_schedule(schedule(1, None, ScheduleStatus::Inactive, &["D1"]))
      .await;
    store
      .insert_schedule(schedule(2, None, ScheduleStatus::Active, &[]))
      .await;
    let materializer = ScheduleMaterializer::new(Arc::new(store.clone()), Default::default());

    assert_eq!(materializer.materialize().await.unwrap(), 0);
    assert!(store.jobs().await.is_empty());
  }

  #[tokio::test]
  async fn test_draft_schedules_materialize() {
    let store = MemoryStore::new();
    store
      .insert_schedule(schedule(1, None, ScheduleStatus::Draft, &["D1"]))
      .await;
    let materializer = ScheduleMaterializer::new(Arc::new(store.clone()), Default::default());
    assert_eq!(materializer.materialize().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_outside_window_creates_nothing() {
    let store = MemoryStore::new();
    let mut s = schedule(1, None, ScheduleStatus::Active, &["D1"]);
    s.start_at = Utc::now() + ChronoDuration::minutes(5);
    s.end_at = None;
    store.insert_schedule(s).await;
    let materializer = ScheduleMaterializer::new(Arc::new(store.clone()), Default::default());
    assert_eq!(materializer.materialize().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_cron_dedup_window() {
    let store = MemoryStore::new();
    store
      .insert_schedule(schedule(1, Some("* * * * *"), ScheduleStatus::Active, &["D1"]))
      .await;
    let materializer = ScheduleMaterializer::new(Arc::new(store.clone()), Default::default());

    let t0 = Utc::now();
    assert_eq!(materializer.materialize_at(t0).await.unwrap(), 1);
    assert_eq!(
      materializer
        .materialize_at(t0 + ChronoDuration::seconds(10))
        .await
        .unwrap(),
      0
    );
    assert_eq!(
      materializer
        .materialize_at(t0 + ChronoDuration::seconds(56))
        .await
        .unwrap(),
      1
    );
    assert_eq!(store.jobs().await.len(), 2);
  }

  #[tokio::test]
  async fn test_materializer_shutdown() {
    let materializer = Arc::new(ScheduleMaterializer::new(
      Arc::new(MemoryStore::new()),
      MaterializerConfig {
        interval: Duration::from_millis(10),
        ..Default::default()
      },
    ));
    let handle = materializer.clone().start();
    assert!(!materializer.is_done());
    materializer.shutdown();
    assert!(materializer.is_done());
    tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .unwrap()
      .unwrap();
  }
}
