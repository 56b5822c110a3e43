//! JobDispatcher 模块
//! JobDispatcher module
//!
//! 定期取出 pending 作业并推送给在线设备：
//! Periodically takes pending jobs and pushes them to connected devices:
//!
//! - 设备不在注册表中：跳过，作业保持 pending / device not registered: skip, job stays pending
//! - 推送成功：pending -> sent / push succeeded: pending -> sent
//! - 推送失败：pending -> failed，retry_count + 1 / push failed: pending -> failed, retry_count + 1

use crate::base::constants::{
  DEFAULT_DISPATCH_BATCH_SIZE, DEFAULT_DISPATCH_INTERVAL, DEFAULT_IMAGE_URL_PREFIX,
};
use crate::base::Store;
use crate::components::ComponentLifecycle;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::model::{PayloadType, PendingJob};
use crate::protocol::PersonChanges;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 计划缺少图片时写入作业的错误
/// Error recorded on a job whose schedule has no image
pub const NO_IMAGE_ERROR: &str = "Schedule has no image";

/// JobDispatcher 配置
/// JobDispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
  /// 派发间隔
  /// Dispatch interval
  pub interval: Duration,
  /// 每轮最多处理的作业数
  /// Max jobs handled per round
  pub batch_size: u64,
  /// 图片静态路径前缀
  /// Static path prefix for images
  pub image_url_prefix: String,
  /// 可选的对外地址，拼接在图片路径前
  /// Optional public origin prepended to image paths
  pub public_base_url: Option<String>,
}

impl Default for DispatcherConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_DISPATCH_INTERVAL,
      batch_size: DEFAULT_DISPATCH_BATCH_SIZE,
      image_url_prefix: DEFAULT_IMAGE_URL_PREFIX.to_string(),
      public_base_url: None,
    }
  }
}

impl DispatcherConfig {
  /// 由图片文件名得到设备可访问的 URL
  /// Resolve an image file name into a URL the device can fetch
  pub fn image_url(&self, file_name: &str) -> String {
    let path = format!(
      "{}/{}",
      self.image_url_prefix.trim_end_matches('/'),
      file_name.trim_start_matches('/')
    );
    match &self.public_base_url {
      Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
      None => path,
    }
  }
}

/// 一轮派发的统计
/// Counters of one dispatch round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
  pub sent: usize,
  pub failed: usize,
  /// 设备离线而跳过
  /// Skipped because the device is offline
  pub skipped: usize,
}

/// JobDispatcher - 向在线设备派发作业
/// JobDispatcher - sends pending jobs to connected devices
pub struct JobDispatcher {
  gateway: Arc<Gateway>,
  config: DispatcherConfig,
  done: Arc<AtomicBool>,
}

impl JobDispatcher {
  pub fn new(gateway: Arc<Gateway>, config: DispatcherConfig) -> Self {
    Self {
      gateway,
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
          tracing::debug!("JobDispatcher: shutting down");
          break;
        }

        if let Err(e) = self.dispatch().await {
          tracing::error!("JobDispatcher error: {}", e);
        }
      }
    })
  }

  fn store(&self) -> &Arc<dyn Store> {
    self.gateway.store()
  }

  /// 执行一轮派发
  /// Run one dispatch round
  pub async fn dispatch(&self) -> Result<DispatchStats> {
    let jobs = self.store().list_pending_jobs(self.config.batch_size).await?;
    let mut stats = DispatchStats::default();

    for pending in jobs {
      let job_id = pending.job.id;
      if !self.gateway.registry().contains(&pending.job.device_id) {
        stats.skipped += 1;
        continue;
      }

      let outcome = match self.send(&pending).await {
        Ok(()) => self
          .store()
          .mark_job_sent(job_id, Utc::now())
          .await
          .map(|moved| (moved, true)),
        Err(reason) => {
          tracing::warn!(
            job_id,
            device_id = %pending.job.device_id,
            error = %reason,
            "Job dispatch failed"
          );
          self
            .store()
            .mark_job_failed(job_id, &reason, Utc::now())
            .await
            .map(|moved| (moved, false))
        }
      };

      match outcome {
        Ok((true, true)) => stats.sent += 1,
        Ok((true, false)) => stats.failed += 1,
        Ok((false, _)) => {
          tracing::debug!(job_id, "Job left pending before its transition was recorded");
        }
        Err(e) => {
          tracing::error!(job_id, error = %e, "Failed to record job outcome");
        }
      }
    }

    if stats.sent + stats.failed > 0 {
      tracing::info!(
        sent = stats.sent,
        failed = stats.failed,
        skipped = stats.skipped,
        "Jobs dispatched"
      );
    }
    Ok(stats)
  }

  /// 推送作业内容，失败时返回写入 lastError 的文本
  /// Push the job's payload; on failure returns the text written to lastError
  async fn send(&self, pending: &PendingJob) -> std::result::Result<(), String> {
    let device_id = &pending.job.device_id;
    match pending.payload_type {
      PayloadType::Image => {
        let file = pending
          .image_file
          .as_deref()
          .ok_or_else(|| NO_IMAGE_ERROR.to_string())?;
        let url = self.config.image_url(file);
        self
          .gateway
          .try_push_display_image(device_id, &url)
          .await
          .map_err(|e| e.to_string())
      }
      // 人脸同步目前只发送空的增量
      // Face sync currently sends an empty increment
      PayloadType::Face => self
        .gateway
        .try_push_change_persons(device_id, &PersonChanges::default())
        .await
        .map_err(|e| e.to_string()),
    }
  }

  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for JobDispatcher {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    JobDispatcher::start(self)
  }

  fn shutdown(&self) {
    JobDispatcher::shutdown(self)
  }

  fn is_done(&self) -> bool {
    JobDispatcher::is_done(self)
  }
}
