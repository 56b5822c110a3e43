//! RetryManager 模块
//! RetryManager module
//!
//! 定期把冷却期已过且未达到重试上限的失败作业重新置为 pending，retry_count 保持不变；
//! 达到上限的作业永远停留在 failed
//! Periodically moves failed jobs whose cooldown has passed and whose retry_count is below the
//! ceiling back to pending, keeping retry_count; jobs at the ceiling stay failed for good

use crate::base::constants::{
  DEFAULT_MAX_RETRY, DEFAULT_RETRY_BATCH_SIZE, DEFAULT_RETRY_COOLDOWN, DEFAULT_RETRY_INTERVAL,
};
use crate::base::Store;
use crate::components::ComponentLifecycle;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// RetryManager 配置
/// RetryManager configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
  /// 检查间隔
  /// Check interval
  pub interval: Duration,
  /// 失败后至少等待多久才重新排队
  /// Minimum time since failure before requeueing
  pub cooldown: Duration,
  /// 重试上限
  /// Retry ceiling
  pub max_retry: i32,
  /// 每轮最多重新排队的作业数
  /// Max jobs requeued per round
  pub batch_size: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_RETRY_INTERVAL,
      cooldown: DEFAULT_RETRY_COOLDOWN,
      max_retry: DEFAULT_MAX_RETRY,
      batch_size: DEFAULT_RETRY_BATCH_SIZE,
    }
  }
}

/// RetryManager - 重新排队失败作业
/// RetryManager - requeues failed jobs
pub struct RetryManager {
  store: Arc<dyn Store>,
  config: RetryConfig,
  done: Arc<AtomicBool>,
}

impl RetryManager {
  pub fn new(store: Arc<dyn Store>, config: RetryConfig) -> Self {
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
          tracing::debug!("RetryManager: shutting down");
          break;
        }

        if let Err(e) = self.requeue_failed().await {
          tracing::error!("RetryManager error: {}", e);
        }
      }
    })
  }

  pub async fn requeue_failed(&self) -> Result<usize> {
    self.requeue_failed_at(Utc::now()).await
  }

  /// 以给定时间执行一轮重新排队，返回被重新排队的作业数
  /// Run one requeue round at `now`, returning how many jobs went back to pending
  pub async fn requeue_failed_at(&self, now: DateTime<Utc>) -> Result<usize> {
    let cooldown = chrono::Duration::from_std(self.config.cooldown)
      .map_err(|e| Error::other(format!("Invalid retry cooldown: {e}")))?;
    let jobs = self
      .store
      .list_retryable_jobs(now - cooldown, self.config.max_retry, self.config.batch_size)
      .await?;

    let mut requeued = 0;
    for job in jobs {
      match self.store.requeue_job(job.id, self.config.max_retry, now).await {
        Ok(true) => {
          tracing::debug!(job_id = job.id, retry_count = job.retry_count, "Job requeued");
          requeued += 1;
        }
        Ok(false) => {}
        Err(e) => tracing::warn!(job_id = job.id, error = %e, "Failed to requeue job"),
      }
    }

    if requeued > 0 {
      tracing::info!(requeued, "Failed jobs requeued");
    }
    Ok(requeued)
  }

  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for RetryManager {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    RetryManager::start(self)
  }

  fn shutdown(&self) {
    RetryManager::shutdown(self)
  }

  fn is_done(&self) -> bool {
    RetryManager::is_done(self)
  }
}
