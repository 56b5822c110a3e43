//! 后台组件模块
//! Background components module
//!
//! 三个互相独立的周期任务，只通过存储共享状态：
//! Three independent periodic tasks that share state only through the store:
//!
//! - [`ScheduleMaterializer`](materializer::ScheduleMaterializer) - 把计划物化为作业 / turns schedules into jobs
//! - [`JobDispatcher`](dispatcher::JobDispatcher) - 向在线设备派发作业 / sends jobs to connected devices
//! - [`RetryManager`](retry::RetryManager) - 重新排队失败作业 / requeues failed jobs

use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod dispatcher;
pub mod materializer;
pub mod retry;

/// 组件生命周期管理接口
/// Component lifecycle interface
///
/// # 示例 / Example
///
/// ```rust,no_run
/// use facegate::components::ComponentLifecycle;
/// use facegate::components::retry::{RetryConfig, RetryManager};
/// use facegate::memdb::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() {
/// let store = Arc::new(MemoryStore::new());
/// let retry = Arc::new(RetryManager::new(store, RetryConfig::default()));
///
/// // 启动组件
/// // Start component
/// let handle = retry.clone().start();
///
/// // 关闭组件
/// // Shutdown component
/// retry.shutdown();
/// assert!(retry.is_done());
/// # let _ = handle.await;
/// # }
/// ```
pub trait ComponentLifecycle: Send + Sync {
  /// 启动组件的后台任务
  /// Start the component's background task
  fn start(self: Arc<Self>) -> JoinHandle<()>;

  /// 发送关闭信号，组件在当前一轮结束后停止
  /// Signal shutdown; the component stops after its current round
  fn shutdown(&self);

  /// 组件是否已停止
  /// Whether the component has stopped
  fn is_done(&self) -> bool;
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct Ticker {
    done: Arc<AtomicBool>,
  }

  impl ComponentLifecycle for Ticker {
    fn start(self: Arc<Self>) -> JoinHandle<()> {
      tokio::spawn(async move {
        while !self.done.load(Ordering::Relaxed) {
          tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
      })
    }

    fn shutdown(&self) {
      self.done.store(true, Ordering::Relaxed);
    }

    fn is_done(&self) -> bool {
      self.done.load(Ordering::Relaxed)
    }
  }

  #[tokio::test]
  async fn test_lifecycle_trait() {
    let component = Arc::new(Ticker {
      done: Arc::new(AtomicBool::new(false)),
    });
    let handle = component.clone().start();
    assert!(!component.is_done());

    component.shutdown();
    assert!(component.is_done());
    handle.await.unwrap();
  }
}
