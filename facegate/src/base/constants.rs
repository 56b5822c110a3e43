use std::time::Duration;

/// 单帧最大字节数（容纳 base64 人脸图片）
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// 作业最大重试次数
pub const DEFAULT_MAX_RETRY: i32 = 3;

/// 物化器间隔
pub const DEFAULT_MATERIALIZE_INTERVAL: Duration = Duration::from_secs(10);
/// 派发器间隔
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(5);
/// 重试管理器间隔
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// cron 计划的去重窗口，小于一分钟以便每分钟最多生成一次
pub const DEFAULT_CRON_DEDUP_WINDOW: Duration = Duration::from_secs(55);
/// 失败作业重新入队前的冷却时间
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(30);

/// 每轮扫描的计划数量上限
pub const DEFAULT_SCHEDULE_SCAN_LIMIT: u64 = 200;
/// 每轮派发的作业数量上限
pub const DEFAULT_DISPATCH_BATCH_SIZE: u64 = 50;
/// 每轮重新入队的作业数量上限
pub const DEFAULT_RETRY_BATCH_SIZE: u64 = 100;

/// 心跳响应附带时间戳的概率
pub const DEFAULT_TIME_SYNC_PROBABILITY: f64 = 0.01;

/// getPersonsByPage 未给出 PersonCount 时的页大小
pub const DEFAULT_PERSON_PAGE_SIZE: u64 = 100;

/// 图片的默认 URL 前缀
pub const DEFAULT_IMAGE_URL_PREFIX: &str = "/facegate/images";

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_constants() {
    assert_eq!(MAX_FRAME_SIZE, 33_554_432);
    assert_eq!(DEFAULT_MAX_RETRY, 3);
    assert!(DEFAULT_CRON_DEDUP_WINDOW < Duration::from_secs(60));
    assert!(DEFAULT_CRON_DEDUP_WINDOW > DEFAULT_MATERIALIZE_INTERVAL);
  }
}
