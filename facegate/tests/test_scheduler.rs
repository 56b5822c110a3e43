//! 计划物化、作业派发与重试集成测试
//! Schedule materialization, job dispatch and retry integration tests

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use facegate::base::Store;
use facegate::components::dispatcher::{DispatcherConfig, JobDispatcher, NO_IMAGE_ERROR};
use facegate::components::materializer::{MaterializerConfig, ScheduleMaterializer};
use facegate::components::retry::{RetryConfig, RetryManager};
use facegate::components::ComponentLifecycle;
use facegate::cron::{is_cron_due, match_cron_field};
use facegate::gateway::Gateway;
use facegate::memdb::MemoryStore;
use facegate::model::{Job, JobState, PayloadType, Schedule, ScheduleStatus};
use facegate::registry::ConnectionRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn image_schedule(id: i64, cron: Option<&str>, targets: &[&str]) -> Schedule {
  Schedule {
    id,
    cron: cron.map(str::to_string),
    start_at: Utc::now() - ChronoDuration::hours(1),
    end_at: None,
    payload_type: PayloadType::Image,
    status: ScheduleStatus::Active,
    image_file: Some("poster.jpg".into()),
    targets: targets.iter().map(|t| t.to_string()).collect(),
  }
}

struct Fixture {
  store: MemoryStore,
  gateway: Arc<Gateway>,
  materializer: ScheduleMaterializer,
  dispatcher: JobDispatcher,
}

fn fixture() -> Fixture {
  let store = MemoryStore::new();
  let shared: Arc<dyn Store> = Arc::new(store.clone());
  let gateway = Arc::new(Gateway::new(
    shared.clone(),
    Arc::new(ConnectionRegistry::new()),
  ));
  Fixture {
    materializer: ScheduleMaterializer::new(shared, MaterializerConfig::default()),
    dispatcher: JobDispatcher::new(gateway.clone(), DispatcherConfig::default()),
    store,
    gateway,
  }
}

async fn connect(gateway: &Gateway, device_id: &str) -> mpsc::Receiver<String> {
  let (tx, rx) = mpsc::channel(16);
  let mut session = gateway.open_session(tx);
  let frame = format!(
    r#"{{"method":"registerDevice","params":{{"DeviceId":"{device_id}"}},"req_id":1}}"#
  );
  assert!(gateway.handle_frame(&mut session, &frame).await.is_success());
  rx
}

/// 一次性计划对每台设备最多生成一个作业
/// A one-shot schedule yields at most one job per device
#[tokio::test]
async fn test_one_shot_schedule_dedup() {
  let f = fixture();
  f.store.insert_schedule(image_schedule(1, None, &["D1", "D2"])).await;

  assert_eq!(f.materializer.materialize().await.unwrap(), 2);
  assert_eq!(f.materializer.materialize().await.unwrap(), 0);
  assert_eq!(f.store.jobs().await.len(), 2);
}

/// 在线设备的作业被发送，离线设备的作业保持 pending
/// Jobs for a connected device are sent; jobs for an offline one stay pending
#[tokio::test]
async fn test_dispatch_sends_online_and_skips_offline() {
  let f = fixture();
  let mut rx = connect(&f.gateway, "D1").await;
  f.store.insert_schedule(image_schedule(1, None, &["D1", "D2"])).await;
  f.materializer.materialize().await.unwrap();

  let stats = f.dispatcher.dispatch().await.unwrap();
  assert_eq!((stats.sent, stats.failed, stats.skipped), (1, 0, 1));

  let jobs = f.store.jobs().await;
  let d1 = jobs.iter().find(|j| j.device_id == "D1").unwrap();
  let d2 = jobs.iter().find(|j| j.device_id == "D2").unwrap();
  assert_eq!(d1.state, JobState::Sent);
  assert_eq!(d2.state, JobState::Pending);

  let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
  assert_eq!(frame["method"], "pushDisplayImage");
  assert_eq!(frame["params"]["Url"], "/facegate/images/poster.jpg");
}

/// 连接已关闭时派发失败，记录错误并增加重试计数
/// Dispatch over a closed connection fails, recording the error and bumping the retry count
#[tokio::test]
async fn test_dispatch_over_closed_connection_fails_job() {
  let f = fixture();
  let rx = connect(&f.gateway, "D1").await;
  drop(rx);
  f.store.insert_schedule(image_schedule(1, None, &["D1"])).await;
  f.materializer.materialize().await.unwrap();

  let stats = f.dispatcher.dispatch().await.unwrap();
  assert_eq!(stats.failed, 1);

  let job = f.store.jobs().await.remove(0);
  assert_eq!(job.state, JobState::Failed);
  assert_eq!(job.retry_count, 1);
  assert_eq!(job.last_error.as_deref(), Some("Device connection closed"));
}

/// 写端停滞的设备不会拖住其他设备的派发
/// A device whose writer has stalled does not hold up dispatch for other devices
#[tokio::test]
async fn test_stalled_device_does_not_block_dispatch() {
  let f = fixture();

  // D1 的出站通道容量为 1 且无人消费
  // D1's outbound channel holds one frame and nobody drains it
  let (tx, _stalled) = mpsc::channel(1);
  let mut session = f.gateway.open_session(tx);
  let frame = r#"{"method":"registerDevice","params":{"DeviceId":"D1"},"req_id":1}"#;
  assert!(f.gateway.handle_frame(&mut session, frame).await.is_success());
  let mut rx2 = connect(&f.gateway, "D2").await;

  f.store.insert_schedule(image_schedule(1, None, &["D1"])).await;
  f.store.insert_schedule(image_schedule(2, None, &["D1"])).await;
  f.store.insert_schedule(image_schedule(3, None, &["D2"])).await;
  f.materializer.materialize().await.unwrap();

  let stats = tokio::time::timeout(Duration::from_secs(2), f.dispatcher.dispatch())
    .await
    .expect("dispatch stalled on a full device queue")
    .unwrap();
  assert_eq!((stats.sent, stats.failed), (2, 1));

  let frame: Value = serde_json::from_str(&rx2.recv().await.unwrap()).unwrap();
  assert_eq!(frame["method"], "pushDisplayImage");

  let jobs = f.store.jobs().await;
  let d1: Vec<&Job> = jobs.iter().filter(|j| j.device_id == "D1").collect();
  assert_eq!(d1.iter().filter(|j| j.state == JobState::Sent).count(), 1);
  let failed = d1.iter().find(|j| j.state == JobState::Failed).unwrap();
  assert_eq!(failed.retry_count, 1);
  assert_eq!(failed.last_error.as_deref(), Some("Device outbound queue full"));
  let d2 = jobs.iter().find(|j| j.device_id == "D2").unwrap();
  assert_eq!(d2.state, JobState::Sent);
}

#[tokio::test]
async fn test_image_schedule_without_image_fails() {
  let f = fixture();
  let _rx = connect(&f.gateway, "D1").await;
  let mut schedule = image_schedule(1, None, &["D1"]);
  schedule.image_file = None;
  f.store.insert_schedule(schedule).await;
  f.materializer.materialize().await.unwrap();

  f.dispatcher.dispatch().await.unwrap();
  let job = f.store.jobs().await.remove(0);
  assert_eq!(job.state, JobState::Failed);
  assert_eq!(job.last_error.as_deref(), Some(NO_IMAGE_ERROR));
}

#[tokio::test]
async fn test_face_schedule_pushes_empty_increment() {
  let f = fixture();
  let mut rx = connect(&f.gateway, "D1").await;
  let mut schedule = image_schedule(1, None, &["D1"]);
  schedule.payload_type = PayloadType::Face;
  schedule.image_file = None;
  f.store.insert_schedule(schedule).await;
  f.materializer.materialize().await.unwrap();

  assert_eq!(f.dispatcher.dispatch().await.unwrap().sent, 1);
  let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
  assert_eq!(frame["method"], "pushChangePersons");
  assert_eq!(frame["params"]["SyncMode"], 2);
}

/// 重试次数达到上限的作业不再重新排队
/// Jobs at the retry ceiling are never requeued
#[tokio::test]
async fn test_retry_is_bounded() {
  let store = MemoryStore::new();
  let retry = RetryManager::new(Arc::new(store.clone()), RetryConfig::default());
  let old = Utc::now() - ChronoDuration::minutes(5);

  for (id, retry_count) in [(1, 2), (2, 3)] {
    store
      .put_job(Job {
        id,
        schedule_id: 1,
        device_id: "D1".into(),
        state: JobState::Failed,
        retry_count,
        last_error: Some("Device offline".into()),
        created_at: old,
        updated_at: old,
      })
      .await;
  }

  assert_eq!(retry.requeue_failed().await.unwrap(), 1);
  let requeued = store.get_job(1).await.unwrap().unwrap();
  assert_eq!(requeued.state, JobState::Pending);
  assert_eq!(requeued.retry_count, 2);
  let exhausted = store.get_job(2).await.unwrap().unwrap();
  assert_eq!(exhausted.state, JobState::Failed);
}

/// 刚失败的作业要等冷却时间过去才会重新排队
/// A freshly failed job waits out the cooldown before it is requeued
#[tokio::test]
async fn test_retry_waits_for_cooldown() {
  let store = MemoryStore::new();
  let retry = RetryManager::new(Arc::new(store.clone()), RetryConfig::default());
  let now = Utc::now();
  store
    .put_job(Job {
      id: 1,
      schedule_id: 1,
      device_id: "D1".into(),
      state: JobState::Failed,
      retry_count: 1,
      last_error: None,
      created_at: now,
      updated_at: now,
    })
    .await;

  assert_eq!(retry.requeue_failed_at(now).await.unwrap(), 0);
  assert_eq!(
    retry
      .requeue_failed_at(now + ChronoDuration::seconds(31))
      .await
      .unwrap(),
    1
  );
}

#[tokio::test]
async fn test_components_stop_on_shutdown() {
  let f = fixture();
  let store: Arc<dyn Store> = Arc::new(f.store.clone());
  let components: Vec<Arc<dyn ComponentLifecycle>> = vec![
    Arc::new(ScheduleMaterializer::new(
      store.clone(),
      MaterializerConfig {
        interval: Duration::from_millis(10),
        ..Default::default()
      },
    )),
    Arc::new(JobDispatcher::new(
      f.gateway.clone(),
      DispatcherConfig {
        interval: Duration::from_millis(10),
        ..Default::default()
      },
    )),
    Arc::new(RetryManager::new(
      store,
      RetryConfig {
        interval: Duration::from_millis(10),
        ..Default::default()
      },
    )),
  ];

  let handles: Vec<_> = components.iter().map(|c| c.clone().start()).collect();
  for component in &components {
    component.shutdown();
    assert!(component.is_done());
  }
  for handle in handles {
    tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .unwrap()
      .unwrap();
  }
}

#[test]
fn test_cron_fields() {
  assert!(match_cron_field("*", 17, 0, 59));
  assert!(match_cron_field("*/15", 30, 0, 59));
  assert!(!match_cron_field("*/15", 31, 0, 59));
  assert!(!match_cron_field("*/0", 0, 0, 59));
  assert!(match_cron_field("1,5,9", 5, 0, 59));
  assert!(!match_cron_field("1,5,9", 6, 0, 59));
  assert!(match_cron_field("7", 7, 0, 59));
}

#[test]
fn test_cron_expressions() {
  // 2024-03-04 是星期一
  // 2024-03-04 is a Monday
  let monday_0930 = Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
  assert!(is_cron_due("30 9 * * 1", &monday_0930));
  assert!(!is_cron_due("30 9 * * 0", &monday_0930));
  assert!(is_cron_due("*/10 * * * *", &monday_0930));
  assert!(!is_cron_due("0 * * * *", &monday_0930));
  // 段数不足或字段无法解析时视为到期
  // Too few fields or an unparseable field counts as due
  assert!(is_cron_due("30 9", &monday_0930));
  assert!(is_cron_due("61 * * * *", &monday_0930));
  assert!(is_cron_due("abc * * * *", &monday_0930));
}
