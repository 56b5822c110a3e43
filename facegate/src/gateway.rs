//! 设备网关
//! Device gateway
//!
//! 解析设备上行帧、按方法路由到处理器并生成响应信封，同时负责服务端推送命令
//! Parses inbound device frames, routes them by method to a handler and builds the response
//! envelope; also issues server-initiated push commands
//!
//! 每个入站帧都会得到恰好一个响应信封，处理器错误不会中断连接：
//! Every inbound frame gets exactly one response envelope and handler errors never end the
//! connection:
//!
//! - 无法解析的 JSON / unparseable JSON: 100 "Bad JSON", req_id 0
//! - 参数错误 / bad params: 100
//! - 未知方法 / unknown method: 105 "Not supported"
//! - 其他错误 / anything else: 900 "Internal error"

use crate::base::constants::{DEFAULT_PERSON_PAGE_SIZE, DEFAULT_TIME_SYNC_PROBABILITY};
use crate::base::Store;
use crate::error::{Error, PushError, PushResult, Result};
use crate::model::{DeviceRegistration, Person};
use crate::protocol::message::{
  parse_record, HeartBeatParams, PersonRef, PersonsByIdParams, PersonsByPageParams,
  RegisterDeviceParams, UploadRecordsParams, SYNC_MODE_INCREMENTAL,
};
use crate::protocol::{
  InboundFrame, Method, PersonChanges, PersonEntry, PushFrame, PushMethod, Response, ResultCode,
};
use crate::registry::{ConnectionRegistry, DeviceHandle};
use base64::prelude::*;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 网关配置
/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
  /// 心跳响应附带 Timestamp 的概率
  /// Probability that a heartbeat response carries a Timestamp
  pub time_sync_probability: f64,
  /// getPersonsByPage 缺省页大小
  /// Default page size of getPersonsByPage
  pub person_page_size: u64,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      time_sync_probability: DEFAULT_TIME_SYNC_PROBABILITY,
      person_page_size: DEFAULT_PERSON_PAGE_SIZE,
    }
  }
}

/// 一条设备连接的会话状态
/// Session state of one device connection
#[derive(Debug)]
pub struct DeviceSession {
  handle: DeviceHandle,
  device_id: Option<String>,
}

impl DeviceSession {
  pub fn conn_id(&self) -> u64 {
    self.handle.conn_id()
  }

  /// 该连接注册的设备 ID
  /// Device id this connection registered as
  pub fn device_id(&self) -> Option<&str> {
    self.device_id.as_deref()
  }
}

/// 设备网关
/// Device gateway
pub struct Gateway {
  store: Arc<dyn Store>,
  registry: Arc<ConnectionRegistry>,
  config: GatewayConfig,
  /// 推送请求 ID，全局递增，2^32 回绕
  /// Push request id, process-wide, wrapping at 2^32
  req_id: AtomicU32,
}

impl Gateway {
  pub fn new(store: Arc<dyn Store>, registry: Arc<ConnectionRegistry>) -> Self {
    Self::with_config(store, registry, GatewayConfig::default())
  }

  pub fn with_config(
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    config: GatewayConfig,
  ) -> Self {
    Self {
      store,
      registry,
      config,
      req_id: AtomicU32::new(1),
    }
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  pub fn registry(&self) -> &Arc<ConnectionRegistry> {
    &self.registry
  }

  /// 为新连接创建会话，`tx` 是该连接的出站帧通道
  /// Create a session for a new connection; `tx` is its outbound frame channel
  pub fn open_session(&self, tx: mpsc::Sender<String>) -> DeviceSession {
    DeviceSession {
      handle: DeviceHandle::new(self.registry.next_conn_id(), tx),
      device_id: None,
    }
  }

  /// 连接关闭：仅当注册表项仍属于该连接时才移除并标记设备离线
  /// Connection closed: remove the registry entry and mark the device offline only while the
  /// entry still belongs to this connection
  pub async fn close_session(&self, session: &DeviceSession) {
    let Some(device_id) = session.device_id() else {
      return;
    };
    if self.registry.remove_if_owner(device_id, session.conn_id()) {
      if let Err(e) = self.store.set_device_online(device_id, false).await {
        tracing::error!(device_id = %device_id, error = %e, "Failed to mark device offline");
      }
      tracing::info!(device_id = %device_id, "Device disconnected");
    } else {
      tracing::debug!(
        device_id = %device_id,
        conn_id = session.conn_id(),
        "Stale connection closed, device registered elsewhere"
      );
    }
  }

  /// 处理一个入站文本帧，总是返回一个响应信封
  /// Handle one inbound text frame, always yielding a response envelope
  pub async fn handle_frame(&self, session: &mut DeviceSession, text: &str) -> Response {
    let frame = match InboundFrame::parse(text) {
      Ok(frame) => frame,
      Err(e) => {
        tracing::warn!(conn_id = session.conn_id(), error = %e, "Bad JSON frame");
        return Response::bad_json();
      }
    };

    let method = frame.method();
    match self.dispatch(session, &method, &frame).await {
      Ok(response) => response,
      Err(Error::InvalidParams(msg)) => {
        tracing::warn!(method = %method.name(), error = %msg, "Bad params");
        Response::error(method.name(), frame.req_id, ResultCode::BadParams, "Bad params")
      }
      Err(e) => {
        tracing::error!(method = %method.name(), error = %e, "Handler failed");
        Response::error(
          method.name(),
          frame.req_id,
          ResultCode::Internal,
          "Internal error",
        )
      }
    }
  }

  async fn dispatch(
    &self,
    session: &mut DeviceSession,
    method: &Method,
    frame: &InboundFrame,
  ) -> Result<Response> {
    let req_id = frame.req_id;
    match method {
      Method::RegisterDevice => self.register_device(session, frame.params_as()?, req_id).await,
      Method::HeartBeat => self.heart_beat(frame.params_as()?, req_id).await,
      Method::UploadRecords => self.upload_records(frame.params_as()?, req_id).await,
      Method::GetPersonCount => self.get_person_count(req_id).await,
      Method::GetPersonsByPage => self.get_persons_by_page(frame.params_as()?, req_id).await,
      Method::GetPersonsById => self.get_persons_by_id(frame.params_as()?, req_id).await,
      // 设备自己是这些变更的来源，只需确认
      // The device is the source of these edits; only acknowledge
      Method::InsertPerson | Method::UpdatePerson | Method::RemovePerson => {
        Ok(Response::ack(method.name(), req_id))
      }
      Method::Unknown(name) => {
        tracing::debug!(method = %name, "Unsupported method");
        Ok(Response::error(
          method.name(),
          req_id,
          ResultCode::NotSupported,
          "Not supported",
        ))
      }
    }
  }

  async fn register_device(
    &self,
    session: &mut DeviceSession,
    params: RegisterDeviceParams,
    req_id: i64,
  ) -> Result<Response> {
    let Some(device_id) = params.device_id.filter(|id| !id.is_empty()) else {
      return Ok(Response::error(
        Method::RegisterDevice.name(),
        req_id,
        ResultCode::BadParams,
        "DeviceId required",
      ));
    };

    // 同一连接换了设备 ID 时，释放旧的注册
    // Release the previous registration when a connection switches device ids
    let released = session
      .device_id
      .take()
      .filter(|previous| previous != &device_id)
      .filter(|previous| self.registry.remove_if_owner(previous, session.conn_id()));

    // 注册表先于存储：旧连接随后的关闭通不过所有权检查
    // Registry before store: a later close of the old connection fails the ownership check
    if let Some(replaced) = self.registry.put(&device_id, session.handle.clone()) {
      if replaced.conn_id() != session.conn_id() {
        tracing::info!(
          device_id = %device_id,
          old_conn = replaced.conn_id(),
          new_conn = session.conn_id(),
          "Device re-registered on a new connection"
        );
      }
    }
    session.device_id = Some(device_id.clone());

    let now = Utc::now();
    let registration = DeviceRegistration {
      device_id: device_id.clone(),
      product_type: params.prod_type,
      product_name: params.prod_name,
      relay_slot_count: params.relay_out_slots.unwrap_or(0),
    };
    self.store.upsert_device(&registration, now).await?;

    if let Some(previous) = released {
      self.store.set_device_online(&previous, false).await?;
    }

    tracing::info!(
      device_id = %device_id,
      relay_slots = registration.relay_slot_count,
      "Device registered"
    );
    Ok(Response::ok(
      Method::RegisterDevice.name(),
      req_id,
      json!({ "Timestamp": now.timestamp() }),
    ))
  }

  async fn heart_beat(&self, params: HeartBeatParams, req_id: i64) -> Result<Response> {
    let now = Utc::now();
    if let Some(device_id) = params.device_id.filter(|id| !id.is_empty()) {
      if !self.store.touch_device(&device_id, now).await? {
        tracing::debug!(device_id = %device_id, "Heartbeat from unregistered device");
      }
    }

    let params = if rand::random::<f64>() < self.config.time_sync_probability {
      json!({ "Timestamp": now.timestamp() })
    } else {
      json!({})
    };
    Ok(Response::ok(Method::HeartBeat.name(), req_id, params))
  }

  async fn upload_records(&self, params: UploadRecordsParams, req_id: i64) -> Result<Response> {
    let device_id = params.device_id.filter(|id| !id.is_empty());
    let (Some(device_id), Some(Value::Array(records))) = (device_id, params.records) else {
      return Ok(Response::error(
        Method::UploadRecords.name(),
        req_id,
        ResultCode::BadParams,
        "Bad params",
      ));
    };

    let mut inserted = 0usize;
    for raw in &records {
      let record = match parse_record(&device_id, raw) {
        Ok(record) => record,
        Err(e) => {
          tracing::warn!(device_id = %device_id, error = %e, "Skipping malformed record");
          continue;
        }
      };
      match self.store.insert_record(&record).await {
        Ok(true) => inserted += 1,
        Ok(false) => {}
        Err(e) => {
          tracing::error!(
            device_id = %device_id,
            record_id = record.record_id,
            error = %e,
            "Failed to save record"
          );
        }
      }
    }

    tracing::debug!(
      device_id = %device_id,
      received = records.len(),
      declared = ?params.record_count,
      inserted,
      "Records uploaded"
    );
    Ok(Response::ack(Method::UploadRecords.name(), req_id))
  }

  async fn get_person_count(&self, req_id: i64) -> Result<Response> {
    let count = self.store.count_persons().await?;
    Ok(Response::ok(
      Method::GetPersonCount.name(),
      req_id,
      json!({ "Timestamp": Utc::now().timestamp(), "PersonCount": count }),
    ))
  }

  async fn get_persons_by_page(&self, params: PersonsByPageParams, req_id: i64) -> Result<Response> {
    let offset = params.offset.unwrap_or(0);
    let limit = params.person_count.unwrap_or(self.config.person_page_size);
    let persons = self.store.list_persons(offset, limit).await?;

    let mut entries = Vec::with_capacity(persons.len());
    for person in &persons {
      entries.push(self.person_entry(person, false).await);
    }

    Ok(Response::ok(
      Method::GetPersonsByPage.name(),
      req_id,
      json!({
        "Timestamp": Utc::now().timestamp(),
        "PersonCount": entries.len(),
        "Persons": entries,
      }),
    ))
  }

  async fn get_persons_by_id(&self, params: PersonsByIdParams, req_id: i64) -> Result<Response> {
    let Some(refs) = params.persons else {
      return Ok(Response::error(
        Method::GetPersonsById.name(),
        req_id,
        ResultCode::BadParams,
        "Bad params",
      ));
    };
    let phones: Vec<String> = refs.into_iter().map(|PersonRef { person_id }| person_id).collect();
    let persons = self.store.find_persons(&phones).await?;

    let mut entries = Vec::with_capacity(persons.len());
    for person in &persons {
      entries.push(self.person_entry(person, true).await);
    }

    Ok(Response::ok(
      Method::GetPersonsById.name(),
      req_id,
      json!({ "PersonCount": entries.len(), "Persons": entries }),
    ))
  }

  /// 构造下发条目，照片读取失败时记录日志并省略该字段
  /// Build a person entry; a picture that cannot be read is logged and left out
  async fn person_entry(&self, person: &Person, with_ext: bool) -> PersonEntry {
    let mut entry = PersonEntry::from_person(person);
    if with_ext {
      entry = entry.with_ext_info(person);
    }
    if let Some(path) = person.local_image_path.as_deref() {
      match tokio::fs::read(path).await {
        Ok(bytes) => entry.person_picture = Some(BASE64_STANDARD.encode(bytes)),
        Err(e) => {
          tracing::warn!(phone = %person.phone, path = %path, error = %e, "Failed to read person image");
        }
      }
    }
    entry
  }

  // === 服务端推送 / Server pushes ===

  /// 分配下一个推送请求 ID
  /// Allocate the next push request id
  pub fn next_req_id(&self) -> u32 {
    self.req_id.fetch_add(1, Ordering::Relaxed)
  }

  async fn push(&self, device_id: &str, method: PushMethod, params: Value) -> PushResult {
    let handle = self.registry.get(device_id).ok_or(PushError::Offline)?;
    let frame = PushFrame::new(method, params, self.next_req_id());
    let req_id = frame.req_id;
    handle.send(frame.into_text())?;
    tracing::debug!(device_id = %device_id, method = method.name(), req_id, "Push sent");
    Ok(())
  }

  /// 远程开门，设备离线时返回错误
  /// Open a door remotely; errors when the device is offline
  pub async fn push_remote_open_door(&self, device_id: &str, dev_idx: i32) -> PushResult {
    self
      .push(device_id, PushMethod::RemoteOpenDoor, json!({ "DevIdx": dev_idx }))
      .await
  }

  /// 继电器输出，`delay` 单位为秒，设备离线时返回错误
  /// Pulse a relay output for `delay` seconds; errors when the device is offline
  pub async fn push_relay_out(
    &self,
    device_id: &str,
    relay_idx: i32,
    delay: u32,
  ) -> PushResult {
    self
      .push(
        device_id,
        PushMethod::RelayOut,
        json!({ "RelayIdx": relay_idx, "Delay": delay }),
      )
      .await
  }

  /// 让设备显示指定 URL 的图片
  /// Ask the device to display the image at `url`
  pub async fn try_push_display_image(&self, device_id: &str, url: &str) -> PushResult {
    self.push(device_id, PushMethod::DisplayImage, json!({ "Url": url })).await
  }

  /// 同 [`Self::try_push_display_image`]，设备离线时返回 false 而不是错误
  /// Like [`Self::try_push_display_image`] but returns false instead of an error
  pub async fn push_display_image(&self, device_id: &str, url: &str) -> bool {
    self.try_push_display_image(device_id, url).await.is_ok()
  }

  /// 增量同步人员
  /// Incremental person sync
  pub async fn try_push_change_persons(
    &self,
    device_id: &str,
    changes: &PersonChanges,
  ) -> PushResult {
    let params = json!({
      "Timestamp": Utc::now().timestamp(),
      "SyncMode": SYNC_MODE_INCREMENTAL,
      "InsertPersons": changes.insert_persons,
      "UpdatePersons": changes.update_persons,
      "RemovePersons": changes.remove_persons,
    });
    self.push(device_id, PushMethod::ChangePersons, params).await
  }

  pub async fn push_change_persons(&self, device_id: &str, changes: &PersonChanges) -> bool {
    self.try_push_change_persons(device_id, changes).await.is_ok()
  }

  /// 把人员的当前信息作为 UpdatePersons 推送给所有在线设备，返回送达的设备数
  /// Push a person's current entry as UpdatePersons to every connected device, returning
  /// how many devices it reached
  pub async fn broadcast_person_update(&self, phone: &str) -> Result<usize> {
    let persons = self.store.find_persons(&[phone.to_string()]).await?;
    let Some(person) = persons.first() else {
      return Err(Error::NotFound(format!("person {phone}")));
    };
    let changes = PersonChanges {
      update_persons: vec![self.person_entry(person, false).await],
      ..Default::default()
    };

    let mut delivered = 0;
    for device_id in self.registry.device_ids() {
      match self.try_push_change_persons(&device_id, &changes).await {
        Ok(()) => delivered += 1,
        Err(e) => tracing::debug!(device_id = %device_id, error = %e, "Person update not delivered"),
      }
    }
    Ok(delivered)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdb::MemoryStore;

  fn gateway() -> (Gateway, MemoryStore) {
    let store = MemoryStore::new();
    let gateway = Gateway::new(Arc::new(store.clone()), Arc::new(ConnectionRegistry::new()));
    (gateway, store)
  }

  #[test]
  fn test_req_id_wraps() {
    let (gateway, _) = gateway();
    gateway.req_id.store(u32::MAX, Ordering::Relaxed);
    assert_eq!(gateway.next_req_id(), u32::MAX);
    assert_eq!(gateway.next_req_id(), 0);
    assert_eq!(gateway.next_req_id(), 1);
  }

  #[tokio::test]
  async fn test_register_requires_device_id() {
    let (gateway, _) = gateway();
    let (tx, _rx) = mpsc::channel(8);
    let mut session = gateway.open_session(tx);
    let resp = gateway
      .handle_frame(&mut session, r#"{"method":"registerDevice","params":{},"req_id":4}"#)
      .await;
    assert_eq!(resp.result, 100);
    assert_eq!(resp.err_msg, "DeviceId required");
    assert_eq!(resp.req_id, 4);
    assert!(session.device_id().is_none());
  }

  #[tokio::test]
  async fn test_heartbeat_time_sync_always() {
    let store = MemoryStore::new();
    let gateway = Gateway::with_config(
      Arc::new(store),
      Arc::new(ConnectionRegistry::new()),
      GatewayConfig {
        time_sync_probability: 1.0,
        ..Default::default()
      },
    );
    let (tx, _rx) = mpsc::channel(8);
    let mut session = gateway.open_session(tx);
    let resp = gateway
      .handle_frame(&mut session, r#"{"method":"heartBeat","params":{},"req_id":2}"#)
      .await;
    assert!(resp.is_success());
    assert!(resp.params.unwrap().get("Timestamp").is_some());
  }

  #[tokio::test]
  async fn test_heartbeat_without_time_sync() {
    let store = MemoryStore::new();
    let gateway = Gateway::with_config(
      Arc::new(store),
      Arc::new(ConnectionRegistry::new()),
      GatewayConfig {
        time_sync_probability: 0.0,
        ..Default::default()
      },
    );
    let (tx, _rx) = mpsc::channel(8);
    let mut session = gateway.open_session(tx);
    let resp = gateway
      .handle_frame(&mut session, r#"{"method":"heartBeat","req_id":2}"#)
      .await;
    assert_eq!(resp.params, Some(json!({})));
    assert_eq!(resp.err_msg, "Success");
  }

  #[tokio::test]
  async fn test_push_to_offline_device() {
    let (gateway, _) = gateway();
    assert_eq!(
      gateway.push_remote_open_door("ghost", 0).await,
      Err(PushError::Offline)
    );
    assert_eq!(
      gateway.push_relay_out("ghost", 0, 5).await,
      Err(PushError::Offline)
    );
    assert!(!gateway.push_display_image("ghost", "/x.jpg").await);
    assert!(!gateway.push_change_persons("ghost", &PersonChanges::default()).await);
  }

  #[tokio::test]
  async fn test_push_frame_shape() {
    let (gateway, _) = gateway();
    let (tx, mut rx) = mpsc::channel(8);
    let mut session = gateway.open_session(tx);
    gateway
      .handle_frame(
        &mut session,
        r#"{"method":"registerDevice","params":{"DeviceId":"D1"},"req_id":1}"#,
      )
      .await;

    gateway.push_relay_out("D1", 1, 5).await.unwrap();
    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["method"], "pushRelayOut");
    assert_eq!(frame["params"], json!({"RelayIdx": 1, "Delay": 5}));
    assert!(frame.get("result").is_none());

    assert!(gateway.push_change_persons("D1", &PersonChanges::default()).await);
    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["params"]["SyncMode"], 2);
    assert_eq!(frame["params"]["InsertPersons"], json!([]));
  }

  #[tokio::test]
  async fn test_persons_by_id_requires_list() {
    let (gateway, _) = gateway();
    let (tx, _rx) = mpsc::channel(8);
    let mut session = gateway.open_session(tx);
    let resp = gateway
      .handle_frame(&mut session, r#"{"method":"getPersonsById","params":{},"req_id":6}"#)
      .await;
    assert_eq!(resp.result, 100);
  }

  #[tokio::test]
  async fn test_person_picture_read_failure_is_omitted() {
    let (gateway, store) = gateway();
    let mut person = Person::new("13900000001", "Ann");
    person.local_image_path = Some("/definitely/not/here.jpg".into());
    person.member_level = Some("gold".into());
    store.upsert_person(&person).await.unwrap();

    let (tx, _rx) = mpsc::channel(8);
    let mut session = gateway.open_session(tx);
    let resp = gateway
      .handle_frame(
        &mut session,
        r#"{"method":"getPersonsById","params":{"Persons":[{"PersonID":"13900000001"}]},"req_id":8}"#,
      )
      .await;
    assert!(resp.is_success());
    let params = resp.params.unwrap();
    assert_eq!(params["PersonCount"], 1);
    let entry = &params["Persons"][0];
    assert!(entry.get("PersonPicture").is_none());
    assert_eq!(entry["ExtInfo"]["MemberLevel"], "gold");
    assert_eq!(entry["ExtInfo"]["MemberExpiry"], Value::Null);
  }

  #[tokio::test]
  async fn test_broadcast_person_update() {
    let (gateway, store) = gateway();
    store.upsert_person(&Person::new("13900000002", "Bo")).await.unwrap();
    assert!(matches!(
      gateway.broadcast_person_update("13900000009").await,
      Err(Error::NotFound(_))
    ));

    let (tx, mut rx) = mpsc::channel(8);
    let mut session = gateway.open_session(tx);
    gateway
      .handle_frame(
        &mut session,
        r#"{"method":"registerDevice","params":{"DeviceId":"D1"},"req_id":1}"#,
      )
      .await;

    assert_eq!(gateway.broadcast_person_update("13900000002").await.unwrap(), 1);
    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["method"], "pushChangePersons");
    assert_eq!(frame["params"]["UpdatePersons"][0]["PersonID"], "13900000002");
    assert_eq!(frame["params"]["InsertPersons"], json!([]));
  }
}
