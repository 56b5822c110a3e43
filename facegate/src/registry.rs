//! 连接注册表
//! Connection registry
//!
//! 设备 ID 到其在线连接写通道的映射，是"谁在线"的唯一共享状态
//! Maps a device id to the outbound channel of its live connection; the only shared
//! state that answers "who is online"

use crate::error::PushError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// 一个设备连接的写端句柄
/// Write-side handle of one device connection
#[derive(Debug, Clone)]
pub struct DeviceHandle {
  conn_id: u64,
  tx: mpsc::Sender<String>,
}

impl DeviceHandle {
  pub fn new(conn_id: u64, tx: mpsc::Sender<String>) -> Self {
    Self { conn_id, tx }
  }

  /// 所属连接的 ID
  /// Id of the owning connection
  pub fn conn_id(&self) -> u64 {
    self.conn_id
  }

  /// 写通道是否已关闭
  /// Whether the outbound channel is closed
  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  /// 发送一帧文本，不等待通道空位
  /// Send one text frame without waiting for channel capacity
  ///
  /// 写端停滞的连接会填满通道，此时返回 [`PushError::Congested`] 而不是阻塞调用方
  /// A stalled writer fills the channel; that yields [`PushError::Congested`] instead of
  /// blocking the caller
  pub fn send(&self, frame: String) -> Result<(), PushError> {
    self.tx.try_send(frame).map_err(|e| match e {
      TrySendError::Full(_) => PushError::Congested,
      TrySendError::Closed(_) => PushError::Closed,
    })
  }
}

/// 连接注册表
/// Connection registry
///
/// 同一设备 ID 至多对应一个句柄，后注册的连接覆盖先前的映射
/// A device id maps to at most one handle; the latest registration replaces any earlier one
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
  handles: RwLock<HashMap<String, DeviceHandle>>,
  next_conn_id: AtomicU64,
}

impl ConnectionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 为新接受的连接分配进程内唯一的 ID
  /// Allocate a process-unique id for a newly accepted connection
  pub fn next_conn_id(&self) -> u64 {
    self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// 写入映射，返回被替换的旧句柄
  /// Insert a mapping, returning the replaced handle if any
  pub fn put(&self, device_id: &str, handle: DeviceHandle) -> Option<DeviceHandle> {
    self
      .handles
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(device_id.to_string(), handle)
  }

  pub fn get(&self, device_id: &str) -> Option<DeviceHandle> {
    self
      .handles
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(device_id)
      .cloned()
  }

  pub fn remove(&self, device_id: &str) -> Option<DeviceHandle> {
    self
      .handles
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(device_id)
  }

  /// 仅当映射仍属于 `conn_id` 时才移除
  /// Remove the mapping only while it still belongs to `conn_id`
  ///
  /// 返回是否发生了移除
  /// Returns whether a mapping was removed
  pub fn remove_if_owner(&self, device_id: &str, conn_id: u64) -> bool {
    let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
    match handles.get(device_id) {
      Some(handle) if handle.conn_id == conn_id => {
        handles.remove(device_id);
        true
      }
      _ => false,
    }
  }

  pub fn contains(&self, device_id: &str) -> bool {
    self
      .handles
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(device_id)
  }

  /// 当前在线连接数
  /// Number of live registrations
  pub fn len(&self) -> usize {
    self.handles.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 当前在线的设备 ID
  /// Ids of the currently registered devices
  pub fn device_ids(&self) -> Vec<String> {
    self
      .handles
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect()
  }
}
