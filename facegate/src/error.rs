//! 错误处理模块
//! Error handling module
//!
//! 定义了 Facegate 库中使用的各种错误类型
//! Defines the error types used across the Facegate library

use thiserror::Error;

/// Facegate 库的结果类型
/// Result type for the Facegate library
pub type Result<T> = std::result::Result<T, Error>;

/// Facegate 错误类型
/// Facegate error type
#[derive(Error, Debug)]
pub enum Error {
  #[cfg(feature = "postgres")]
  /// SeaORM 数据库错误
  /// SeaORM database error
  #[error("SeaORM database error: {0}")]
  SeaOrm(#[from] sea_orm::DbErr),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// IO 错误
  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// 图片解码或编码错误
  /// Image decode or encode error
  #[error("Image error: {0}")]
  Image(#[from] image::ImageError),

  /// 参数无效
  /// Invalid parameters
  #[error("Invalid params: {0}")]
  InvalidParams(String),

  /// 实体未找到
  /// Entity not found
  #[error("Not found: {0}")]
  NotFound(String),

  /// 其他错误
  /// Other error
  #[error("Other error: {message}")]
  Other { message: String },
}

impl Error {
  /// 创建参数错误
  /// Create an invalid params error
  pub fn invalid_params<S: Into<String>>(message: S) -> Self {
    Self::InvalidParams(message.into())
  }

  /// 创建其他错误
  /// Create an other error
  pub fn other<S: Into<String>>(message: S) -> Self {
    Self::Other {
      message: message.into(),
    }
  }
}

/// 推送命令失败的原因
/// Reason a server-initiated push could not be delivered
///
/// 与 [`Error`] 分开，因为开门/继电器命令需要把离线作为错误返回给调用方
/// Kept apart from [`Error`] because door/relay commands surface offline devices to the caller
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
  /// 注册表中没有该设备的连接
  /// No live handle for the device in the registry
  #[error("Device offline")]
  Offline,
  /// 连接存在，但其写通道已经关闭
  /// A handle exists but its outbound channel is closed
  #[error("Device connection closed")]
  Closed,
  /// 连接的出站队列已满，写端没有在消费
  /// The connection's outbound queue is full; its writer is not draining it
  #[error("Device outbound queue full")]
  Congested,
}

/// 推送命令的结果类型
/// Result type of push commands
pub type PushResult = std::result::Result<(), PushError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_push_error_messages() {
    assert_eq!(PushError::Offline.to_string(), "Device offline");
    assert_eq!(PushError::Closed.to_string(), "Device connection closed");
    assert_eq!(PushError::Congested.to_string(), "Device outbound queue full");
  }

  #[test]
  fn test_error_helpers() {
    let e = Error::other("unavailable");
    assert_eq!(e.to_string(), "Other error: unavailable");
    let e = Error::invalid_params("DeviceId required");
    assert_eq!(e.to_string(), "Invalid params: DeviceId required");
  }
}
