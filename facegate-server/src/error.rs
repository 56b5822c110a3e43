//! Error types for facegate-server

use thiserror::Error;

/// Result type for facegate-server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for facegate-server
#[derive(Error, Debug)]
pub enum Error {
  /// Gateway or store error
  #[error("Gateway error: {0}")]
  Gateway(#[from] facegate::error::Error),

  /// Invalid configuration
  #[error("Config error: {0}")]
  Config(String),

  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// Server error
  #[error("Server error: {0}")]
  Server(String),
}

impl Error {
  /// Create a config error
  pub fn config<S: Into<String>>(msg: S) -> Self {
    Self::Config(msg.into())
  }

  /// Create a server error
  pub fn server<S: Into<String>>(msg: S) -> Self {
    Self::Server(msg.into())
  }
}
