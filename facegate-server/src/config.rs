//! Environment-driven server configuration
//!
//! Every setting has a default; `ServerConfig::from_env` reads the `FACEGATE_*`
//! variables (plus `DATABASE_URL`) and logs each default it falls back to.

use crate::error::{Error, Result};
use facegate::base::constants::{
  DEFAULT_DISPATCH_INTERVAL, DEFAULT_IMAGE_URL_PREFIX, DEFAULT_MATERIALIZE_INTERVAL,
  DEFAULT_RETRY_INTERVAL,
};
use facegate::components::dispatcher::DispatcherConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3003";
pub const DEFAULT_DATA_DIR: &str = "./facegate-data";

/// Basic authentication credentials for the operator routes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicAuth {
  pub username: String,
  pub password: String,
}

impl BasicAuth {
  pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
    Self {
      username: username.into(),
      password: password.into(),
    }
  }

  /// Check an `Authorization` header value of the form `Basic <base64(user:pass)>`
  pub fn verify_header(&self, header: &str) -> bool {
    use base64::prelude::*;

    let Some(encoded) = header.strip_prefix("Basic ") else {
      return false;
    };
    let Ok(decoded) = BASE64_STANDARD.decode(encoded.trim()) else {
      return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
      return false;
    };
    match decoded.split_once(':') {
      Some((user, pass)) => user == self.username && pass == self.password,
      None => false,
    }
  }
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
  /// Listen address for HTTP and `/ws`
  pub addr: SocketAddr,
  /// Root of `images/` and `uploads/`
  pub data_dir: PathBuf,
  /// URL prefix used in `pushDisplayImage` and under which images are served
  pub image_url_prefix: String,
  /// Optional origin prepended to image URLs
  pub public_base_url: Option<String>,
  /// PostgreSQL connection string; the memory store is used when absent
  pub database_url: Option<String>,
  /// Operator route credentials; operator routes are disabled when absent
  pub admin: Option<BasicAuth>,
  pub materialize_interval: Duration,
  pub dispatch_interval: Duration,
  pub retry_interval: Duration,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      addr: SocketAddr::from(([0, 0, 0, 0], 3003)),
      data_dir: PathBuf::from(DEFAULT_DATA_DIR),
      image_url_prefix: DEFAULT_IMAGE_URL_PREFIX.to_string(),
      public_base_url: None,
      database_url: None,
      admin: None,
      materialize_interval: DEFAULT_MATERIALIZE_INTERVAL,
      dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
      retry_interval: DEFAULT_RETRY_INTERVAL,
    }
  }
}

impl ServerConfig {
  /// Load the configuration from the process environment
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Load the configuration from an arbitrary variable lookup
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let addr = match var("FACEGATE_ADDR") {
      Some(v) => SocketAddr::from_str(&v)
        .map_err(|e| Error::config(format!("FACEGATE_ADDR={v}: {e}")))?,
      None => {
        info!("FACEGATE_ADDR not set, using {}", DEFAULT_ADDR);
        SocketAddr::from_str(DEFAULT_ADDR).map_err(|e| Error::config(e.to_string()))?
      }
    };

    let data_dir = var("FACEGATE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
      info!("FACEGATE_DATA_DIR not set, using {}", DEFAULT_DATA_DIR);
      PathBuf::from(DEFAULT_DATA_DIR)
    });

    let image_url_prefix = var("FACEGATE_IMAGE_URL_PREFIX")
      .map(|p| format!("/{}", p.trim_matches('/')))
      .unwrap_or_else(|| DEFAULT_IMAGE_URL_PREFIX.to_string());

    let admin = match (var("FACEGATE_ADMIN_USER"), var("FACEGATE_ADMIN_PASSWORD")) {
      (Some(user), Some(pass)) => Some(BasicAuth::new(user, pass)),
      _ => {
        info!("Operator credentials not set, /api routes disabled");
        None
      }
    };

    Ok(Self {
      addr,
      data_dir,
      image_url_prefix,
      public_base_url: var("FACEGATE_PUBLIC_BASE_URL"),
      database_url: var("DATABASE_URL"),
      admin,
      materialize_interval: secs(
        var("FACEGATE_MATERIALIZE_INTERVAL_SECS"),
        "FACEGATE_MATERIALIZE_INTERVAL_SECS",
        DEFAULT_MATERIALIZE_INTERVAL,
      )?,
      dispatch_interval: secs(
        var("FACEGATE_DISPATCH_INTERVAL_SECS"),
        "FACEGATE_DISPATCH_INTERVAL_SECS",
        DEFAULT_DISPATCH_INTERVAL,
      )?,
      retry_interval: secs(
        var("FACEGATE_RETRY_INTERVAL_SECS"),
        "FACEGATE_RETRY_INTERVAL_SECS",
        DEFAULT_RETRY_INTERVAL,
      )?,
    })
  }

  pub fn images_dir(&self) -> PathBuf {
    self.data_dir.join("images")
  }

  pub fn uploads_dir(&self) -> PathBuf {
    self.data_dir.join("uploads")
  }

  /// Dispatcher settings derived from this configuration
  pub fn dispatcher_config(&self) -> DispatcherConfig {
    DispatcherConfig {
      interval: self.dispatch_interval,
      image_url_prefix: self.image_url_prefix.clone(),
      public_base_url: self.public_base_url.clone(),
      ..Default::default()
    }
  }

  /// URL under which a processed image is served
  pub fn image_url(&self, file_name: &str) -> String {
    self.dispatcher_config().image_url(file_name)
  }
}

fn secs(value: Option<String>, key: &str, default: Duration) -> Result<Duration> {
  match value {
    Some(v) => match v.trim().parse::<u64>() {
      Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
      _ => Err(Error::config(format!("{key}={v}: expected a positive number of seconds"))),
    },
    None => Ok(default),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn load(vars: &[(&str, &str)]) -> Result<ServerConfig> {
    let map: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    ServerConfig::from_lookup(|key| map.get(key).cloned())
  }

  #[test]
  fn test_defaults() {
    let config = load(&[]).unwrap();
    assert_eq!(config.addr.port(), 3003);
    assert_eq!(config.image_url_prefix, "/facegate/images");
    assert_eq!(config.images_dir(), PathBuf::from("./facegate-data/images"));
    assert!(config.admin.is_none());
    assert!(config.database_url.is_none());
    assert_eq!(config.dispatch_interval, Duration::from_secs(5));
  }

  #[test]
  fn test_overrides() {
    let config = load(&[
      ("FACEGATE_ADDR", "127.0.0.1:9000"),
      ("FACEGATE_DATA_DIR", "/var/lib/facegate"),
      ("FACEGATE_IMAGE_URL_PREFIX", "media/faces/"),
      ("FACEGATE_ADMIN_USER", "ops"),
      ("FACEGATE_ADMIN_PASSWORD", "s3cret"),
      ("FACEGATE_RETRY_INTERVAL_SECS", "60"),
    ])
    .unwrap();
    assert_eq!(config.addr.to_string(), "127.0.0.1:9000");
    assert_eq!(config.uploads_dir(), PathBuf::from("/var/lib/facegate/uploads"));
    assert_eq!(config.image_url_prefix, "/media/faces");
    assert_eq!(config.admin, Some(BasicAuth::new("ops", "s3cret")));
    assert_eq!(config.image_url("a.jpg"), "/media/faces/a.jpg");
    assert_eq!(config.retry_interval, Duration::from_secs(60));
  }

  #[test]
  fn test_invalid_values() {
    assert!(load(&[("FACEGATE_ADDR", "nowhere")]).is_err());
    assert!(load(&[("FACEGATE_DISPATCH_INTERVAL_SECS", "0")]).is_err());
    assert!(load(&[("FACEGATE_DISPATCH_INTERVAL_SECS", "soon")]).is_err());
  }

  #[test]
  fn test_admin_requires_both_values() {
    let config = load(&[("FACEGATE_ADMIN_USER", "ops")]).unwrap();
    assert!(config.admin.is_none());
  }

  #[test]
  fn test_basic_auth_header() {
    let auth = BasicAuth::new("ops", "pa:ss");
    // "ops:pa:ss"
    assert!(auth.verify_header("Basic b3BzOnBhOnNz"));
    assert!(!auth.verify_header("Basic b3BzOndyb25n"));
    assert!(!auth.verify_header("Bearer b3BzOnBhOnNz"));
    assert!(!auth.verify_header("Basic !!!"));
  }
}
