//! HTTP handlers for the operator routes
//!
//! All routes here sit behind HTTP Basic authentication and are only mounted when
//! operator credentials are configured.

use crate::server::AppState;
use axum::{
  body::Bytes,
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use facegate::error::Error as GatewayError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Largest accepted person image upload
pub const MAX_IMAGE_UPLOAD: usize = 5 * 1024 * 1024;

/// Body of `POST /api/devices/{id}/open`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDoorRequest {
  #[serde(default)]
  pub dev_idx: i32,
}

/// Body of `POST /api/devices/{id}/relay`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
  #[serde(default)]
  pub relay_idx: i32,
  #[serde(default = "default_relay_delay")]
  pub delay: u32,
}

impl Default for RelayRequest {
  fn default() -> Self {
    Self {
      relay_idx: 0,
      delay: default_relay_delay(),
    }
  }
}

fn default_relay_delay() -> u32 {
  5
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
  (status, Json(json!({ "error": message.into() }))).into_response()
}

/// An empty body means "all defaults"
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Response> {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(T::default());
  }
  serde_json::from_slice(body)
    .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Invalid body: {e}")))
}

/// `POST /api/devices/{id}/open`
pub async fn open_door(
  State(state): State<Arc<AppState>>,
  Path(device_id): Path<String>,
  body: Bytes,
) -> Response {
  let req: OpenDoorRequest = match parse_body(&body) {
    Ok(req) => req,
    Err(resp) => return resp,
  };
  match state.gateway.push_remote_open_door(&device_id, req.dev_idx).await {
    Ok(()) => {
      info!(device_id = %device_id, dev_idx = req.dev_idx, "Remote door open requested");
      Json(json!({ "ok": true })).into_response()
    }
    Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
  }
}

/// `POST /api/devices/{id}/relay`
pub async fn relay_out(
  State(state): State<Arc<AppState>>,
  Path(device_id): Path<String>,
  body: Bytes,
) -> Response {
  let req: RelayRequest = match parse_body(&body) {
    Ok(req) => req,
    Err(resp) => return resp,
  };
  match state
    .gateway
    .push_relay_out(&device_id, req.relay_idx, req.delay)
    .await
  {
    Ok(()) => {
      info!(
        device_id = %device_id,
        relay_idx = req.relay_idx,
        delay = req.delay,
        "Relay output requested"
      );
      Json(json!({ "ok": true })).into_response()
    }
    Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
  }
}

/// `POST /api/persons/{phone}/image`
///
/// Stores the normalized photo, then tells every connected device about the change.
pub async fn upload_person_image(
  State(state): State<Arc<AppState>>,
  Path(phone): Path<String>,
  body: Bytes,
) -> Response {
  if body.is_empty() {
    return error_response(StatusCode::BAD_REQUEST, "Empty image body");
  }

  let saved = match state.images.save_person_image(&phone, body.to_vec()).await {
    Ok(saved) => saved,
    Err(e @ (GatewayError::InvalidParams(_) | GatewayError::Image(_))) => {
      warn!(phone = %phone, error = %e, "Rejected person image");
      return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    Err(e) => {
      error!(phone = %phone, error = %e, "Failed to save person image");
      return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save image");
    }
  };

  match state.gateway.broadcast_person_update(&phone).await {
    Ok(devices) => info!(phone = %phone, devices, "Person image change pushed"),
    Err(e) => warn!(phone = %phone, error = %e, "Failed to push person image change"),
  }

  Json(json!({
    "success": true,
    "imageUrl": state.config.image_url(&saved.filename),
    "filename": saved.filename,
    "size": saved.size,
    "checksum": saved.checksum,
  }))
  .into_response()
}

/// `GET /api/persons/{phone}/image`
pub async fn person_image(
  State(state): State<Arc<AppState>>,
  Path(phone): Path<String>,
) -> Response {
  let persons = match state.gateway.store().find_persons(&[phone.clone()]).await {
    Ok(persons) => persons,
    Err(e) => {
      error!(phone = %phone, error = %e, "Failed to load person");
      return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load person");
    }
  };

  let file_name = persons
    .first()
    .and_then(|p| p.local_image_path.as_deref())
    .and_then(|path| std::path::Path::new(path).file_name())
    .map(|name| name.to_string_lossy().into_owned());

  match file_name {
    Some(name) => Json(json!({ "imageUrl": state.config.image_url(&name) })).into_response(),
    None => error_response(StatusCode::NOT_FOUND, "Image not found"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_defaults() {
    let open: OpenDoorRequest = parse_body(&Bytes::new()).unwrap();
    assert_eq!(open.dev_idx, 0);

    let relay: RelayRequest = parse_body(&Bytes::from_static(b"  ")).unwrap();
    assert_eq!((relay.relay_idx, relay.delay), (0, 5));

    let relay: RelayRequest = parse_body(&Bytes::from_static(br#"{"relayIdx":2}"#)).unwrap();
    assert_eq!((relay.relay_idx, relay.delay), (2, 5));
  }

  #[test]
  fn test_invalid_body_is_rejected() {
    let resp = parse_body::<RelayRequest>(&Bytes::from_static(b"{oops")).unwrap_err();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }
}
