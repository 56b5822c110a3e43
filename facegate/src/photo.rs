//! 人脸照片处理
//! Face photo processing
//!
//! 解码、等比缩放到 640x640 以内（不放大）、JPEG 重新编码并计算校验值，
//! 然后写入文件存储并记录到人员上
//! Decode, scale down to fit inside 640x640 (never enlarging), re-encode as JPEG and
//! checksum, then write to the file store and record it on the person

use crate::base::Store;
use crate::error::{Error, Result};
use crate::model::Person;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 照片处理配置
/// Photo processing configuration
#[derive(Debug, Clone)]
pub struct ImageProcessorConfig {
  /// 处理后照片的存放目录
  /// Directory for processed photos
  pub images_dir: PathBuf,
  /// 长边上限
  /// Upper bound for either side
  pub max_dimension: u32,
  pub jpeg_quality: u8,
}

impl ImageProcessorConfig {
  pub fn new<P: Into<PathBuf>>(images_dir: P) -> Self {
    Self {
      images_dir: images_dir.into(),
      max_dimension: 640,
      jpeg_quality: 80,
    }
  }
}

/// 保存结果
/// Outcome of saving a photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
  pub local_path: PathBuf,
  pub filename: String,
  /// SHA-256 十六进制摘要
  /// SHA-256 hex digest
  pub checksum: String,
  pub size: usize,
}

/// 人脸照片处理器
/// Face photo processor
pub struct ImageProcessor {
  store: Arc<dyn Store>,
  config: ImageProcessorConfig,
}

impl ImageProcessor {
  pub fn new(store: Arc<dyn Store>, config: ImageProcessorConfig) -> Self {
    Self { store, config }
  }

  pub fn images_dir(&self) -> &Path {
    &self.config.images_dir
  }

  /// 处理并保存某人的照片，人员不存在时创建一个只有手机号的人员
  /// Process and save a person's photo; creates a phone-only person if none exists
  pub async fn save_person_image(&self, phone: &str, bytes: Vec<u8>) -> Result<SavedImage> {
    if phone.is_empty() || phone.contains(['/', '\\']) || phone.contains("..") {
      return Err(Error::invalid_params(format!("Invalid phone: {phone:?}")));
    }

    let max = self.config.max_dimension;
    let quality = self.config.jpeg_quality;
    let jpeg = tokio::task::spawn_blocking(move || normalize(&bytes, max, quality))
      .await
      .map_err(|e| Error::other(format!("Image task failed: {e}")))??;

    let filename = format!("{}_{}.jpg", phone, Utc::now().timestamp_millis());
    let local_path = self.config.images_dir.join(&filename);
    tokio::fs::create_dir_all(&self.config.images_dir).await?;
    tokio::fs::write(&local_path, &jpeg).await?;

    let checksum = checksum(&jpeg);
    let path_str = local_path.to_string_lossy().into_owned();
    if !self
      .store
      .update_person_image(phone, &path_str, &checksum)
      .await?
    {
      let mut person = Person::new(phone, phone);
      person.local_image_path = Some(path_str);
      person.image_checksum = Some(checksum.clone());
      self.store.upsert_person(&person).await?;
    }

    tracing::info!(phone = %phone, file = %filename, size = jpeg.len(), "Person image saved");
    Ok(SavedImage {
      local_path,
      filename,
      checksum,
      size: jpeg.len(),
    })
  }
}

/// 解码任意支持的格式，缩放到 `max`x`max` 以内后编码为 JPEG
/// Decode any supported format, fit inside `max`x`max` and encode as JPEG
pub fn normalize(bytes: &[u8], max: u32, quality: u8) -> Result<Vec<u8>> {
  let mut img = image::load_from_memory(bytes)?;
  if img.width() > max || img.height() > max {
    img = img.resize(max, max, FilterType::Lanczos3);
  }
  let rgb = img.to_rgb8();

  let mut out = Vec::new();
  JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
  Ok(out)
}

/// SHA-256 十六进制摘要
/// SHA-256 hex digest
pub fn checksum(bytes: &[u8]) -> String {
  format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdb::MemoryStore;
  use image::{ImageFormat, RgbaImage};
  use std::io::Cursor;

  fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 128]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
  }

  #[test]
  fn test_normalize_shrinks_keeping_aspect() {
    let jpeg = normalize(&png(1280, 640), 640, 80).unwrap();
    let out = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((out.width(), out.height()), (640, 320));
  }

  #[test]
  fn test_normalize_never_enlarges() {
    let jpeg = normalize(&png(100, 50), 640, 80).unwrap();
    let out = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((out.width(), out.height()), (100, 50));
  }

  #[test]
  fn test_normalize_rejects_garbage() {
    assert!(matches!(
      normalize(b"definitely not an image", 640, 80),
      Err(Error::Image(_))
    ));
  }

  #[test]
  fn test_checksum_hex() {
    assert_eq!(
      checksum(b"abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[tokio::test]
  async fn test_save_creates_person() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let processor = ImageProcessor::new(
      Arc::new(store.clone()),
      ImageProcessorConfig::new(dir.path().join("images")),
    );

    let saved = processor
      .save_person_image("13900000001", png(800, 800))
      .await
      .unwrap();
    assert!(saved.filename.starts_with("13900000001_"));
    assert!(saved.local_path.exists());
    assert_eq!(saved.checksum.len(), 64);

    let person = store
      .find_persons(&["13900000001".to_string()])
      .await
      .unwrap()
      .pop()
      .unwrap();
    assert_eq!(
      person.local_image_path.as_deref(),
      Some(saved.local_path.to_string_lossy().as_ref())
    );
    assert_eq!(person.image_checksum, Some(saved.checksum));
  }

  #[tokio::test]
  async fn test_save_rejects_path_like_phone() {
    let dir = tempfile::tempdir().unwrap();
    let processor = ImageProcessor::new(
      Arc::new(MemoryStore::new()),
      ImageProcessorConfig::new(dir.path()),
    );
    let err = processor
      .save_person_image("../etc", png(10, 10))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)));
  }
}
