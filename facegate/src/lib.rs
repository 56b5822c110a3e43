//! # Facegate
//!
//! 门禁人脸设备网关
//! Access-control face device fleet gateway
//!
//! 设备通过 WebSocket 主动连接网关，使用 JSON 请求/响应协议上报心跳和通行记录、
//! 拉取人员名单；网关反向推送开门、继电器、显示图片和人员变更指令。
//! Devices dial in over WebSocket and speak a JSON request/response protocol to
//! report heartbeats and access records and to pull the person roster; the gateway
//! pushes door-open, relay, display-image and person-change commands back.
//!
//! ## 特性
//! ## Features
//!
//! - 设备 RPC 协议的解析与分发
//!   - Parsing and dispatch of the device RPC protocol
//! - 每台设备一个活动连接的注册表，断开时按连接所有权下线
//!   - A registry of one live connection per device, with ownership-checked offline marking
//! - 通行记录按 (设备, 记录号) 幂等入库
//!   - Idempotent access-record ingestion keyed by (device, record id)
//! - 计划物化：一次性与 cron 计划生成作业，cron 计划按分钟去重
//!   - Schedule materialization: one-shot and cron schedules produce jobs, cron deduplicated per minute
//! - 作业派发与有限次数的失败重试
//!   - Job dispatch with bounded retry of failures
//! - 人员照片规范化为 JPEG 并计算校验和
//!   - Person photo normalization to JPEG with checksum
//! - 内存存储与 PostgreSQL 存储（`postgres` feature）
//!   - Memory store and PostgreSQL store (`postgres` feature)
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use facegate::gateway::Gateway;
//! use facegate::memdb::MemoryStore;
//! use facegate::registry::ConnectionRegistry;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Gateway::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(ConnectionRegistry::new()),
//!     );
//!
//!     // 每个设备连接一个会话
//!     // One session per device connection
//!     let (tx, _rx) = mpsc::channel(256);
//!     let mut session = gateway.open_session(tx);
//!
//!     let resp = gateway
//!         .handle_frame(&mut session, r#"{"method":"registerDevice","params":{"DeviceId":"D1"},"req_id":1}"#)
//!         .await;
//!     assert!(resp.is_success());
//!
//!     gateway.close_session(&session).await;
//! }
//! ```

pub mod backend;
pub mod base;
pub mod components;
pub mod cron;
pub mod error;
pub mod gateway;
pub mod memdb;
pub mod model;
pub mod photo;
pub mod protocol;
pub mod registry;

pub use error::{Error, Result};
pub use gateway::Gateway;
