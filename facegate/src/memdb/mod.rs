//! 内存存储模块
//! Memory store module
//!
//! 基于内存的存储实现，不依赖任何外部服务；默认后端，也用于测试
//! In-memory store implementation without any external service dependencies;
//! the default backend and the one used by tests

mod store;
pub mod memory_store;

pub use memory_store::MemoryStore;
