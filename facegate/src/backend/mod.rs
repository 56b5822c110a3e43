//! 后端模块
//! Backend module
//!
//! 持久化存储的实现。内存存储始终可用（见 [`crate::memdb`]），
//! PostgreSQL 存储需要 `postgres` feature
//! Persistent store implementations. The memory store is always available
//! (see [`crate::memdb`]); the PostgreSQL store requires the `postgres` feature

// PostgreSQL 后端 - 需要 postgres feature
// PostgreSQL backend - requires postgres feature
#[cfg(feature = "postgres")]
pub mod pgdb;

#[cfg(feature = "postgres")]
pub use pgdb::PostgresStore;

pub use crate::memdb::MemoryStore;
