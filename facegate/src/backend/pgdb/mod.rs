//! PostgreSQL 存储模块
//! PostgreSQL store module

pub mod entity;
pub mod postgres_store;
mod store;

pub use entity::*;
pub use postgres_store::PostgresStore;
