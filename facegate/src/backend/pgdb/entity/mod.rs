//! SeaORM 实体模块
//! SeaORM entity module
//!
//! 定义了与 PostgreSQL 表对应的实体模型
//! Defines entity models corresponding to PostgreSQL tables

pub mod devices;
pub mod images;
pub mod jobs;
pub mod persons;
pub mod prelude;
pub mod records;
pub mod schedule_targets;
pub mod schedules;

pub use prelude::*;
