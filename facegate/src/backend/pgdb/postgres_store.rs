//! PostgreSQL 存储实现
//! PostgreSQL store implementation
//!
//! 使用 SeaORM 持久化设备、人员、记录、计划和作业
//! Persists devices, persons, records, schedules and jobs through SeaORM

use crate::backend::pgdb::entity::{
  devices, jobs, persons, records, Devices, Images, Jobs, Persons, Records, ScheduleTargets,
  Schedules,
};
use crate::error::Result;
use crate::model::{Device, Job, Person, Record};
use chrono::Utc;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};

/// PostgreSQL 存储
/// PostgreSQL store
pub struct PostgresStore {
  db: DatabaseConnection,
}

impl PostgresStore {
  /// 从连接字符串创建实例并初始化 schema
  /// Create an instance from a connection string and initialize the schema
  pub async fn new(database_url: &str) -> Result<Self> {
    let opt = ConnectOptions::new(database_url)
      .max_connections(10)
      .to_owned();
    let db = Database::connect(opt).await?;
    let store = Self { db };
    store.init_schema().await?;
    Ok(store)
  }

  /// 从现有数据库连接创建实例
  /// Create an instance from an existing database connection
  pub fn from_connection(db: DatabaseConnection) -> Self {
    Self { db }
  }

  pub fn db(&self) -> &DatabaseConnection {
    &self.db
  }

  /// 初始化数据库 schema，表已存在时忽略
  /// Initialize the database schema; existing tables are left alone
  pub async fn init_schema(&self) -> Result<()> {
    let backend = self.db.get_database_backend();
    let schema = Schema::new(backend);

    let statements = [
      schema.create_table_from_entity(Devices),
      schema.create_table_from_entity(Persons),
      schema.create_table_from_entity(Records),
      schema.create_table_from_entity(Images),
      schema.create_table_from_entity(Schedules),
      schema.create_table_from_entity(ScheduleTargets),
      schema.create_table_from_entity(Jobs),
    ];
    for mut stmt in statements {
      stmt.if_not_exists();
      self.db.execute(backend.build(&stmt)).await?;
    }

    // SeaORM 的 schema 不支持建索引，使用原始 SQL（多条语句需走非预编译路径）
    // SeaORM schema has no index API, use raw SQL (several statements need the unprepared path)
    let index_sql = r#"
      CREATE INDEX IF NOT EXISTS idx_schedules_status ON schedules(status);
      CREATE INDEX IF NOT EXISTS idx_schedule_targets_schedule_id ON schedule_targets(schedule_id);
      CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
      CREATE INDEX IF NOT EXISTS idx_jobs_schedule_device ON jobs(schedule_id, device_id, updated_at);
      CREATE INDEX IF NOT EXISTS idx_jobs_failed_updated_at ON jobs(updated_at) WHERE state = 'failed';
      CREATE INDEX IF NOT EXISTS idx_records_person_phone ON records(person_phone) WHERE person_phone IS NOT NULL;
    "#;
    self.db.execute_unprepared(index_sql).await?;

    tracing::info!("PostgreSQL schema ready");
    Ok(())
  }
}

// === 实体与领域模型的转换 / Entity to domain conversions ===

pub(crate) fn device_from_model(m: devices::Model) -> Device {
  Device {
    device_id: m.device_id,
    product_type: m.prod_type,
    product_name: m.prod_name,
    relay_slot_count: m.relay_slots,
    last_seen_at: m.last_seen_at.with_timezone(&Utc),
    online: m.online,
  }
}

pub(crate) fn person_from_model(m: persons::Model) -> Person {
  let pass_plan_ids = match serde_json::from_value(m.pass_plan_ids) {
    Ok(ids) => ids,
    Err(e) => {
      tracing::warn!(phone = %m.phone, error = %e, "Invalid pass_plan_ids JSON, using empty list");
      Vec::new()
    }
  };
  Person {
    phone: m.phone,
    person_name: m.person_name,
    ic_card_id: m.ic_card_id,
    id_card_no: m.id_card_no,
    pass_plan_ids,
    local_image_path: m.local_image_path,
    image_checksum: m.image_checksum,
    member_level: m.member_level,
    member_expiry: m.member_expiry.map(|t| t.with_timezone(&Utc)),
    is_ape_lord: m.is_ape_lord,
  }
}

pub(crate) fn record_from_model(m: records::Model) -> Record {
  Record {
    device_id: m.device_id,
    record_id: m.record_id,
    person_phone: m.person_phone,
    record_time: m.record_time,
    record_type: m.record_type,
    record_pass: m.record_pass,
    similarity: m.similarity,
    temperature: m.temperature,
    qrcode: m.qrcode,
    health_code_color: m.health_code_color,
    raw: m.raw,
  }
}

pub(crate) fn job_from_model(m: jobs::Model) -> Job {
  Job {
    id: m.id,
    schedule_id: m.schedule_id,
    device_id: m.device_id,
    state: m.state.into(),
    retry_count: m.retry_count,
    last_error: m.last_error,
    created_at: m.created_at.with_timezone(&Utc),
    updated_at: m.updated_at.with_timezone(&Utc),
  }
}
