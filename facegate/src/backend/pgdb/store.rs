//! PostgreSQL Store trait 实现
//! PostgreSQL Store trait implementation

use crate::backend::pgdb::entity::jobs::JobStatus;
use crate::backend::pgdb::entity::schedules::ScheduleState;
use crate::backend::pgdb::entity::{
  devices, images, jobs, persons, records, schedule_targets, schedules, Devices, Images, Jobs,
  Persons, Records, ScheduleTargets, Schedules,
};
use crate::backend::pgdb::postgres_store::{
  device_from_model, job_from_model, person_from_model, record_from_model,
};
use crate::backend::pgdb::PostgresStore;
use crate::base::Store;
use crate::error::Result;
use crate::model::{
  Device, DeviceRegistration, Job, PendingJob, Person, Record, Schedule,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
  ActiveModelTrait, ColumnTrait, EntityTrait, NotSet, PaginatorTrait, QueryFilter, QueryOrder,
  QuerySelect, Set,
};
use std::collections::HashMap;

fn tz(t: DateTime<Utc>) -> DateTime<FixedOffset> {
  t.into()
}

impl PostgresStore {
  /// 加载计划的目标设备和图片文件名并组装为领域模型
  /// Load targets and image file names for schedule rows and assemble domain schedules
  async fn assemble_schedules(&self, rows: Vec<schedules::Model>) -> Result<Vec<Schedule>> {
    if rows.is_empty() {
      return Ok(Vec::new());
    }
    let ids: Vec<i64> = rows.iter().map(|s| s.id).collect();
    let image_ids: Vec<i64> = rows.iter().filter_map(|s| s.image_id).collect();

    let mut targets: HashMap<i64, Vec<String>> = HashMap::new();
    for t in ScheduleTargets::find()
      .filter(schedule_targets::Column::ScheduleId.is_in(ids))
      .order_by_asc(schedule_targets::Column::Id)
      .all(self.db())
      .await?
    {
      targets.entry(t.schedule_id).or_default().push(t.device_id);
    }

    let files: HashMap<i64, String> = if image_ids.is_empty() {
      HashMap::new()
    } else {
      Images::find()
        .filter(images::Column::Id.is_in(image_ids))
        .all(self.db())
        .await?
        .into_iter()
        .map(|img| (img.id, img.file_name))
        .collect()
    };

    Ok(
      rows
        .into_iter()
        .map(|s| Schedule {
          id: s.id,
          cron: s.cron,
          start_at: s.start_at.with_timezone(&Utc),
          end_at: s.end_at.map(|t| t.with_timezone(&Utc)),
          payload_type: s.payload_type.into(),
          status: s.status.into(),
          image_file: s.image_id.and_then(|id| files.get(&id).cloned()),
          targets: targets.remove(&s.id).unwrap_or_default(),
        })
        .collect(),
    )
  }
}

#[async_trait]
impl Store for PostgresStore {
  async fn upsert_device(&self, reg: &DeviceRegistration, now: DateTime<Utc>) -> Result<()> {
    let model = devices::ActiveModel {
      device_id: Set(reg.device_id.clone()),
      prod_type: Set(reg.product_type.clone()),
      prod_name: Set(reg.product_name.clone()),
      relay_slots: Set(reg.relay_slot_count),
      last_seen_at: Set(tz(now)),
      online: Set(true),
    };
    Devices::insert(model)
      .on_conflict(
        OnConflict::column(devices::Column::DeviceId)
          .update_columns([
            devices::Column::ProdType,
            devices::Column::ProdName,
            devices::Column::RelaySlots,
            devices::Column::LastSeenAt,
            devices::Column::Online,
          ])
          .to_owned(),
      )
      .exec_without_returning(self.db())
      .await?;
    Ok(())
  }

  async fn touch_device(&self, device_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = Devices::update_many()
      .col_expr(
        devices::Column::LastSeenAt,
        Expr::cust_with_values("GREATEST(last_seen_at, $1)", [tz(now)]),
      )
      .col_expr(devices::Column::Online, Expr::value(true))
      .filter(devices::Column::DeviceId.eq(device_id))
      .exec(self.db())
      .await?;
    Ok(result.rows_affected > 0)
  }

  async fn set_device_online(&self, device_id: &str, online: bool) -> Result<()> {
    Devices::update_many()
      .col_expr(devices::Column::Online, Expr::value(online))
      .filter(devices::Column::DeviceId.eq(device_id))
      .exec(self.db())
      .await?;
    Ok(())
  }

  async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
    Ok(
      Devices::find_by_id(device_id.to_string())
        .one(self.db())
        .await?
        .map(device_from_model),
    )
  }

  async fn count_persons(&self) -> Result<u64> {
    Ok(Persons::find().count(self.db()).await?)
  }

  async fn list_persons(&self, offset: u64, limit: u64) -> Result<Vec<Person>> {
    let rows = Persons::find()
      .order_by_asc(persons::Column::Phone)
      .offset(offset)
      .limit(limit)
      .all(self.db())
      .await?;
    Ok(rows.into_iter().map(person_from_model).collect())
  }

  async fn find_persons(&self, phones: &[String]) -> Result<Vec<Person>> {
    if phones.is_empty() {
      return Ok(Vec::new());
    }
    let rows = Persons::find()
      .filter(persons::Column::Phone.is_in(phones.iter().cloned()))
      .order_by_asc(persons::Column::Phone)
      .all(self.db())
      .await?;
    Ok(rows.into_iter().map(person_from_model).collect())
  }

  async fn upsert_person(&self, person: &Person) -> Result<()> {
    let model = persons::ActiveModel {
      phone: Set(person.phone.clone()),
      person_name: Set(person.person_name.clone()),
      ic_card_id: Set(person.ic_card_id.clone()),
      id_card_no: Set(person.id_card_no.clone()),
      pass_plan_ids: Set(serde_json::to_value(&person.pass_plan_ids)?),
      local_image_path: Set(person.local_image_path.clone()),
      image_checksum: Set(person.image_checksum.clone()),
      member_level: Set(person.member_level.clone()),
      member_expiry: Set(person.member_expiry.map(tz)),
      is_ape_lord: Set(person.is_ape_lord),
    };
    Persons::insert(model)
      .on_conflict(
        OnConflict::column(persons::Column::Phone)
          .update_columns([
            persons::Column::PersonName,
            persons::Column::IcCardId,
            persons::Column::IdCardNo,
            persons::Column::PassPlanIds,
            persons::Column::LocalImagePath,
            persons::Column::ImageChecksum,
            persons::Column::MemberLevel,
            persons::Column::MemberExpiry,
            persons::Column::IsApeLord,
          ])
          .to_owned(),
      )
      .exec_without_returning(self.db())
      .await?;
    Ok(())
  }

  async fn update_person_image(
    &self,
    phone: &str,
    local_path: &str,
    checksum: &str,
  ) -> Result<bool> {
    let result = Persons::update_many()
      .col_expr(persons::Column::LocalImagePath, Expr::value(local_path))
      .col_expr(persons::Column::ImageChecksum, Expr::value(checksum))
      .filter(persons::Column::Phone.eq(phone))
      .exec(self.db())
      .await?;
    Ok(result.rows_affected > 0)
  }

  async fn insert_record(&self, record: &Record) -> Result<bool> {
    let model = records::ActiveModel {
      device_id: Set(record.device_id.clone()),
      record_id: Set(record.record_id),
      person_phone: Set(record.person_phone.clone()),
      record_time: Set(record.record_time),
      record_type: Set(record.record_type),
      record_pass: Set(record.record_pass),
      similarity: Set(record.similarity),
      temperature: Set(record.temperature),
      qrcode: Set(record.qrcode.clone()),
      health_code_color: Set(record.health_code_color.clone()),
      raw: Set(record.raw.clone()),
      created_at: Set(tz(Utc::now())),
    };
    // 已存在的 (device_id, record_id) 保持原样
    // An existing (device_id, record_id) is left untouched
    let inserted = Records::insert(model)
      .on_conflict(
        OnConflict::columns([records::Column::DeviceId, records::Column::RecordId])
          .do_nothing()
          .to_owned(),
      )
      .exec_without_returning(self.db())
      .await?;
    Ok(inserted > 0)
  }

  async fn get_record(&self, device_id: &str, record_id: i64) -> Result<Option<Record>> {
    Ok(
      Records::find_by_id((device_id.to_string(), record_id))
        .one(self.db())
        .await?
        .map(record_from_model),
    )
  }

  async fn list_active_schedules(&self, limit: u64) -> Result<Vec<Schedule>> {
    let rows = Schedules::find()
      .filter(schedules::Column::Status.is_in([ScheduleState::Draft, ScheduleState::Active]))
      .order_by_desc(schedules::Column::Id)
      .limit(limit)
      .all(self.db())
      .await?;
    self.assemble_schedules(rows).await
  }

  async fn job_exists(&self, schedule_id: i64, device_id: &str) -> Result<bool> {
    let count = Jobs::find()
      .filter(jobs::Column::ScheduleId.eq(schedule_id))
      .filter(jobs::Column::DeviceId.eq(device_id))
      .count(self.db())
      .await?;
    Ok(count > 0)
  }

  async fn job_updated_since(
    &self,
    schedule_id: i64,
    device_id: &str,
    since: DateTime<Utc>,
  ) -> Result<bool> {
    let count = Jobs::find()
      .filter(jobs::Column::ScheduleId.eq(schedule_id))
      .filter(jobs::Column::DeviceId.eq(device_id))
      .filter(jobs::Column::UpdatedAt.gte(tz(since)))
      .count(self.db())
      .await?;
    Ok(count > 0)
  }

  async fn create_job(
    &self,
    schedule_id: i64,
    device_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Job> {
    let model = jobs::ActiveModel {
      id: NotSet,
      schedule_id: Set(schedule_id),
      device_id: Set(device_id.to_string()),
      state: Set(JobStatus::Pending),
      retry_count: Set(0),
      last_error: Set(None),
      created_at: Set(tz(now)),
      updated_at: Set(tz(now)),
    };
    Ok(job_from_model(model.insert(self.db()).await?))
  }

  async fn list_pending_jobs(&self, limit: u64) -> Result<Vec<PendingJob>> {
    let rows = Jobs::find()
      .filter(jobs::Column::State.eq(JobStatus::Pending))
      .order_by_asc(jobs::Column::Id)
      .limit(limit)
      .all(self.db())
      .await?;
    if rows.is_empty() {
      return Ok(Vec::new());
    }

    let schedule_ids: Vec<i64> = rows.iter().map(|j| j.schedule_id).collect();
    let schedule_rows = Schedules::find()
      .filter(schedules::Column::Id.is_in(schedule_ids))
      .all(self.db())
      .await?;
    let by_id: HashMap<i64, Schedule> = self
      .assemble_schedules(schedule_rows)
      .await?
      .into_iter()
      .map(|s| (s.id, s))
      .collect();

    Ok(
      rows
        .into_iter()
        .filter_map(|j| {
          let schedule = by_id.get(&j.schedule_id)?;
          Some(PendingJob {
            payload_type: schedule.payload_type,
            image_file: schedule.image_file.clone(),
            job: job_from_model(j),
          })
        })
        .collect(),
    )
  }

  async fn mark_job_sent(&self, job_id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = Jobs::update_many()
      .col_expr(jobs::Column::State, Expr::value(JobStatus::Sent))
      .col_expr(jobs::Column::UpdatedAt, Expr::value(tz(now)))
      .filter(jobs::Column::Id.eq(job_id))
      .filter(jobs::Column::State.eq(JobStatus::Pending))
      .exec(self.db())
      .await?;
    Ok(result.rows_affected > 0)
  }

  async fn mark_job_failed(&self, job_id: i64, error: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = Jobs::update_many()
      .col_expr(jobs::Column::State, Expr::value(JobStatus::Failed))
      .col_expr(
        jobs::Column::RetryCount,
        Expr::col(jobs::Column::RetryCount).add(1),
      )
      .col_expr(jobs::Column::LastError, Expr::value(error))
      .col_expr(jobs::Column::UpdatedAt, Expr::value(tz(now)))
      .filter(jobs::Column::Id.eq(job_id))
      .filter(jobs::Column::State.eq(JobStatus::Pending))
      .exec(self.db())
      .await?;
    Ok(result.rows_affected > 0)
  }

  async fn list_retryable_jobs(
    &self,
    before: DateTime<Utc>,
    max_retry: i32,
    limit: u64,
  ) -> Result<Vec<Job>> {
    let rows = Jobs::find()
      .filter(jobs::Column::State.eq(JobStatus::Failed))
      .filter(jobs::Column::UpdatedAt.lt(tz(before)))
      .filter(jobs::Column::RetryCount.lt(max_retry))
      .order_by_asc(jobs::Column::Id)
      .limit(limit)
      .all(self.db())
      .await?;
    Ok(rows.into_iter().map(job_from_model).collect())
  }

  async fn requeue_job(&self, job_id: i64, max_retry: i32, now: DateTime<Utc>) -> Result<bool> {
    let result = Jobs::update_many()
      .col_expr(jobs::Column::State, Expr::value(JobStatus::Pending))
      .col_expr(jobs::Column::UpdatedAt, Expr::value(tz(now)))
      .filter(jobs::Column::Id.eq(job_id))
      .filter(jobs::Column::State.eq(JobStatus::Failed))
      .filter(jobs::Column::RetryCount.lt(max_retry))
      .exec(self.db())
      .await?;
    Ok(result.rows_affected > 0)
  }

  async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
    Ok(
      Jobs::find_by_id(job_id)
        .one(self.db())
        .await?
        .map(job_from_model),
    )
  }
}
