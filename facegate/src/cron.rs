//! 计划时间判定
//! Schedule timing
//!
//! 五段 cron 表达式（分 时 日 月 周）只支持 `*`、`*/N`、逗号列表和具体数字，
//! 各段之间是 AND 关系
//! Five-field cron expressions (minute hour day-of-month month day-of-week) support only
//! `*`, `*/N`, comma lists and exact numbers, with AND semantics across fields

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/// 各字段的取值范围：分、时、日、月、周
/// Value ranges of the fields: minute, hour, day-of-month, month, day-of-week
const FIELD_RANGES: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];

/// 判断单个 cron 字段是否匹配给定值
/// Test a single cron field against a value
///
/// ```
/// use facegate::cron::match_cron_field;
///
/// assert!(match_cron_field("*/15", 30, 0, 59));
/// assert!(!match_cron_field("*/15", 31, 0, 59));
/// assert!(match_cron_field("5,10,15", 10, 0, 59));
/// assert!(!match_cron_field("7", 8, 0, 23));
/// ```
pub fn match_cron_field(part: &str, val: u32, min: u32, max: u32) -> bool {
  let part = part.trim();
  if part == "*" {
    return true;
  }
  if let Some(step) = part.strip_prefix("*/") {
    return match step.parse::<u32>() {
      Ok(step) if step > 0 => val.saturating_sub(min) % step == 0,
      _ => false,
    };
  }
  if part.contains(',') {
    return part
      .split(',')
      .any(|p| match_cron_field(p, val, min, max));
  }
  part.parse::<u32>().map(|n| n == val).unwrap_or(false)
}

fn is_valid_field(part: &str, min: u32, max: u32) -> bool {
  let part = part.trim();
  if part == "*" {
    return true;
  }
  if let Some(step) = part.strip_prefix("*/") {
    return matches!(step.parse::<u32>(), Ok(step) if step > 0);
  }
  if part.contains(',') {
    return part.split(',').all(|p| is_valid_field(p, min, max));
  }
  matches!(part.parse::<u32>(), Ok(n) if (min..=max).contains(&n))
}

/// 判断 cron 表达式在给定时刻是否到期
/// Whether a cron expression is due at the given instant
///
/// 少于五段或任一字段无法解析时视为到期
/// Fewer than five fields, or any unparseable field, counts as due
pub fn is_cron_due<Tz: TimeZone>(expr: &str, at: &DateTime<Tz>) -> bool {
  let parts: Vec<&str> = expr.split_whitespace().collect();
  if parts.len() < 5 {
    return true;
  }

  let values = [
    at.minute(),
    at.hour(),
    at.day(),
    at.month(),
    at.weekday().num_days_from_sunday(),
  ];

  for (part, (min, max)) in parts.iter().zip(FIELD_RANGES) {
    if !is_valid_field(part, min, max) {
      tracing::warn!(cron = %expr, field = %part, "Unparseable cron field, treating schedule as due");
      return true;
    }
  }

  parts
    .iter()
    .zip(values)
    .zip(FIELD_RANGES)
    .all(|((part, val), (min, max))| match_cron_field(part, val, min, max))
}

/// 判断当前时刻是否处于 [start_at, end_at] 窗口内，end_at 缺省表示无上限
/// Whether `now` is inside [start_at, end_at]; no end_at means unbounded
pub fn is_within_window(
  start_at: DateTime<Utc>,
  end_at: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
) -> bool {
  now >= start_at && end_at.map_or(true, |end| now <= end)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
  }

  #[test]
  fn test_match_cron_field() {
    assert!(match_cron_field("*/15", 30, 0, 59));
    assert!(!match_cron_field("*/15", 31, 0, 59));
    assert!(match_cron_field("5,10,15", 10, 0, 59));
    assert!(!match_cron_field("7", 8, 0, 23));
    assert!(match_cron_field("*", 13, 0, 23));
    // 步长从字段最小值开始计算
    // Steps count from the field minimum
    assert!(match_cron_field("*/2", 3, 1, 31));
    assert!(!match_cron_field("*/0", 0, 0, 59));
    assert!(!match_cron_field("abc", 1, 0, 59));
  }

  #[test]
  fn test_cron_due_all_fields() {
    // 2024-01-01 是星期一
    // 2024-01-01 is a Monday
    let t = at(2024, 1, 1, 8, 30);
    assert!(is_cron_due("30 8 * * *", &t));
    assert!(is_cron_due("*/15 8 1 1 1", &t));
    assert!(!is_cron_due("30 9 * * *", &t));
    assert!(!is_cron_due("30 8 * * 0", &t));
    assert!(!is_cron_due("31 8 * * *", &t));
  }

  #[test]
  fn test_cron_fail_open() {
    let t = at(2024, 1, 1, 8, 30);
    assert!(is_cron_due("", &t));
    assert!(is_cron_due("30 8 *", &t));
    assert!(is_cron_due("x 9 * * *", &t));
    assert!(is_cron_due("75 9 * * *", &t));
  }

  #[test]
  fn test_within_window() {
    let now = Utc::now();
    assert!(is_within_window(now - Duration::hours(1), None, now));
    assert!(is_within_window(
      now - Duration::hours(1),
      Some(now + Duration::hours(1)),
      now
    ));
    assert!(is_within_window(now, Some(now), now));
    assert!(!is_within_window(now + Duration::seconds(1), None, now));
    assert!(!is_within_window(
      now - Duration::hours(2),
      Some(now - Duration::hours(1)),
      now
    ));
  }
}
