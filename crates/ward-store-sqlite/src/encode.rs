//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that lexical order equals chronological order and `BETWEEN`
//! works on them. Enums are stored as their snake_case discriminants; JSON
//! blobs as compact text.
//!
//! Row decoders report bad column contents as
//! [`rusqlite::Error::FromSqlConversionFailure`], so they can be used
//! directly as `query_map` callbacks.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use rusqlite::{Row, types::Type, types::Value};
use ward_core::{
  appearance::{Appearance, AppearanceValue},
  audit::Audit,
  filter::FilterValue,
  link::Link,
  permission::{Permission, PermissionKind, Role},
  record::Record,
  target::{TargetRef, TargetType},
};

// ─── Column lists ────────────────────────────────────────────────────────────
//
// Each decoder below expects exactly these columns, in this order.

pub const OBJECT_COLUMNS: &str = "o.id, o.target_type, o.owner, o.created, o.modified, \
   o.when_date, o.parent_type, o.parent_id, o.data";

pub const LINK_COLUMNS: &str =
  "l.link_id, l.v0_type, l.v0_id, l.v1_type, l.v1_id, l.weight, l.context, l.created";

pub const PERMISSION_COLUMNS: &str =
  "p.permission_id, p.role_id, p.target_type, p.target_id, p.permission";

pub const APPEARANCE_COLUMNS: &str = "a.appearance_id, a.when_date, a.target_type, \
   a.target_id, a.value_type, a.value_id, a.value_str";

pub const AUDIT_COLUMNS: &str = "au.audit_id, au.when_date, au.username, au.what, \
   au.thing_type, au.thing_id, au.src_ip, au.user_agent, au.audit_data_ver, au.audit_data";

pub const ROLE_COLUMNS: &str = "r.role_id, r.name, r.description";

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// The current time at the precision timestamps are stored with, so values
/// returned from a write compare equal to the same row read back.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ─── Filter values ───────────────────────────────────────────────────────────

/// Bind form of a compiled filter literal. Booleans become 0/1, matching what
/// `json_extract` yields for JSON `true`/`false`.
pub fn filter_value(v: &FilterValue) -> Value {
  match v {
    FilterValue::Int(i) => Value::Integer(*i),
    FilterValue::Float(f) => Value::Real(*f),
    FilterValue::Text(s) => Value::Text(s.clone()),
    FilterValue::Bool(b) => Value::Integer(i64::from(*b)),
    FilterValue::DateTime(dt) => Value::Text(encode_dt(*dt)),
  }
}

// ─── Column decoders ─────────────────────────────────────────────────────────

fn conversion_failure(
  idx: usize,
  err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
  rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub fn dt_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let raw: String = row.get(idx)?;
  DateTime::parse_from_rfc3339(&raw)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| conversion_failure(idx, e))
}

pub fn target_type_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<TargetType> {
  let raw: String = row.get(idx)?;
  TargetType::parse(&raw).map_err(|e| conversion_failure(idx, e))
}

pub fn target_at(row: &Row<'_>, type_idx: usize) -> rusqlite::Result<TargetRef> {
  Ok(TargetRef::new(target_type_at(row, type_idx)?, row.get(type_idx + 1)?))
}

pub fn permission_kind_at(
  row: &Row<'_>,
  idx: usize,
) -> rusqlite::Result<PermissionKind> {
  let raw: String = row.get(idx)?;
  PermissionKind::parse(&raw).map_err(|e| conversion_failure(idx, e))
}

pub fn json_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
  let raw: String = row.get(idx)?;
  serde_json::from_str(&raw).map_err(|e| conversion_failure(idx, e))
}

/// Encode a JSON value for a TEXT column from inside a connection closure.
pub fn json_text(value: &impl serde::Serialize) -> rusqlite::Result<String> {
  serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

// ─── Row decoders ────────────────────────────────────────────────────────────

/// Decode [`OBJECT_COLUMNS`].
pub fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
  let parent_type: Option<String> = row.get(6)?;
  let parent_id: Option<i64> = row.get(7)?;
  let parent = match (parent_type, parent_id) {
    (Some(ty), Some(id)) => Some(TargetRef::new(
      TargetType::parse(&ty).map_err(|e| conversion_failure(6, e))?,
      id,
    )),
    _ => None,
  };

  Ok(Record {
    target: TargetRef::new(target_type_at(row, 1)?, row.get(0)?),
    owner: row.get(2)?,
    created: dt_at(row, 3)?,
    modified: dt_at(row, 4)?,
    when_date: dt_at(row, 5)?,
    parent,
    data: json_at(row, 8)?,
  })
}

/// Decode [`LINK_COLUMNS`].
pub fn link_from_row(row: &Row<'_>) -> rusqlite::Result<Link> {
  Ok(Link {
    id:      row.get(0)?,
    v0:      target_at(row, 1)?,
    v1:      target_at(row, 3)?,
    weight:  row.get(5)?,
    context: row.get(6)?,
    created: dt_at(row, 7)?,
  })
}

/// Decode [`PERMISSION_COLUMNS`].
pub fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<Permission> {
  Ok(Permission {
    id:         row.get(0)?,
    role_id:    row.get(1)?,
    target:     target_at(row, 2)?,
    permission: permission_kind_at(row, 4)?,
  })
}

/// Decode [`APPEARANCE_COLUMNS`].
pub fn appearance_from_row(row: &Row<'_>) -> rusqlite::Result<Appearance> {
  Ok(Appearance {
    id:        row.get(0)?,
    when_date: dt_at(row, 1)?,
    container: target_at(row, 2)?,
    value:     AppearanceValue {
      target: target_at(row, 4)?,
      text:   row.get(6)?,
    },
  })
}

/// Decode [`AUDIT_COLUMNS`].
pub fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<Audit> {
  Ok(Audit {
    id:             row.get(0)?,
    when_date:      dt_at(row, 1)?,
    username:       row.get(2)?,
    what:           row.get(3)?,
    thing:          target_at(row, 4)?,
    src_ip:         row.get(6)?,
    user_agent:     row.get(7)?,
    audit_data_ver: row.get(8)?,
    audit_data:     json_at(row, 9)?,
  })
}

/// Decode [`ROLE_COLUMNS`].
pub fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
  Ok(Role {
    id:          row.get(0)?,
    name:        row.get(1)?,
    description: row.get(2)?,
  })
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_are_fixed_width_and_ordered() {
    let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let b = a + chrono::Duration::milliseconds(500);
    let (ea, eb) = (encode_dt(a), encode_dt(b));

    assert_eq!(ea, "2024-01-01T00:00:00.000000Z");
    assert_eq!(ea.len(), eb.len());
    assert!(ea < eb);
    assert_eq!(DateTime::parse_from_rfc3339(&eb).unwrap(), b);
  }

  #[test]
  fn filter_values_bind_as_sqlite_types() {
    assert_eq!(filter_value(&FilterValue::Bool(true)), Value::Integer(1));
    assert_eq!(
      filter_value(&FilterValue::DateTime(
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
      )),
      Value::Text("2024-01-02T00:00:00.000000Z".into())
    );
  }
}
