//! Per-entity search descriptors.
//!
//! A [`SearchSchema`] tells the filter compiler how to coerce each literal
//! token for a field and which fields are resolved through the link graph.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::{Error, Result, filter::FilterValue, target::TargetType};

/// Coercion hooks consumed by [`crate::filter::compile`].
pub trait SearchSchema {
  /// Convert one literal token for `field`, failing with
  /// [`Error::Validation`] on invalid input.
  fn type_mapping(&self, field: &str, token: &str) -> Result<FilterValue>;

  /// If `field` is resolved through links, the type of object on the other
  /// end (e.g. `tag` → [`TargetType::Tag`]).
  fn link_field(&self, _field: &str) -> Option<TargetType> { None }
}

/// How a field's tokens are coerced by [`BaseSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
  Int,
  Float,
  Text,
  Bool,
  DateTime,
  /// Text restricted to the listed values.
  Enum(Vec<String>),
  Link(TargetType),
}

impl FieldKind {
  pub fn enumeration(values: &[&str]) -> Self {
    Self::Enum(values.iter().map(|v| (*v).to_owned()).collect())
  }
}

/// A table-driven [`SearchSchema`]. Fields not listed are plain text, which
/// still matches JSON numbers by equality and membership; declare numeric
/// fields so ranges compare numerically.
#[derive(Debug, Clone)]
pub struct BaseSchema {
  fields: BTreeMap<String, FieldKind>,
}

const STATUS: &[&str] = &["open", "closed", "promoted"];
const TLP: &[&str] = &[
  "unset",
  "clear",
  "white",
  "green",
  "amber",
  "amber_strict",
  "red",
  "black",
];

static TEXT: FieldKind = FieldKind::Text;

impl Default for BaseSchema {
  fn default() -> Self { Self::new() }
}

impl BaseSchema {
  /// Columns every record carries, plus the `tag` and `source` link fields.
  pub fn new() -> Self {
    Self { fields: BTreeMap::new() }
      .field("id", FieldKind::Int)
      .field("owner", FieldKind::Text)
      .field("created", FieldKind::DateTime)
      .field("modified", FieldKind::DateTime)
      .field("when_date", FieldKind::DateTime)
      .field("tag", FieldKind::Link(TargetType::Tag))
      .field("source", FieldKind::Link(TargetType::Source))
  }

  /// Presets for the fields a given record type is commonly filtered on.
  pub fn for_type(ty: TargetType) -> Self {
    use TargetType as T;

    let mut schema = Self::new();
    if !ty.is_whitelisted() && ty != T::Admin {
      schema = schema.field("tlp", FieldKind::enumeration(TLP));
    }
    match ty {
      T::Alert | T::AlertGroup | T::Event | T::Dispatch | T::Intel | T::Product => {
        schema = schema.field("status", FieldKind::enumeration(STATUS));
      }
      T::Incident => {
        schema = schema.field("status", FieldKind::enumeration(&["open", "closed"]));
      }
      T::Entity => {
        schema = schema
          .field("status", FieldKind::enumeration(&["tracked", "untracked"]))
          .field("entity_count", FieldKind::Int);
      }
      T::Signature => {
        schema = schema.field("active", FieldKind::Bool);
      }
      _ => {}
    }
    if ty.is_container() {
      schema = schema.field("entry_count", FieldKind::Int);
    }
    if ty == T::AlertGroup {
      schema = schema.field("alert_count", FieldKind::Int);
    }
    schema
  }

  pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
    self.fields.insert(name.into(), kind);
    self
  }

  pub fn kind(&self, field: &str) -> &FieldKind {
    self.fields.get(field).unwrap_or(&TEXT)
  }
}

impl SearchSchema for BaseSchema {
  fn type_mapping(&self, field: &str, token: &str) -> Result<FilterValue> {
    let invalid = |reason: &str| Error::validation(field, token, reason);

    match self.kind(field) {
      FieldKind::Int | FieldKind::Link(_) => token
        .parse::<i64>()
        .map(FilterValue::Int)
        .map_err(|_| invalid("expected an integer")),
      FieldKind::Float => token
        .parse::<f64>()
        .map(FilterValue::Float)
        .map_err(|_| invalid("expected a number")),
      FieldKind::Text => Ok(FilterValue::Text(token.to_owned())),
      FieldKind::Bool => parse_bool(token)
        .map(FilterValue::Bool)
        .ok_or_else(|| invalid("expected a boolean")),
      FieldKind::DateTime => parse_datetime(token)
        .map(FilterValue::DateTime)
        .ok_or_else(|| invalid("expected a date, RFC 3339 timestamp or epoch seconds")),
      FieldKind::Enum(values) => values
        .iter()
        .find(|v| v.eq_ignore_ascii_case(token))
        .map(|v| FilterValue::Text(v.clone()))
        .ok_or_else(|| invalid(&format!("expected one of {}", values.join(", ")))),
    }
  }

  fn link_field(&self, field: &str) -> Option<TargetType> {
    match self.fields.get(field) {
      Some(FieldKind::Link(ty)) => Some(*ty),
      _ => None,
    }
  }
}

fn parse_bool(s: &str) -> Option<bool> {
  match s.to_ascii_lowercase().as_str() {
    "true" | "t" | "yes" | "1" => Some(true),
    "false" | "f" | "no" | "0" => Some(false),
    _ => None,
  }
}

/// Accepts `YYYY-MM-DD` (midnight UTC), `YYYY-MM-DD HH:MM:SS`, RFC 3339 and
/// integer epoch seconds.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
    return Some(naive.and_utc());
  }
  if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
    return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
  }
  if let Ok(secs) = s.parse::<i64>() {
    return DateTime::from_timestamp(secs, 0);
  }
  None
}
