//! The generic object row shared by every record type.
//!
//! Alerts, events, entries, tags and the rest differ only in the fields they
//! keep inside `data`; ownership, timestamps, parentage and soft-delete state
//! are common and live in dedicated columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::{TargetRef, TargetType};

/// A live (not soft-deleted) object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub target:    TargetRef,
  pub owner:     String,
  pub created:   DateTime<Utc>,
  pub modified:  DateTime<Utc>,
  /// When the underlying thing happened; defaults to `created`.
  pub when_date: DateTime<Utc>,
  /// The container this object lives in (e.g. an entry's event).
  pub parent:    Option<TargetRef>,
  /// Type-specific fields. Always a JSON object.
  pub data:      serde_json::Value,
}

impl Record {
  pub fn id(&self) -> i64 { self.target.id }
}

/// Input to the create family of [`crate::store::ObjectStore`] methods.
/// `created`/`modified` are set by the store.
#[derive(Debug, Clone)]
pub struct NewRecord {
  pub target_type: TargetType,
  pub owner:       String,
  pub when_date:   Option<DateTime<Utc>>,
  pub data:        serde_json::Value,
}

impl NewRecord {
  /// `data` defaults to an empty object.
  pub fn new(target_type: TargetType, owner: impl Into<String>) -> Self {
    Self {
      target_type,
      owner: owner.into(),
      when_date: None,
      data: serde_json::Value::Object(Default::default()),
    }
  }

  pub fn with_data(mut self, data: serde_json::Value) -> Self {
    self.data = data;
    self
  }

  pub fn with_when_date(mut self, when: DateTime<Utc>) -> Self {
    self.when_date = Some(when);
    self
  }
}
