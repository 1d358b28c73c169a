//! Audit records written by the mutation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::TargetRef;

/// Version of the JSON snapshot layout stored in `audit_data`.
pub const AUDIT_DATA_VERSION: i64 = 1;

/// Who is performing a mutation. Passing one to a mutation makes it write an
/// audit row; passing `None` skips auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
  pub username:   String,
  pub src_ip:     Option<String>,
  pub user_agent: Option<String>,
}

impl AuditContext {
  pub fn new(username: impl Into<String>) -> Self {
    Self { username: username.into(), src_ip: None, user_agent: None }
  }
}

/// The `what` column of an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
  Create,
  Update,
  Delete,
  Undelete,
  Purge,
  Promote,
}

impl AuditAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      AuditAction::Create => "create",
      AuditAction::Update => "update",
      AuditAction::Delete => "delete",
      AuditAction::Undelete => "undelete",
      AuditAction::Purge => "purge",
      AuditAction::Promote => "promote",
    }
  }
}

/// A persisted audit row. `what` is kept as a string so rows written by
/// other producers still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
  pub id:             i64,
  pub when_date:      DateTime<Utc>,
  pub username:       String,
  pub what:           String,
  pub thing:          TargetRef,
  pub src_ip:         Option<String>,
  pub user_agent:     Option<String>,
  pub audit_data_ver: i64,
  pub audit_data:     serde_json::Value,
}
