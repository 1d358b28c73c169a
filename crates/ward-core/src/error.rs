//! Error types for `ward-core`.

use thiserror::Error;

use crate::{permission::PermissionKind, target::TargetRef};

#[derive(Debug, Error)]
pub enum Error {
  #[error("object not found: {0}")]
  NotFound(TargetRef),

  #[error("role not found: {0}")]
  RoleNotFound(String),

  /// A filter token could not be coerced to the field's type, or the filter
  /// expression itself is malformed.
  #[error("invalid filter value {token:?} for field {field:?}: {reason}")]
  Validation {
    field:  String,
    token:  String,
    reason: String,
  },

  #[error("permission denied: {perm} on {target}")]
  PermissionDenied {
    target: TargetRef,
    perm:   PermissionKind,
  },

  #[error("unknown target type: {0:?}")]
  UnknownTargetType(String),

  #[error("unknown permission: {0:?}")]
  UnknownPermission(String),

  #[error("malformed target ref: {0:?}")]
  MalformedTargetRef(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub(crate) fn validation(
    field: &str,
    token: &str,
    reason: impl Into<String>,
  ) -> Self {
    Self::Validation {
      field:  field.to_owned(),
      token:  token.to_owned(),
      reason: reason.into(),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
