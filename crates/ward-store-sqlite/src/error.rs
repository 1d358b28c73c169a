//! Error type for `ward-store-sqlite`.

use thiserror::Error;
use ward_core::{
  permission::PermissionKind,
  target::{TargetRef, TargetType},
};

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] ward_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("object not found: {0}")]
  NotFound(TargetRef),

  #[error("no deleted {0} objects to restore")]
  NothingDeleted(TargetType),

  #[error("role not found: {0}")]
  RoleNotFound(String),

  #[error("role {0:?} already exists")]
  RoleExists(String),

  #[error("permission denied: {perm} on {target}")]
  PermissionDenied {
    target: TargetRef,
    perm:   PermissionKind,
  },

  #[error("link {v0} -> {v1} already exists")]
  LinkExists { v0: TargetRef, v1: TargetRef },

  /// A filter or sort field that cannot be mapped to a column.
  #[error("invalid field name: {0:?}")]
  InvalidField(String),

  #[error("update patch must be a JSON object")]
  InvalidPatch,
}

impl Error {
  pub(crate) fn denied(target: TargetRef, perm: PermissionKind) -> Self {
    Self::PermissionDenied { target, perm }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
