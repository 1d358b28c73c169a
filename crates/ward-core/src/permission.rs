//! Roles and permission grants.
//!
//! Permissions are only ever granted to roles, never to individual users. A
//! grant is the triple `(role, target, kind)` and is unique in the store.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString, IntoStaticStr};

use crate::{Error, Result, target::TargetRef};

pub type RoleId = i64;

/// A named group of users.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Role {
  pub id:          RoleId,
  pub name:        String,
  pub description: Option<String>,
}

/// What a grant allows.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  IntoStaticStr,
  EnumString,
  EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PermissionKind {
  Read,
  Modify,
  Delete,
  Admin,
}

impl PermissionKind {
  pub fn as_str(&self) -> &'static str { self.into() }

  pub fn parse(s: &str) -> Result<Self> {
    Self::from_str(s).map_err(|_| Error::UnknownPermission(s.to_owned()))
  }

  /// The set a creator's roles receive on a new object.
  pub const OWNER: [PermissionKind; 3] = [Self::Read, Self::Modify, Self::Delete];
}

impl fmt::Display for PermissionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A single persisted grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
  pub id:         i64,
  pub role_id:    RoleId,
  pub target:     TargetRef,
  pub permission: PermissionKind,
}

/// Permission → roles holding it on one object.
pub type PermissionRoles = BTreeMap<PermissionKind, Vec<Role>>;

/// Caller-supplied grants for a new object: permission → role ids.
pub type PermissionMap = BTreeMap<PermissionKind, Vec<RoleId>>;
