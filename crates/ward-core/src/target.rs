//! Polymorphic object references.
//!
//! Every addressable object in the system is identified by a [`TargetRef`]:
//! a closed [`TargetType`] discriminant plus a numeric id. The pair stands in
//! for a real foreign key in permissions, links, appearances and audits.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString, IntoStaticStr};

use crate::{Error, Result};

// ─── TargetType ──────────────────────────────────────────────────────────────

/// The kind of object a [`TargetRef`] points at.
///
/// The string form (snake_case) is what the database stores; it must never
/// change for an existing variant.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetType {
  /// Sentinel type; only ever used with id `0` for global admin grants.
  Admin,
  Alert,
  AlertGroup,
  Checklist,
  Dispatch,
  Entity,
  EntityClass,
  EntityType,
  Entry,
  Event,
  Feed,
  File,
  Game,
  Guide,
  Handler,
  Incident,
  Intel,
  Metric,
  Pivot,
  Product,
  Role,
  SigBody,
  Signature,
  Source,
  Stat,
  Tag,
  ThreatModelItem,
  User,
  VulnFeed,
  VulnReport,
  VulnTrack,
}

impl TargetType {
  pub fn as_str(&self) -> &'static str { self.into() }

  /// Parse the stored discriminant, mapping failure into [`Error`].
  pub fn parse(s: &str) -> Result<Self> {
    Self::from_str(s).map_err(|_| Error::UnknownTargetType(s.to_owned()))
  }

  /// Types whose rows are public metadata and are never permission-scoped.
  pub fn is_whitelisted(&self) -> bool {
    matches!(
      self,
      Self::EntityClass
        | Self::EntityType
        | Self::Game
        | Self::Metric
        | Self::Source
        | Self::Stat
        | Self::Tag
    )
  }

  /// Types that hold child entries. Their history includes the children's
  /// create and delete audits.
  pub fn is_container(&self) -> bool {
    matches!(
      self,
      Self::Event | Self::Incident | Self::Intel | Self::Product
    )
  }
}

impl fmt::Display for TargetType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── TargetRef ───────────────────────────────────────────────────────────────

/// A `(type, id)` pair addressing any object in the store.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TargetRef {
  pub target_type: TargetType,
  pub id:          i64,
}

impl TargetRef {
  pub fn new(target_type: TargetType, id: i64) -> Self {
    Self { target_type, id }
  }

  /// The `(admin, 0)` ref; a role granted `admin` on it is a global admin.
  pub fn admin_sentinel() -> Self { Self::new(TargetType::Admin, 0) }

  pub fn is_admin_sentinel(&self) -> bool {
    self.target_type == TargetType::Admin && self.id == 0
  }
}

impl fmt::Display for TargetRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.target_type, self.id)
  }
}

/// Parses the `type:id` form produced by [`Display`](fmt::Display).
impl FromStr for TargetRef {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let (ty, id) = s
      .split_once(':')
      .ok_or_else(|| Error::MalformedTargetRef(s.to_owned()))?;
    let id = id
      .parse::<i64>()
      .map_err(|_| Error::MalformedTargetRef(s.to_owned()))?;
    Ok(Self::new(TargetType::parse(ty)?, id))
  }
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn discriminants_roundtrip() {
    for ty in TargetType::iter() {
      assert_eq!(TargetType::parse(ty.as_str()).unwrap(), ty);
    }
    assert_eq!(TargetType::ThreatModelItem.as_str(), "threat_model_item");
    assert_eq!(TargetType::AlertGroup.as_str(), "alert_group");
  }

  #[test]
  fn unknown_type_is_an_error() {
    let err = TargetType::parse("bogus").unwrap_err();
    assert!(matches!(err, Error::UnknownTargetType(s) if s == "bogus"));
  }

  #[test]
  fn target_ref_display_and_parse() {
    let r = TargetRef::new(TargetType::Event, 42);
    assert_eq!(r.to_string(), "event:42");
    assert_eq!("event:42".parse::<TargetRef>().unwrap(), r);
    assert!("event".parse::<TargetRef>().is_err());
    assert!("event:x".parse::<TargetRef>().is_err());
  }

  #[test]
  fn whitelist_and_containers() {
    assert!(TargetType::Tag.is_whitelisted());
    assert!(!TargetType::Alert.is_whitelisted());
    assert!(TargetType::Intel.is_container());
    assert!(!TargetType::Entry.is_container());
    assert!(TargetRef::admin_sentinel().is_admin_sentinel());
  }
}
