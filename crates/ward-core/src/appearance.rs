//! The appearance index: a denormalised "where does X show up" projection.
//!
//! Appearances are never the source of truth for a relationship; they exist
//! to answer reverse lookups quickly and may be rebuilt at any time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::EnumIter;

use crate::target::{TargetRef, TargetType};

/// The observed value. `text` carries the literal string that was seen
/// (e.g. the matched entity text) when one exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppearanceValue {
  pub target: TargetRef,
  pub text:   Option<String>,
}

/// One row of the index: `value` was observed in `container` at `when_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
  pub id:        i64,
  pub when_date: DateTime<Utc>,
  pub container: TargetRef,
  pub value:     AppearanceValue,
}

/// Input to [`crate::store::AppearanceIndex::record_appearance`].
#[derive(Debug, Clone)]
pub struct NewAppearance {
  /// Defaults to now.
  pub when_date: Option<DateTime<Utc>>,
  pub container: TargetRef,
  pub value:     AppearanceValue,
}

/// Fixed set of container kinds reverse lookups are grouped by.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum AppearanceBucket {
  Alert,
  Dispatch,
  Event,
  Incident,
  Intel,
  Product,
  Signature,
  VulnFeed,
  VulnTrack,
}

impl AppearanceBucket {
  pub fn target_type(&self) -> TargetType {
    match self {
      Self::Alert => TargetType::Alert,
      Self::Dispatch => TargetType::Dispatch,
      Self::Event => TargetType::Event,
      Self::Incident => TargetType::Incident,
      Self::Intel => TargetType::Intel,
      Self::Product => TargetType::Product,
      Self::Signature => TargetType::Signature,
      Self::VulnFeed => TargetType::VulnFeed,
      Self::VulnTrack => TargetType::VulnTrack,
    }
  }
}

/// One bucket of a reverse lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppearancePage {
  /// Number of appearances in this bucket before `skip`/`limit`.
  pub total: u64,
  /// Most recent first.
  pub items: Vec<Appearance>,
}

/// Result of a reverse lookup; always contains every bucket.
pub type AppearanceBuckets = BTreeMap<AppearanceBucket, AppearancePage>;
