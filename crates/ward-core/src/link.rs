//! Typed, directed edges between any two objects.
//!
//! Links back tags, sources, cross-object pivots and promotion provenance.
//! The graph is directional; "bidirectional" relationships such as tagging
//! are stored as a mirrored pair of edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::TargetRef;

/// A persisted edge `v0 → v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
  pub id:      i64,
  pub v0:      TargetRef,
  pub v1:      TargetRef,
  pub weight:  i64,
  /// Free-text reason for the edge, e.g. `"promotion"` or `"tagged"`.
  pub context: Option<String>,
  pub created: DateTime<Utc>,
}

/// Input to [`crate::store::LinkGraph::create_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLink {
  pub v0:      TargetRef,
  pub v1:      TargetRef,
  pub weight:  i64,
  pub context: Option<String>,
}

impl NewLink {
  pub fn new(v0: TargetRef, v1: TargetRef) -> Self {
    Self { v0, v1, weight: 1, context: None }
  }

  pub fn with_context(mut self, context: impl Into<String>) -> Self {
    self.context = Some(context.into());
    self
  }

  pub fn mirrored(&self) -> Self {
    Self {
      v0:      self.v1,
      v1:      self.v0,
      weight:  self.weight,
      context: self.context.clone(),
    }
  }
}
