//! [`SqliteStore`]: the SQLite implementation of the `ward-core` storage
//! traits.
//!
//! The trait impls live next to the tables they own (`registry.rs`,
//! `graph.rs`, `appearance.rs`, `objects.rs`). Each public operation runs as
//! a single closure on the connection thread; multi-statement operations
//! open a transaction inside it and compose the synchronous `*_tx` helpers
//! those modules export.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use ward_core::{
  permission::PermissionKind,
  policy::{GeneralizeAcrossType, OwnerPolicy},
};

use crate::{Result, schema::SCHEMA};

/// Site-wide grants applied by `create_with_permissions(.., None, ..)`,
/// keyed by permission and naming roles.
pub type DefaultPermissions = BTreeMap<PermissionKind, Vec<String>>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Ward object store backed by a single SQLite file.
///
/// Cloning is cheap; the connection, policy and defaults are shared.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn:                tokio_rusqlite::Connection,
  pub(crate) owner_policy:        Arc<dyn OwnerPolicy>,
  pub(crate) default_permissions: Arc<DefaultPermissions>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self::with_connection(conn);
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self::with_connection(conn);
    store.init_schema().await?;
    Ok(store)
  }

  fn with_connection(conn: tokio_rusqlite::Connection) -> Self {
    Self {
      conn,
      owner_policy: Arc::new(GeneralizeAcrossType),
      default_permissions: Arc::default(),
    }
  }

  /// Replace the policy used by `create_owner_permissions`.
  pub fn with_owner_policy(mut self, policy: impl OwnerPolicy + 'static) -> Self {
    self.owner_policy = Arc::new(policy);
    self
  }

  pub fn with_default_permissions(mut self, defaults: DefaultPermissions) -> Self {
    self.default_permissions = Arc::new(defaults);
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
