//! Storage traits and supporting query types.
//!
//! The traits are implemented by storage backends (e.g. `ward-store-sqlite`).
//! A routing layer depends on these abstractions, not on a concrete backend.
//!
//! Roles are always threaded explicitly. Where a method takes
//! `roles: Option<&[RoleId]>`, `None` means an internal/system call that is
//! not permission-scoped at all.
//!
//! All methods return `Send` futures so the traits can be used in
//! multi-threaded async runtimes.

use std::{collections::BTreeSet, future::Future};

use serde::{Deserialize, Serialize};

use crate::{
  appearance::{Appearance, AppearanceBuckets, NewAppearance},
  audit::{Audit, AuditContext},
  filter::FilterTree,
  link::{Link, NewLink},
  permission::{Permission, PermissionKind, PermissionMap, PermissionRoles, Role, RoleId},
  record::{NewRecord, Record},
  target::{TargetRef, TargetType},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// One page of results plus the total before pagination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub total: u64,
}

/// Ordering for paginated queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
  pub field:      String,
  pub descending: bool,
}

impl Sort {
  pub fn asc(field: impl Into<String>) -> Self {
    Self { field: field.into(), descending: false }
  }

  pub fn desc(field: impl Into<String>) -> Self {
    Self { field: field.into(), descending: true }
  }

  /// Parse the `-field` / `field` convention.
  pub fn parse(s: &str) -> Self {
    match s.strip_prefix('-') {
      Some(field) => Self::desc(field),
      None => Self::asc(s.strip_prefix('+').unwrap_or(s)),
    }
  }
}

/// Newest first.
impl Default for Sort {
  fn default() -> Self { Self::desc("id") }
}

/// Parameters for [`ObjectStore::query_with_filters`].
#[derive(Debug, Clone)]
pub struct ObjectQuery {
  pub target_type: TargetType,
  /// `None` is an unscoped system query.
  pub roles:       Option<Vec<RoleId>>,
  pub filter:      FilterTree,
  pub sort:        Sort,
  pub skip:        usize,
  pub limit:       Option<usize>,
}

impl ObjectQuery {
  pub fn new(target_type: TargetType, roles: Option<Vec<RoleId>>) -> Self {
    Self {
      target_type,
      roles,
      filter: FilterTree::default(),
      sort: Sort::default(),
      skip: 0,
      limit: None,
    }
  }
}

/// Parameters for [`LinkGraph::target_filter`].
#[derive(Debug, Clone)]
pub struct TargetFilter {
  /// The type of the `ids` (e.g. [`TargetType::Tag`]).
  pub link_type:   TargetType,
  pub ids:         Vec<i64>,
  /// The type of objects returned.
  pub target_type: TargetType,
  /// Require a link from every id instead of any.
  pub all:         bool,
  pub sort:        Sort,
  pub skip:        usize,
  pub limit:       Option<usize>,
}

/// Result of a best-effort batch operation. Each item ran in its own
/// transaction; `failed` items did not affect the others.
#[derive(Debug, Default)]
pub struct BatchOutcome {
  pub succeeded: Vec<TargetRef>,
  pub not_found: Vec<TargetRef>,
  pub failed:    Vec<(TargetRef, String)>,
}

// ─── PermissionRegistry ──────────────────────────────────────────────────────

/// Roles, grants and the access decisions derived from them.
pub trait PermissionRegistry: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Roles ─────────────────────────────────────────────────────────────

  fn create_role(
    &self,
    name: &str,
    description: Option<&str>,
  ) -> impl Future<Output = Result<Role, Self::Error>> + Send;

  fn get_role(
    &self,
    id: RoleId,
  ) -> impl Future<Output = Result<Option<Role>, Self::Error>> + Send;

  fn get_role_by_name(
    &self,
    name: &str,
  ) -> impl Future<Output = Result<Option<Role>, Self::Error>> + Send;

  fn list_roles(&self) -> impl Future<Output = Result<Vec<Role>, Self::Error>> + Send;

  /// Add `username` to a role. Idempotent.
  fn assign_role(
    &self,
    username: &str,
    role: RoleId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;

  fn roles_for_user(
    &self,
    username: &str,
  ) -> impl Future<Output = Result<Vec<Role>, Self::Error>> + Send;

  // ── Grants ────────────────────────────────────────────────────────────

  /// Grant `perm` on `target` to `role`. Granting an existing grant returns
  /// the existing row; concurrent duplicate grants never fail.
  fn grant(
    &self,
    role: RoleId,
    target: TargetRef,
    perm: PermissionKind,
  ) -> impl Future<Output = Result<Permission, Self::Error>> + Send;

  /// Make every holder of `role` a global admin.
  fn grant_admin(
    &self,
    role: RoleId,
  ) -> impl Future<Output = Result<Permission, Self::Error>> + Send {
    self.grant(role, TargetRef::admin_sentinel(), PermissionKind::Admin)
  }

  /// Returns the removed grant, or `None` if there was nothing to revoke.
  fn revoke(
    &self,
    role: RoleId,
    target: TargetRef,
    perm: PermissionKind,
  ) -> impl Future<Output = Result<Option<Permission>, Self::Error>> + Send;

  /// Union of the permissions any of the user's roles hold on `target`.
  fn effective_permissions(
    &self,
    username: &str,
    target: TargetRef,
  ) -> impl Future<Output = Result<BTreeSet<PermissionKind>, Self::Error>> + Send;

  /// Union of the permissions any of `roles` hold on `target`.
  fn permissions_for_roles(
    &self,
    roles: &[RoleId],
    target: TargetRef,
  ) -> impl Future<Output = Result<BTreeSet<PermissionKind>, Self::Error>> + Send;

  /// True iff any of `roles` holds the sentinel admin grant.
  fn is_admin(
    &self,
    roles: &[RoleId],
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

  fn is_user_admin(
    &self,
    username: &str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

  /// The roles to thread into queries for `username`: `None` (unscoped) for
  /// admins, the user's role ids otherwise.
  fn scope_for_user(
    &self,
    username: &str,
  ) -> impl Future<Output = Result<Option<Vec<RoleId>>, Self::Error>> + Send;

  /// Write the grants the configured owner policy derives for a new object
  /// created by `username`. Returns the grants now present.
  fn create_owner_permissions(
    &self,
    username: &str,
    target: TargetRef,
  ) -> impl Future<Output = Result<Vec<Permission>, Self::Error>> + Send;

  fn get_permission_roles(
    &self,
    target: TargetRef,
  ) -> impl Future<Output = Result<PermissionRoles, Self::Error>> + Send;

  /// Clone every grant on `src` onto `dst`. Returns the number of grants that
  /// were new on `dst`.
  fn copy_object_permissions(
    &self,
    src: TargetRef,
    dst: TargetRef,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

  /// Keep only the external search hits that are live objects `roles` may
  /// read. `None` when `hits` was empty.
  fn filter_search_hits(
    &self,
    hits: &[TargetRef],
    roles: &[RoleId],
  ) -> impl Future<Output = Result<Option<Vec<TargetRef>>, Self::Error>> + Send;

  /// Request guard: fails with a permission-denied error unless `username`
  /// (holding `roles`) may `perm` the target, and with a not-found error if
  /// the target is not a live object.
  fn require_permission(
    &self,
    username: &str,
    roles: &[RoleId],
    target: TargetRef,
    perm: PermissionKind,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

// ─── LinkGraph ───────────────────────────────────────────────────────────────

/// Directed typed edges between any two objects.
pub trait LinkGraph: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Insert an edge; an existing `v0 → v1` edge is an error.
  fn create_link(
    &self,
    link: NewLink,
  ) -> impl Future<Output = Result<Link, Self::Error>> + Send;

  /// Insert an edge or return the existing `v0 → v1` edge.
  fn get_or_create_link(
    &self,
    link: NewLink,
  ) -> impl Future<Output = Result<Link, Self::Error>> + Send;

  /// Insert the mirrored pair `v0 → v1` and `v1 → v0` (tagging, sourcing).
  fn assign(
    &self,
    v0: TargetRef,
    v1: TargetRef,
    context: Option<&str>,
  ) -> impl Future<Output = Result<(Link, Link), Self::Error>> + Send;

  /// Remove a mirrored pair. `None` if neither edge existed.
  fn unassign(
    &self,
    v0: TargetRef,
    v1: TargetRef,
  ) -> impl Future<Output = Result<Option<Vec<Link>>, Self::Error>> + Send {
    self.delete_links(v0, v1, true)
  }

  /// Objects of `target_type` linked from any (or all) of the given ids.
  fn target_filter(
    &self,
    query: &TargetFilter,
  ) -> impl Future<Output = Result<Page<Record>, Self::Error>> + Send;

  /// Delete `v0 → v1`, and `v1 → v0` too when `bidirectional`. `None` if
  /// nothing matched.
  fn delete_links(
    &self,
    v0: TargetRef,
    v1: TargetRef,
    bidirectional: bool,
  ) -> impl Future<Output = Result<Option<Vec<Link>>, Self::Error>> + Send;

  /// Delete every edge touching `target`. Returns the number removed.
  fn delete_links_for_object(
    &self,
    target: TargetRef,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

  /// Every edge touching the object, in either position.
  fn find_all_links(
    &self,
    target_type: TargetType,
    id: i64,
  ) -> impl Future<Output = Result<Vec<Link>, Self::Error>> + Send;

  /// Rewrite every edge touching `old` to touch `new` instead. Edges that
  /// would duplicate an existing edge are dropped. Returns the number of
  /// edges rewritten.
  fn repoint_links(
    &self,
    old: TargetRef,
    new: TargetRef,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send;
}

// ─── AppearanceIndex ─────────────────────────────────────────────────────────

/// Reverse lookup of where a value has been observed.
pub trait AppearanceIndex: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn record_appearance(
    &self,
    input: NewAppearance,
  ) -> impl Future<Output = Result<Appearance, Self::Error>> + Send;

  /// Every bucket, each most-recent-first with `skip`/`limit` applied per
  /// bucket.
  fn appearances(
    &self,
    value: TargetRef,
    skip: usize,
    limit: usize,
  ) -> impl Future<Output = Result<AppearanceBuckets, Self::Error>> + Send;

  fn delete_appearances_for_container(
    &self,
    container: TargetRef,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

  fn delete_appearances_for_value(
    &self,
    value: TargetRef,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

  /// Re-derive `src`'s appearances for `dst` (promotion).
  fn copy_appearances(
    &self,
    src: TargetRef,
    dst: TargetRef,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send;
}

// ─── ObjectStore ─────────────────────────────────────────────────────────────

/// Permission-scoped queries and audited mutations over records.
///
/// Every mutation takes an optional [`AuditContext`]; when present an audit
/// row is written in the same transaction as the mutation.
pub trait ObjectStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Queries ───────────────────────────────────────────────────────────

  /// Filtered, sorted, paginated and permission-scoped. `total` is counted
  /// before pagination. Soft-deleted rows never appear.
  fn query_with_filters(
    &self,
    query: &ObjectQuery,
  ) -> impl Future<Output = Result<Page<Record>, Self::Error>> + Send;

  /// Everything of `target_type` that `roles` may read.
  fn query_objects_with_roles(
    &self,
    target_type: TargetType,
    roles: Option<&[RoleId]>,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send;

  /// A single object, if `roles` may read it.
  fn get_with_roles(
    &self,
    target: TargetRef,
    roles: Option<&[RoleId]>,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send;

  fn get(
    &self,
    target: TargetRef,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send;

  /// Missing and deleted ids are skipped.
  fn get_multi(
    &self,
    target_type: TargetType,
    ids: &[i64],
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send;

  // ── Creation ──────────────────────────────────────────────────────────

  /// Create without writing any grants.
  fn create(
    &self,
    input: NewRecord,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

  /// Create with the given grants, or the configured default grants when
  /// `perms` is `None`.
  fn create_with_permissions(
    &self,
    input: NewRecord,
    perms: Option<PermissionMap>,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

  /// Create and apply the owner policy for `input.owner`.
  fn create_with_owner(
    &self,
    input: NewRecord,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

  /// Create a child of `parent`; the child inherits the parent's grants.
  fn create_in_object(
    &self,
    input: NewRecord,
    parent: TargetRef,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

  /// Convert `src` into a new higher-tier object: grants are copied, a
  /// `promotion` link is written and appearances are re-derived.
  fn promote(
    &self,
    src: TargetRef,
    input: NewRecord,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

  // ── Mutation ──────────────────────────────────────────────────────────

  /// Shallow-merge `patch` (a JSON object) into the record's data.
  fn update(
    &self,
    target: TargetRef,
    patch: serde_json::Value,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

  /// Soft delete. `None` if the object is absent or already deleted.
  fn remove(
    &self,
    target: TargetRef,
    by_user: &str,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send;

  /// Best-effort soft delete of many objects.
  fn remove_many(
    &self,
    targets: &[TargetRef],
    by_user: &str,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<BatchOutcome, Self::Error>> + Send;

  /// Permanent removal, cascading grants, links and appearances. Works on
  /// live and soft-deleted rows. `None` if the object does not exist.
  fn purge(
    &self,
    target: TargetRef,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send;

  /// Reverse the soft delete of `target`. `by_user = None` is an admin and
  /// may restore anyone's delete. With `keep_ids = false` the object comes
  /// back under a fresh id.
  fn undelete(
    &self,
    target: TargetRef,
    keep_ids: bool,
    by_user: Option<&str>,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

  /// Reverse the most recent delete of `target_type` recorded for `by_user`.
  fn undelete_latest(
    &self,
    target_type: TargetType,
    keep_ids: bool,
    by_user: Option<&str>,
    audit: Option<&AuditContext>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

  /// Audit rows for the object, oldest first. For container types the
  /// children's create and delete rows are included.
  fn get_history(
    &self,
    target: TargetRef,
  ) -> impl Future<Output = Result<Vec<Audit>, Self::Error>> + Send;
}
