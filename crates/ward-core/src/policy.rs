//! Owner-permission policies.
//!
//! When a user creates an object, the store asks an [`OwnerPolicy`] which
//! grants to write. The store gathers the inputs (the creator's roles and the
//! grants those roles already hold on other objects of the same type); the
//! policy only decides.

use std::collections::BTreeSet;

use crate::permission::{PermissionKind, RoleId};

/// Decides the grants written for a newly created object.
pub trait OwnerPolicy: Send + Sync {
  /// - `creator_roles`: every role the creating user holds.
  /// - `prior`: `(role, permission)` pairs that any of `creator_roles` has
  ///   been granted on some *other* object of the same target type.
  fn owner_grants(
    &self,
    creator_roles: &[RoleId],
    prior: &[(RoleId, PermissionKind)],
  ) -> BTreeSet<(RoleId, PermissionKind)>;
}

/// The creator's roles get read/modify/delete, and every permission one of
/// those roles already holds on another object of the same type is extended
/// to the new object.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneralizeAcrossType;

impl OwnerPolicy for GeneralizeAcrossType {
  fn owner_grants(
    &self,
    creator_roles: &[RoleId],
    prior: &[(RoleId, PermissionKind)],
  ) -> BTreeSet<(RoleId, PermissionKind)> {
    let mut grants = CreatorRolesOnly.owner_grants(creator_roles, prior);
    grants.extend(
      prior
        .iter()
        .filter(|(role, _)| creator_roles.contains(role))
        .copied(),
    );
    grants
  }
}

/// Only the creator's roles are granted read/modify/delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreatorRolesOnly;

impl OwnerPolicy for CreatorRolesOnly {
  fn owner_grants(
    &self,
    creator_roles: &[RoleId],
    _prior: &[(RoleId, PermissionKind)],
  ) -> BTreeSet<(RoleId, PermissionKind)> {
    creator_roles
      .iter()
      .flat_map(|role| PermissionKind::OWNER.map(|perm| (*role, perm)))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn creator_roles_get_owner_set() {
    let grants = CreatorRolesOnly.owner_grants(&[1, 2], &[(1, PermissionKind::Admin)]);
    assert_eq!(grants.len(), 6);
    assert!(!grants.contains(&(1, PermissionKind::Admin)));
  }

  #[test]
  fn generalization_extends_prior_grants() {
    let prior = [(1, PermissionKind::Admin), (3, PermissionKind::Read)];
    let grants = GeneralizeAcrossType.owner_grants(&[1, 2], &prior);

    assert!(grants.contains(&(1, PermissionKind::Admin)));
    assert!(grants.contains(&(2, PermissionKind::Delete)));
    // Role 3 is not held by the creator.
    assert!(!grants.iter().any(|(role, _)| *role == 3));
    assert_eq!(grants.len(), 7);
  }
}
