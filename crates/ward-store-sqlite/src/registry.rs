//! [`PermissionRegistry`] for [`SqliteStore`]: roles, grants and the access
//! decisions derived from them.

use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter, types::Value};
use ward_core::{
  permission::{Permission, PermissionKind, PermissionMap, PermissionRoles, Role, RoleId},
  policy::OwnerPolicy,
  store::PermissionRegistry,
  target::TargetRef,
};

use crate::{
  Error, Result,
  encode::{PERMISSION_COLUMNS, ROLE_COLUMNS, permission_kind_at, permission_from_row, role_from_row},
  sql::placeholders,
  store::{DefaultPermissions, SqliteStore},
};

// ─── Transaction helpers ─────────────────────────────────────────────────────

fn role_exists_tx(conn: &Connection, role: RoleId) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM roles WHERE role_id = ?1", params![role], |_| Ok(()))
      .optional()?
      .is_some(),
  )
}

/// Owner of `target` if it is a live object.
fn live_owner_tx(conn: &Connection, target: TargetRef) -> rusqlite::Result<Option<String>> {
  conn
    .query_row(
      "SELECT owner FROM objects WHERE target_type = ?1 AND id = ?2 AND deleted = 0",
      params![target.target_type.as_str(), target.id],
      |r| r.get(0),
    )
    .optional()
}

/// Insert-or-read-back against the `UNIQUE` grant key.
pub(crate) fn grant_tx(
  conn: &Connection,
  role: RoleId,
  target: TargetRef,
  perm: PermissionKind,
) -> rusqlite::Result<Permission> {
  let (ty, perm) = (target.target_type.as_str(), perm.as_str());
  conn.execute(
    "INSERT INTO permissions (role_id, target_type, target_id, permission)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT (role_id, target_type, target_id, permission) DO NOTHING",
    params![role, ty, target.id, perm],
  )?;
  conn.query_row(
    &format!(
      "SELECT {PERMISSION_COLUMNS} FROM permissions p
       WHERE p.role_id = ?1 AND p.target_type = ?2 AND p.target_id = ?3 AND p.permission = ?4"
    ),
    params![role, ty, target.id, perm],
    permission_from_row,
  )
}

pub(crate) fn role_ids_for_user_tx(
  conn: &Connection,
  username: &str,
) -> rusqlite::Result<Vec<RoleId>> {
  let mut stmt =
    conn.prepare("SELECT role_id FROM user_roles WHERE username = ?1 ORDER BY role_id")?;
  stmt
    .query_map(params![username], |r| r.get(0))?
    .collect()
}

pub(crate) fn is_admin_tx(conn: &Connection, roles: &[RoleId]) -> rusqlite::Result<bool> {
  if roles.is_empty() {
    return Ok(false);
  }
  let sentinel = TargetRef::admin_sentinel();
  let mut args = vec![
    Value::Text(sentinel.target_type.as_str().to_owned()),
    Value::Integer(sentinel.id),
    Value::Text(PermissionKind::Admin.as_str().to_owned()),
  ];
  args.extend(roles.iter().map(|r| Value::Integer(*r)));
  Ok(
    conn
      .query_row(
        &format!(
          "SELECT 1 FROM permissions
           WHERE target_type = ? AND target_id = ? AND permission = ? AND role_id IN ({})
           LIMIT 1",
          placeholders(roles.len())
        ),
        params_from_iter(args),
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

pub(crate) fn kinds_for_roles_tx(
  conn: &Connection,
  roles: &[RoleId],
  target: TargetRef,
) -> rusqlite::Result<BTreeSet<PermissionKind>> {
  if roles.is_empty() {
    return Ok(BTreeSet::new());
  }
  let mut args = vec![
    Value::Text(target.target_type.as_str().to_owned()),
    Value::Integer(target.id),
  ];
  args.extend(roles.iter().map(|r| Value::Integer(*r)));
  let mut stmt = conn.prepare(&format!(
    "SELECT DISTINCT permission FROM permissions
     WHERE target_type = ? AND target_id = ? AND role_id IN ({})",
    placeholders(roles.len())
  ))?;
  stmt
    .query_map(params_from_iter(args), |r| permission_kind_at(r, 0))?
    .collect()
}

/// Apply the owner policy for a new object created by `username`.
pub(crate) fn owner_permissions_tx(
  conn: &Connection,
  policy: &dyn OwnerPolicy,
  username: &str,
  target: TargetRef,
) -> rusqlite::Result<Vec<Permission>> {
  let roles = role_ids_for_user_tx(conn, username)?;
  if roles.is_empty() {
    tracing::debug!(%username, %target, "creator holds no roles; no owner grants");
    return Ok(Vec::new());
  }

  let mut args = vec![
    Value::Text(target.target_type.as_str().to_owned()),
    Value::Integer(target.id),
  ];
  args.extend(roles.iter().map(|r| Value::Integer(*r)));
  let prior: Vec<(RoleId, PermissionKind)> = {
    let mut stmt = conn.prepare(&format!(
      "SELECT DISTINCT role_id, permission FROM permissions
       WHERE target_type = ? AND target_id != ? AND role_id IN ({})",
      placeholders(roles.len())
    ))?;
    stmt
      .query_map(params_from_iter(args), |r| Ok((r.get(0)?, permission_kind_at(r, 1)?)))?
      .collect::<rusqlite::Result<_>>()?
  };

  policy
    .owner_grants(&roles, &prior)
    .into_iter()
    .map(|(role, perm)| grant_tx(conn, role, target, perm))
    .collect()
}

/// Additive copy of every grant on `src` onto `dst`. Returns the number of
/// grants that were new.
pub(crate) fn copy_permissions_tx(
  conn: &Connection,
  src: TargetRef,
  dst: TargetRef,
) -> rusqlite::Result<usize> {
  conn.execute(
    "INSERT INTO permissions (role_id, target_type, target_id, permission)
     SELECT role_id, ?1, ?2, permission FROM permissions
     WHERE target_type = ?3 AND target_id = ?4
     ON CONFLICT (role_id, target_type, target_id, permission) DO NOTHING",
    params![dst.target_type.as_str(), dst.id, src.target_type.as_str(), src.id],
  )
}

pub(crate) fn delete_permissions_tx(conn: &Connection, target: TargetRef) -> rusqlite::Result<usize> {
  conn.execute(
    "DELETE FROM permissions WHERE target_type = ?1 AND target_id = ?2",
    params![target.target_type.as_str(), target.id],
  )
}

/// Resolve the configured default grants by role name and apply them.
/// Unknown role names are skipped.
pub(crate) fn default_permissions_tx(
  conn: &Connection,
  defaults: &DefaultPermissions,
  target: TargetRef,
) -> rusqlite::Result<usize> {
  let mut written = 0;
  for (perm, names) in defaults {
    for name in names {
      let role: Option<RoleId> = conn
        .query_row("SELECT role_id FROM roles WHERE name = ?1", params![name], |r| r.get(0))
        .optional()?;
      match role {
        Some(role) => {
          grant_tx(conn, role, target, *perm)?;
          written += 1;
        }
        None => tracing::warn!(role = %name, %perm, "skipping default permission for unknown role"),
      }
    }
  }
  Ok(written)
}

/// Grants from an explicit map. Roles are ids, so nothing is resolved.
pub(crate) fn apply_permission_map_tx(
  conn: &Connection,
  map: &PermissionMap,
  target: TargetRef,
) -> rusqlite::Result<usize> {
  let mut written = 0;
  for (perm, roles) in map {
    for role in roles {
      grant_tx(conn, *role, target, *perm)?;
      written += 1;
    }
  }
  Ok(written)
}

// ─── PermissionRegistry impl ─────────────────────────────────────────────────

impl PermissionRegistry for SqliteStore {
  type Error = Error;

  // ── Roles ─────────────────────────────────────────────────────────────────

  async fn create_role(&self, name: &str, description: Option<&str>) -> Result<Role> {
    let name_owned = name.to_owned();
    let description = description.map(str::to_owned);

    let role: Option<Role> = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO roles (name, description) VALUES (?1, ?2)
           ON CONFLICT (name) DO NOTHING",
          params![name_owned, description],
        )?;
        if inserted == 0 {
          return Ok(None);
        }
        Ok(Some(Role {
          id: conn.last_insert_rowid(),
          name: name_owned,
          description,
        }))
      })
      .await?;

    let role = role.ok_or_else(|| Error::RoleExists(name.to_owned()))?;
    tracing::debug!(role = %role.name, id = role.id, "created role");
    Ok(role)
  }

  async fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                &format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.role_id = ?1"),
                params![id],
                role_from_row,
              )
              .optional()?,
          )
        })
        .await?,
    )
  }

  async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
    let name = name.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                &format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.name = ?1"),
                params![name],
                role_from_row,
              )
              .optional()?,
          )
        })
        .await?,
    )
  }

  async fn list_roles(&self) -> Result<Vec<Role>> {
    Ok(
      self
        .conn
        .call(|conn| {
          let mut stmt =
            conn.prepare(&format!("SELECT {ROLE_COLUMNS} FROM roles r ORDER BY r.role_id"))?;
          let rows = stmt
            .query_map([], role_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  async fn assign_role(&self, username: &str, role: RoleId) -> Result<()> {
    let user = username.to_owned();
    let found = self
      .conn
      .call(move |conn| {
        if !role_exists_tx(conn, role)? {
          return Ok(false);
        }
        conn.execute(
          "INSERT INTO user_roles (username, role_id) VALUES (?1, ?2)
           ON CONFLICT (username, role_id) DO NOTHING",
          params![user, role],
        )?;
        Ok(true)
      })
      .await?;

    if !found {
      return Err(Error::RoleNotFound(role.to_string()));
    }
    tracing::debug!(%username, role, "assigned role");
    Ok(())
  }

  async fn roles_for_user(&self, username: &str) -> Result<Vec<Role>> {
    let username = username.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles r
             JOIN user_roles ur ON ur.role_id = r.role_id
             WHERE ur.username = ?1 ORDER BY r.role_id"
          ))?;
          let rows = stmt
            .query_map(params![username], role_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  // ── Grants ────────────────────────────────────────────────────────────────

  async fn grant(&self, role: RoleId, target: TargetRef, perm: PermissionKind) -> Result<Permission> {
    let permission: Option<Permission> = self
      .conn
      .call(move |conn| {
        if !role_exists_tx(conn, role)? {
          return Ok(None);
        }
        Ok(Some(grant_tx(conn, role, target, perm)?))
      })
      .await?;

    let permission = permission.ok_or_else(|| Error::RoleNotFound(role.to_string()))?;
    tracing::debug!(role, %target, %perm, id = permission.id, "granted");
    Ok(permission)
  }

  async fn revoke(
    &self,
    role: RoleId,
    target: TargetRef,
    perm: PermissionKind,
  ) -> Result<Option<Permission>> {
    let removed: Option<Permission> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let existing = tx
          .query_row(
            &format!(
              "SELECT {PERMISSION_COLUMNS} FROM permissions p
               WHERE p.role_id = ?1 AND p.target_type = ?2 AND p.target_id = ?3
                 AND p.permission = ?4"
            ),
            params![role, target.target_type.as_str(), target.id, perm.as_str()],
            permission_from_row,
          )
          .optional()?;
        if let Some(p) = &existing {
          tx.execute("DELETE FROM permissions WHERE permission_id = ?1", params![p.id])?;
        }
        tx.commit()?;
        Ok(existing)
      })
      .await?;

    match &removed {
      Some(_) => tracing::debug!(role, %target, %perm, "revoked"),
      None => tracing::debug!(role, %target, %perm, "nothing to revoke"),
    }
    Ok(removed)
  }

  async fn effective_permissions(
    &self,
    username: &str,
    target: TargetRef,
  ) -> Result<BTreeSet<PermissionKind>> {
    let username = username.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(
            "SELECT DISTINCT p.permission FROM permissions p
             JOIN user_roles ur ON ur.role_id = p.role_id
             WHERE ur.username = ?1 AND p.target_type = ?2 AND p.target_id = ?3",
          )?;
          let kinds = stmt
            .query_map(
              params![username, target.target_type.as_str(), target.id],
              |r| permission_kind_at(r, 0),
            )?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
          Ok(kinds)
        })
        .await?,
    )
  }

  async fn permissions_for_roles(
    &self,
    roles: &[RoleId],
    target: TargetRef,
  ) -> Result<BTreeSet<PermissionKind>> {
    let roles = roles.to_vec();
    Ok(
      self
        .conn
        .call(move |conn| Ok(kinds_for_roles_tx(conn, &roles, target)?))
        .await?,
    )
  }

  async fn is_admin(&self, roles: &[RoleId]) -> Result<bool> {
    let roles = roles.to_vec();
    Ok(self.conn.call(move |conn| Ok(is_admin_tx(conn, &roles)?)).await?)
  }

  async fn is_user_admin(&self, username: &str) -> Result<bool> {
    let username = username.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          let roles = role_ids_for_user_tx(conn, &username)?;
          Ok(is_admin_tx(conn, &roles)?)
        })
        .await?,
    )
  }

  async fn scope_for_user(&self, username: &str) -> Result<Option<Vec<RoleId>>> {
    let username = username.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          let roles = role_ids_for_user_tx(conn, &username)?;
          if is_admin_tx(conn, &roles)? {
            return Ok(None);
          }
          Ok(Some(roles))
        })
        .await?,
    )
  }

  async fn create_owner_permissions(
    &self,
    username: &str,
    target: TargetRef,
  ) -> Result<Vec<Permission>> {
    let user = username.to_owned();
    let policy = self.owner_policy.clone();

    let grants = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let grants = owner_permissions_tx(&tx, policy.as_ref(), &user, target)?;
        tx.commit()?;
        Ok(grants)
      })
      .await?;

    tracing::debug!(%username, %target, count = grants.len(), "wrote owner grants");
    Ok(grants)
  }

  async fn get_permission_roles(&self, target: TargetRef) -> Result<PermissionRoles> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(&format!(
            "SELECT p.permission, {ROLE_COLUMNS} FROM permissions p
             JOIN roles r ON r.role_id = p.role_id
             WHERE p.target_type = ?1 AND p.target_id = ?2
             ORDER BY r.role_id"
          ))?;
          let mut map = PermissionRoles::new();
          let rows = stmt.query_map(params![target.target_type.as_str(), target.id], |r| {
            Ok((
              permission_kind_at(r, 0)?,
              Role {
                id:          r.get(1)?,
                name:        r.get(2)?,
                description: r.get(3)?,
              },
            ))
          })?;
          for row in rows {
            let (perm, role) = row?;
            map.entry(perm).or_insert_with(Vec::new).push(role);
          }
          Ok(map)
        })
        .await?,
    )
  }

  async fn copy_object_permissions(&self, src: TargetRef, dst: TargetRef) -> Result<usize> {
    let copied = self
      .conn
      .call(move |conn| Ok(copy_permissions_tx(conn, src, dst)?))
      .await?;
    tracing::debug!(%src, %dst, copied, "copied grants");
    Ok(copied)
  }

  async fn filter_search_hits(
    &self,
    hits: &[TargetRef],
    roles: &[RoleId],
  ) -> Result<Option<Vec<TargetRef>>> {
    if hits.is_empty() {
      return Ok(None);
    }
    let hits = hits.to_vec();
    let roles = roles.to_vec();

    let visible = self
      .conn
      .call(move |conn| {
        let admin = is_admin_tx(conn, &roles)?;
        let mut visible = Vec::with_capacity(hits.len());
        for hit in hits {
          if live_owner_tx(conn, hit)?.is_none() {
            continue;
          }
          if admin
            || hit.target_type.is_whitelisted()
            || kinds_for_roles_tx(conn, &roles, hit)?.contains(&PermissionKind::Read)
          {
            visible.push(hit);
          }
        }
        Ok(visible)
      })
      .await?;
    Ok(Some(visible))
  }

  async fn require_permission(
    &self,
    username: &str,
    roles: &[RoleId],
    target: TargetRef,
    perm: PermissionKind,
  ) -> Result<()> {
    let user = username.to_owned();
    let roles = roles.to_vec();

    let allowed: Option<bool> = self
      .conn
      .call(move |conn| {
        let Some(owner) = live_owner_tx(conn, target)? else {
          return Ok(None);
        };
        if target.target_type.is_whitelisted() && perm == PermissionKind::Read {
          return Ok(Some(true));
        }
        if owner == user || is_admin_tx(conn, &roles)? {
          return Ok(Some(true));
        }
        Ok(Some(kinds_for_roles_tx(conn, &roles, target)?.contains(&perm)))
      })
      .await?;

    let Some(allowed) = allowed else {
      tracing::debug!(%username, %target, %perm, "permission check on missing object");
      return Err(Error::NotFound(target));
    };
    if !allowed {
      tracing::debug!(%username, %target, %perm, "permission denied");
      return Err(Error::denied(target, perm));
    }
    Ok(())
  }
}
