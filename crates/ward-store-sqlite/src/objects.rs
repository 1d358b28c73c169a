//! [`ObjectStore`] for [`SqliteStore`]: permission-scoped queries and audited
//! mutations over the shared `objects` table.

use chrono::{DateTime, SubsecRound as _, Utc};
use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter, types::Value};
use ward_core::{
  audit::{AUDIT_DATA_VERSION, Audit, AuditAction, AuditContext},
  link::NewLink,
  permission::{PermissionKind, PermissionMap, RoleId},
  record::{NewRecord, Record},
  store::{BatchOutcome, ObjectQuery, ObjectStore, Page},
  target::{TargetRef, TargetType},
};

use crate::{
  Error, Result,
  appearance::{
    copy_appearances_tx, delete_container_appearances_tx, delete_value_appearances_tx,
    move_appearances_tx,
  },
  encode::{
    AUDIT_COLUMNS, OBJECT_COLUMNS, audit_from_row, encode_dt, json_text, now, record_from_row,
  },
  graph::{delete_links_for_object_tx, insert_link_tx, repoint_links_tx},
  registry::{
    apply_permission_map_tx, copy_permissions_tx, default_permissions_tx, delete_permissions_tx,
    owner_permissions_tx,
  },
  sql::{Fragment, object_query, placeholders, scope_sql},
  store::SqliteStore,
};

/// Link context recorded on `src → dst` by a promotion.
pub const PROMOTION_CONTEXT: &str = "promotion";

// ─── Transaction helpers ─────────────────────────────────────────────────────

/// Insert a new row and return it as stored.
fn insert_record_tx(
  conn: &Connection,
  input: &NewRecord,
  parent: Option<TargetRef>,
  now: DateTime<Utc>,
) -> rusqlite::Result<Record> {
  let when_date = input.when_date.map_or(now, |w| w.trunc_subsecs(6));
  conn.execute(
    "INSERT INTO objects
       (target_type, owner, created, modified, when_date, parent_type, parent_id, data)
     VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6, ?7)",
    params![
      input.target_type.as_str(),
      input.owner,
      encode_dt(now),
      encode_dt(when_date),
      parent.map(|p| p.target_type.as_str()),
      parent.map(|p| p.id),
      json_text(&input.data)?,
    ],
  )?;
  Ok(Record {
    target: TargetRef::new(input.target_type, conn.last_insert_rowid()),
    owner: input.owner.clone(),
    created: now,
    modified: now,
    when_date,
    parent,
    data: input.data.clone(),
  })
}

/// A live row.
fn fetch_record_tx(conn: &Connection, target: TargetRef) -> rusqlite::Result<Option<Record>> {
  conn
    .query_row(
      &format!(
        "SELECT {OBJECT_COLUMNS} FROM objects o
         WHERE o.target_type = ?1 AND o.id = ?2 AND o.deleted = 0"
      ),
      params![target.target_type.as_str(), target.id],
      record_from_row,
    )
    .optional()
}

/// A row in any state.
fn fetch_any_record_tx(conn: &Connection, target: TargetRef) -> rusqlite::Result<Option<Record>> {
  conn
    .query_row(
      &format!("SELECT {OBJECT_COLUMNS} FROM objects o WHERE o.target_type = ?1 AND o.id = ?2"),
      params![target.target_type.as_str(), target.id],
      record_from_row,
    )
    .optional()
}

/// Write one audit row carrying a snapshot of `record`.
fn write_audit_tx(
  conn: &Connection,
  ctx: &AuditContext,
  action: AuditAction,
  record: &Record,
  now: DateTime<Utc>,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO audits
       (when_date, username, what, thing_type, thing_id,
        src_ip, user_agent, audit_data_ver, audit_data)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    params![
      encode_dt(now),
      ctx.username,
      action.as_str(),
      record.target.target_type.as_str(),
      record.target.id,
      ctx.src_ip,
      ctx.user_agent,
      AUDIT_DATA_VERSION,
      json_text(record)?,
    ],
  )?;
  Ok(())
}

fn audit_tx(
  conn: &Connection,
  ctx: Option<&AuditContext>,
  action: AuditAction,
  record: &Record,
  now: DateTime<Utc>,
) -> rusqlite::Result<()> {
  match ctx {
    Some(ctx) => write_audit_tx(conn, ctx, action, record, now),
    None => Ok(()),
  }
}

/// How a soft-deleted row is brought back.
enum Restore {
  Restored(Record),
  NotDeleted,
  DeletedByOther,
}

/// Undo the soft delete of `target`. With `keep_ids = false` the row is
/// re-inserted under a fresh id and every reference to the old id (grants,
/// links, appearances, audits and children) follows it. Stored fields,
/// `modified` included, come back unchanged.
fn restore_tx(
  conn: &Connection,
  target: TargetRef,
  keep_ids: bool,
  by_user: Option<&str>,
  audit: Option<&AuditContext>,
  now: DateTime<Utc>,
) -> rusqlite::Result<Restore> {
  let (ty, id) = (target.target_type.as_str(), target.id);
  let deleted_by: Option<Option<String>> = conn
    .query_row(
      "SELECT deleted_by FROM objects WHERE target_type = ?1 AND id = ?2 AND deleted = 1",
      params![ty, id],
      |r| r.get(0),
    )
    .optional()?;
  let Some(deleted_by) = deleted_by else {
    return Ok(Restore::NotDeleted);
  };
  if let Some(user) = by_user
    && deleted_by.as_deref() != Some(user)
  {
    return Ok(Restore::DeletedByOther);
  }

  let live = if keep_ids {
    conn.execute(
      "UPDATE objects SET deleted = 0, deleted_by = NULL, deleted_at = NULL
       WHERE target_type = ?1 AND id = ?2",
      params![ty, id],
    )?;
    target
  } else {
    conn.execute(
      "INSERT INTO objects
         (target_type, owner, created, modified, when_date, parent_type, parent_id, data)
       SELECT target_type, owner, created, modified, when_date, parent_type, parent_id, data
       FROM objects WHERE target_type = ?1 AND id = ?2",
      params![ty, id],
    )?;
    let fresh = TargetRef::new(target.target_type, conn.last_insert_rowid());

    conn.execute(
      "UPDATE permissions SET target_id = ?3 WHERE target_type = ?1 AND target_id = ?2",
      params![ty, id, fresh.id],
    )?;
    repoint_links_tx(conn, target, fresh)?;
    move_appearances_tx(conn, target, fresh)?;
    conn.execute(
      "UPDATE audits SET thing_id = ?3 WHERE thing_type = ?1 AND thing_id = ?2",
      params![ty, id, fresh.id],
    )?;
    conn.execute(
      "UPDATE objects SET parent_id = ?3 WHERE parent_type = ?1 AND parent_id = ?2",
      params![ty, id, fresh.id],
    )?;
    conn.execute("DELETE FROM objects WHERE target_type = ?1 AND id = ?2", params![ty, id])?;
    fresh
  };

  let record = fetch_record_tx(conn, live)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
  audit_tx(conn, audit, AuditAction::Undelete, &record, now)?;
  Ok(Restore::Restored(record))
}

fn restored(target: TargetRef, outcome: Restore) -> Result<Record> {
  match outcome {
    Restore::Restored(record) => Ok(record),
    Restore::NotDeleted => Err(Error::NotFound(target)),
    Restore::DeletedByOther => Err(Error::denied(target, PermissionKind::Delete)),
  }
}

/// The scoped single-object lookup used by `get_with_roles`.
fn scoped_get_sql(target: TargetRef, roles: Option<&[RoleId]>) -> Fragment {
  let mut sql = format!(
    "SELECT {OBJECT_COLUMNS} FROM objects o
     WHERE o.target_type = ? AND o.id = ? AND o.deleted = 0"
  );
  let mut params = vec![
    Value::Text(target.target_type.as_str().to_owned()),
    Value::Integer(target.id),
  ];
  if let Some(scope) = scope_sql(target.target_type, roles) {
    sql.push_str(" AND ");
    sql.push_str(&scope.sql);
    params.extend(scope.params);
  }
  Fragment { sql, params }
}

// ─── ObjectStore impl ────────────────────────────────────────────────────────

impl ObjectStore for SqliteStore {
  type Error = Error;

  // ── Queries ───────────────────────────────────────────────────────────────

  async fn query_with_filters(&self, query: &ObjectQuery) -> Result<Page<Record>> {
    let built = object_query(query)?;
    Ok(
      self
        .conn
        .call(move |conn| {
          let total: i64 =
            conn.query_row(&built.count_sql, params_from_iter(&built.params), |r| r.get(0))?;
          let mut stmt = conn.prepare(&built.select_sql)?;
          let items = stmt
            .query_map(
              params_from_iter(built.params.iter().chain(&built.page_params)),
              record_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(Page { items, total: total as u64 })
        })
        .await?,
    )
  }

  async fn query_objects_with_roles(
    &self,
    target_type: TargetType,
    roles: Option<&[RoleId]>,
  ) -> Result<Vec<Record>> {
    let query = ObjectQuery::new(target_type, roles.map(<[RoleId]>::to_vec));
    Ok(self.query_with_filters(&query).await?.items)
  }

  async fn get_with_roles(
    &self,
    target: TargetRef,
    roles: Option<&[RoleId]>,
  ) -> Result<Option<Record>> {
    let Fragment { sql, params } = scoped_get_sql(target, roles);
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(&sql, params_from_iter(params), record_from_row)
              .optional()?,
          )
        })
        .await?,
    )
  }

  async fn get(&self, target: TargetRef) -> Result<Option<Record>> {
    Ok(
      self
        .conn
        .call(move |conn| Ok(fetch_record_tx(conn, target)?))
        .await?,
    )
  }

  async fn get_multi(&self, target_type: TargetType, ids: &[i64]) -> Result<Vec<Record>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let mut params = vec![Value::Text(target_type.as_str().to_owned())];
    params.extend(ids.iter().map(|id| Value::Integer(*id)));
    let sql = format!(
      "SELECT {OBJECT_COLUMNS} FROM objects o
       WHERE o.target_type = ? AND o.deleted = 0 AND o.id IN ({})
       ORDER BY o.id",
      placeholders(ids.len())
    );

    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(&sql)?;
          let rows = stmt
            .query_map(params_from_iter(params), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  // ── Creation ──────────────────────────────────────────────────────────────

  async fn create(&self, input: NewRecord, audit: Option<&AuditContext>) -> Result<Record> {
    let audit = audit.cloned();
    let now = now();

    let record = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let record = insert_record_tx(&tx, &input, None, now)?;
        audit_tx(&tx, audit.as_ref(), AuditAction::Create, &record, now)?;
        tx.commit()?;
        Ok(record)
      })
      .await?;

    tracing::info!(object = %record.target, owner = %record.owner, "created object");
    Ok(record)
  }

  async fn create_with_permissions(
    &self,
    input: NewRecord,
    perms: Option<PermissionMap>,
    audit: Option<&AuditContext>,
  ) -> Result<Record> {
    let audit = audit.cloned();
    let defaults = self.default_permissions.clone();
    let now = now();

    let (record, grants) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let record = insert_record_tx(&tx, &input, None, now)?;
        let grants = match &perms {
          Some(map) => apply_permission_map_tx(&tx, map, record.target)?,
          None => default_permissions_tx(&tx, &defaults, record.target)?,
        };
        audit_tx(&tx, audit.as_ref(), AuditAction::Create, &record, now)?;
        tx.commit()?;
        Ok((record, grants))
      })
      .await?;

    tracing::info!(object = %record.target, grants, "created object with permissions");
    Ok(record)
  }

  async fn create_with_owner(
    &self,
    input: NewRecord,
    audit: Option<&AuditContext>,
  ) -> Result<Record> {
    let audit = audit.cloned();
    let policy = self.owner_policy.clone();
    let now = now();

    let (record, grants) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let record = insert_record_tx(&tx, &input, None, now)?;
        let grants = owner_permissions_tx(&tx, policy.as_ref(), &record.owner, record.target)?;
        audit_tx(&tx, audit.as_ref(), AuditAction::Create, &record, now)?;
        tx.commit()?;
        Ok((record, grants.len()))
      })
      .await?;

    tracing::info!(object = %record.target, owner = %record.owner, grants, "created owned object");
    Ok(record)
  }

  async fn create_in_object(
    &self,
    input: NewRecord,
    parent: TargetRef,
    audit: Option<&AuditContext>,
  ) -> Result<Record> {
    let audit = audit.cloned();
    let now = now();

    let record: Option<Record> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if fetch_record_tx(&tx, parent)?.is_none() {
          return Ok(None);
        }
        let record = insert_record_tx(&tx, &input, Some(parent), now)?;
        copy_permissions_tx(&tx, parent, record.target)?;
        audit_tx(&tx, audit.as_ref(), AuditAction::Create, &record, now)?;
        tx.commit()?;
        Ok(Some(record))
      })
      .await?;

    let record = record.ok_or(Error::NotFound(parent))?;
    tracing::info!(object = %record.target, %parent, "created child object");
    Ok(record)
  }

  async fn promote(
    &self,
    src: TargetRef,
    input: NewRecord,
    audit: Option<&AuditContext>,
  ) -> Result<Record> {
    let audit = audit.cloned();
    let now = now();

    let record: Option<Record> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(source) = fetch_record_tx(&tx, src)? else {
          return Ok(None);
        };
        let record = insert_record_tx(&tx, &input, None, now)?;
        copy_permissions_tx(&tx, src, record.target)?;
        insert_link_tx(
          &tx,
          &NewLink::new(src, record.target).with_context(PROMOTION_CONTEXT),
          now,
        )?;
        copy_appearances_tx(&tx, src, record.target, now)?;
        audit_tx(&tx, audit.as_ref(), AuditAction::Promote, &source, now)?;
        audit_tx(&tx, audit.as_ref(), AuditAction::Create, &record, now)?;
        tx.commit()?;
        Ok(Some(record))
      })
      .await?;

    let record = record.ok_or(Error::NotFound(src))?;
    tracing::info!(%src, dst = %record.target, "promoted object");
    Ok(record)
  }

  // ── Mutation ──────────────────────────────────────────────────────────────

  async fn update(
    &self,
    target: TargetRef,
    patch: serde_json::Value,
    audit: Option<&AuditContext>,
  ) -> Result<Record> {
    let serde_json::Value::Object(patch) = patch else {
      return Err(Error::InvalidPatch);
    };
    let audit = audit.cloned();
    let now = now();

    let record: Option<Record> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(mut record) = fetch_record_tx(&tx, target)? else {
          return Ok(None);
        };
        match record.data.as_object_mut() {
          Some(data) => data.extend(patch),
          None => record.data = serde_json::Value::Object(patch),
        }
        record.modified = now;
        tx.execute(
          "UPDATE objects SET data = ?3, modified = ?4 WHERE target_type = ?1 AND id = ?2",
          params![
            target.target_type.as_str(),
            target.id,
            json_text(&record.data)?,
            encode_dt(now),
          ],
        )?;
        audit_tx(&tx, audit.as_ref(), AuditAction::Update, &record, now)?;
        tx.commit()?;
        Ok(Some(record))
      })
      .await?;

    let record = record.ok_or(Error::NotFound(target))?;
    tracing::debug!(%target, "updated object");
    Ok(record)
  }

  async fn remove(
    &self,
    target: TargetRef,
    by_user: &str,
    audit: Option<&AuditContext>,
  ) -> Result<Option<Record>> {
    let audit = audit.cloned();
    let user = by_user.to_owned();
    let now = now();

    let removed: Option<Record> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(record) = fetch_record_tx(&tx, target)? else {
          return Ok(None);
        };
        tx.execute(
          "UPDATE objects SET deleted = 1, deleted_by = ?3, deleted_at = ?4
           WHERE target_type = ?1 AND id = ?2",
          params![target.target_type.as_str(), target.id, user, encode_dt(now)],
        )?;
        audit_tx(&tx, audit.as_ref(), AuditAction::Delete, &record, now)?;
        tx.commit()?;
        Ok(Some(record))
      })
      .await?;

    match &removed {
      Some(_) => tracing::info!(%target, by = %by_user, "removed object"),
      None => tracing::debug!(%target, "nothing to remove"),
    }
    Ok(removed)
  }

  async fn remove_many(
    &self,
    targets: &[TargetRef],
    by_user: &str,
    audit: Option<&AuditContext>,
  ) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    for &target in targets {
      match self.remove(target, by_user, audit).await {
        Ok(Some(_)) => outcome.succeeded.push(target),
        Ok(None) => outcome.not_found.push(target),
        Err(e) => {
          tracing::warn!(%target, error = %e, "batch remove failed for item");
          outcome.failed.push((target, e.to_string()));
        }
      }
    }
    Ok(outcome)
  }

  async fn purge(&self, target: TargetRef, audit: Option<&AuditContext>) -> Result<Option<Record>> {
    let audit = audit.cloned();
    let now = now();

    let purged: Option<Record> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(record) = fetch_any_record_tx(&tx, target)? else {
          return Ok(None);
        };
        delete_permissions_tx(&tx, target)?;
        delete_links_for_object_tx(&tx, target)?;
        delete_container_appearances_tx(&tx, target)?;
        delete_value_appearances_tx(&tx, target)?;
        tx.execute(
          "DELETE FROM objects WHERE target_type = ?1 AND id = ?2",
          params![target.target_type.as_str(), target.id],
        )?;
        audit_tx(&tx, audit.as_ref(), AuditAction::Purge, &record, now)?;
        tx.commit()?;
        Ok(Some(record))
      })
      .await?;

    if purged.is_some() {
      tracing::info!(%target, "purged object");
    }
    Ok(purged)
  }

  async fn undelete(
    &self,
    target: TargetRef,
    keep_ids: bool,
    by_user: Option<&str>,
    audit: Option<&AuditContext>,
  ) -> Result<Record> {
    let audit = audit.cloned();
    let user = by_user.map(str::to_owned);
    let now = now();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let outcome = restore_tx(&tx, target, keep_ids, user.as_deref(), audit.as_ref(), now)?;
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    let record = restored(target, outcome)?;
    tracing::info!(%target, restored = %record.target, "undeleted object");
    Ok(record)
  }

  async fn undelete_latest(
    &self,
    target_type: TargetType,
    keep_ids: bool,
    by_user: Option<&str>,
    audit: Option<&AuditContext>,
  ) -> Result<Record> {
    let audit = audit.cloned();
    let user = by_user.map(str::to_owned);
    let now = now();

    let outcome: Option<(TargetRef, Restore)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let latest: Option<i64> = tx
          .query_row(
            "SELECT id FROM objects
             WHERE target_type = ?1 AND deleted = 1
               AND (?2 IS NULL OR deleted_by = ?2)
             ORDER BY deleted_at DESC, id DESC LIMIT 1",
            params![target_type.as_str(), user],
            |r| r.get(0),
          )
          .optional()?;
        let Some(id) = latest else {
          return Ok(None);
        };
        let target = TargetRef::new(target_type, id);
        let outcome = restore_tx(&tx, target, keep_ids, user.as_deref(), audit.as_ref(), now)?;
        tx.commit()?;
        Ok(Some((target, outcome)))
      })
      .await?;

    let (target, outcome) = outcome.ok_or(Error::NothingDeleted(target_type))?;
    let record = restored(target, outcome)?;
    tracing::info!(%target, restored = %record.target, "undeleted latest object");
    Ok(record)
  }

  async fn get_history(&self, target: TargetRef) -> Result<Vec<Audit>> {
    let own = format!(
      "SELECT {AUDIT_COLUMNS} FROM audits au WHERE au.thing_type = ?1 AND au.thing_id = ?2"
    );
    // Containers also show their children arriving and leaving.
    let sql = if target.target_type.is_container() {
      format!(
        "{own}
         UNION ALL
         SELECT {AUDIT_COLUMNS} FROM audits au
         JOIN objects o ON o.target_type = au.thing_type AND o.id = au.thing_id
         WHERE o.parent_type = ?1 AND o.parent_id = ?2
           AND au.what IN ('{create}', '{delete}')
         ORDER BY 2, 1",
        create = AuditAction::Create.as_str(),
        delete = AuditAction::Delete.as_str(),
      )
    } else {
      format!("{own} ORDER BY au.when_date, au.audit_id")
    };

    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(&sql)?;
          let rows = stmt
            .query_map(params![target.target_type.as_str(), target.id], audit_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }
}
