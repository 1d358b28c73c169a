//! [`LinkGraph`] for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter};
use ward_core::{
  link::{Link, NewLink},
  record::Record,
  store::{LinkGraph, Page, TargetFilter},
  target::{TargetRef, TargetType},
};

use crate::{
  Error, Result,
  encode::{LINK_COLUMNS, encode_dt, link_from_row, now, record_from_row},
  sql::target_filter_query,
  store::SqliteStore,
};

// ─── Transaction helpers ─────────────────────────────────────────────────────

pub(crate) fn fetch_link_tx(
  conn: &Connection,
  v0: TargetRef,
  v1: TargetRef,
) -> rusqlite::Result<Option<Link>> {
  conn
    .query_row(
      &format!(
        "SELECT {LINK_COLUMNS} FROM links l
         WHERE l.v0_type = ?1 AND l.v0_id = ?2 AND l.v1_type = ?3 AND l.v1_id = ?4"
      ),
      params![v0.target_type.as_str(), v0.id, v1.target_type.as_str(), v1.id],
      link_from_row,
    )
    .optional()
}

/// Insert an edge. `None` when `v0 → v1` already exists.
pub(crate) fn insert_link_tx(
  conn: &Connection,
  link: &NewLink,
  now: DateTime<Utc>,
) -> rusqlite::Result<Option<Link>> {
  let inserted = conn.execute(
    "INSERT INTO links (v0_type, v0_id, v1_type, v1_id, weight, context, created)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT (v0_type, v0_id, v1_type, v1_id) DO NOTHING",
    params![
      link.v0.target_type.as_str(),
      link.v0.id,
      link.v1.target_type.as_str(),
      link.v1.id,
      link.weight,
      link.context,
      encode_dt(now),
    ],
  )?;
  if inserted == 0 {
    return Ok(None);
  }
  Ok(Some(Link {
    id:      conn.last_insert_rowid(),
    v0:      link.v0,
    v1:      link.v1,
    weight:  link.weight,
    context: link.context.clone(),
    created: now,
  }))
}

fn get_or_insert_link_tx(
  conn: &Connection,
  link: &NewLink,
  now: DateTime<Utc>,
) -> rusqlite::Result<Link> {
  match insert_link_tx(conn, link, now)? {
    Some(created) => Ok(created),
    None => fetch_link_tx(conn, link.v0, link.v1)?.ok_or(rusqlite::Error::QueryReturnedNoRows),
  }
}

pub(crate) fn delete_links_for_object_tx(
  conn: &Connection,
  target: TargetRef,
) -> rusqlite::Result<usize> {
  conn.execute(
    "DELETE FROM links
     WHERE (v0_type = ?1 AND v0_id = ?2) OR (v1_type = ?1 AND v1_id = ?2)",
    params![target.target_type.as_str(), target.id],
  )
}

/// Move every edge endpoint at `old` to `new`. Edges that collide with an
/// existing edge are left on `old` by `UPDATE OR IGNORE` and then dropped.
pub(crate) fn repoint_links_tx(
  conn: &Connection,
  old: TargetRef,
  new: TargetRef,
) -> rusqlite::Result<usize> {
  let (new_ty, old_ty) = (new.target_type.as_str(), old.target_type.as_str());
  let moved_v0 = conn.execute(
    "UPDATE OR IGNORE links SET v0_type = ?1, v0_id = ?2 WHERE v0_type = ?3 AND v0_id = ?4",
    params![new_ty, new.id, old_ty, old.id],
  )?;
  let moved_v1 = conn.execute(
    "UPDATE OR IGNORE links SET v1_type = ?1, v1_id = ?2 WHERE v1_type = ?3 AND v1_id = ?4",
    params![new_ty, new.id, old_ty, old.id],
  )?;
  delete_links_for_object_tx(conn, old)?;
  Ok(moved_v0 + moved_v1)
}

// ─── LinkGraph impl ──────────────────────────────────────────────────────────

impl LinkGraph for SqliteStore {
  type Error = Error;

  async fn create_link(&self, link: NewLink) -> Result<Link> {
    let (v0, v1) = (link.v0, link.v1);
    let now = now();
    let created = self
      .conn
      .call(move |conn| Ok(insert_link_tx(conn, &link, now)?))
      .await?
      .ok_or(Error::LinkExists { v0, v1 })?;
    tracing::debug!(%v0, %v1, id = created.id, "created link");
    Ok(created)
  }

  async fn get_or_create_link(&self, link: NewLink) -> Result<Link> {
    let now = now();
    Ok(
      self
        .conn
        .call(move |conn| Ok(get_or_insert_link_tx(conn, &link, now)?))
        .await?,
    )
  }

  async fn assign(
    &self,
    v0: TargetRef,
    v1: TargetRef,
    context: Option<&str>,
  ) -> Result<(Link, Link)> {
    let mut forward = NewLink::new(v0, v1);
    forward.context = context.map(str::to_owned);
    let now = now();

    let pair = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let there = get_or_insert_link_tx(&tx, &forward, now)?;
        let back = get_or_insert_link_tx(&tx, &forward.mirrored(), now)?;
        tx.commit()?;
        Ok((there, back))
      })
      .await?;
    tracing::debug!(%v0, %v1, "assigned");
    Ok(pair)
  }

  async fn target_filter(&self, query: &TargetFilter) -> Result<Page<Record>> {
    let built = target_filter_query(query)?;
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

  async fn delete_links(
    &self,
    v0: TargetRef,
    v1: TargetRef,
    bidirectional: bool,
  ) -> Result<Option<Vec<Link>>> {
    let removed: Vec<Link> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut pairs = vec![(v0, v1)];
        if bidirectional {
          pairs.push((v1, v0));
        }
        let mut removed = Vec::new();
        for (a, b) in pairs {
          if let Some(link) = fetch_link_tx(&tx, a, b)? {
            tx.execute("DELETE FROM links WHERE link_id = ?1", params![link.id])?;
            removed.push(link);
          }
        }
        tx.commit()?;
        Ok(removed)
      })
      .await?;

    if removed.is_empty() {
      return Ok(None);
    }
    tracing::debug!(%v0, %v1, count = removed.len(), "deleted links");
    Ok(Some(removed))
  }

  async fn delete_links_for_object(&self, target: TargetRef) -> Result<usize> {
    let removed = self
      .conn
      .call(move |conn| Ok(delete_links_for_object_tx(conn, target)?))
      .await?;
    tracing::debug!(%target, removed, "deleted links for object");
    Ok(removed)
  }

  async fn find_all_links(&self, target_type: TargetType, id: i64) -> Result<Vec<Link>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(&format!(
            "SELECT {LINK_COLUMNS} FROM links l
             WHERE (l.v0_type = ?1 AND l.v0_id = ?2) OR (l.v1_type = ?1 AND l.v1_id = ?2)
             ORDER BY l.link_id"
          ))?;
          let links = stmt
            .query_map(params![target_type.as_str(), id], link_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(links)
        })
        .await?,
    )
  }

  async fn repoint_links(&self, old: TargetRef, new: TargetRef) -> Result<usize> {
    let moved = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let moved = repoint_links_tx(&tx, old, new)?;
        tx.commit()?;
        Ok(moved)
      })
      .await?;
    tracing::debug!(%old, %new, moved, "repointed links");
    Ok(moved)
  }
}
