//! [`AppearanceIndex`] for [`SqliteStore`].

use chrono::{DateTime, SubsecRound as _, Utc};
use rusqlite::{Connection, params};
use strum::IntoEnumIterator as _;
use ward_core::{
  appearance::{Appearance, AppearanceBucket, AppearanceBuckets, AppearancePage, NewAppearance},
  store::AppearanceIndex,
  target::TargetRef,
};

use crate::{
  Error, Result,
  encode::{APPEARANCE_COLUMNS, appearance_from_row, encode_dt, now},
  store::SqliteStore,
};

// ─── Transaction helpers ─────────────────────────────────────────────────────

/// Re-derive every appearance in container `src` for container `dst`,
/// stamped `now`.
pub(crate) fn copy_appearances_tx(
  conn: &Connection,
  src: TargetRef,
  dst: TargetRef,
  now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
  conn.execute(
    "INSERT INTO appearances (when_date, target_type, target_id, value_type, value_id, value_str)
     SELECT ?1, ?2, ?3, value_type, value_id, value_str FROM appearances
     WHERE target_type = ?4 AND target_id = ?5",
    params![encode_dt(now), dst.target_type.as_str(), dst.id, src.target_type.as_str(), src.id],
  )
}

pub(crate) fn delete_container_appearances_tx(
  conn: &Connection,
  container: TargetRef,
) -> rusqlite::Result<usize> {
  conn.execute(
    "DELETE FROM appearances WHERE target_type = ?1 AND target_id = ?2",
    params![container.target_type.as_str(), container.id],
  )
}

pub(crate) fn delete_value_appearances_tx(
  conn: &Connection,
  value: TargetRef,
) -> rusqlite::Result<usize> {
  conn.execute(
    "DELETE FROM appearances WHERE value_type = ?1 AND value_id = ?2",
    params![value.target_type.as_str(), value.id],
  )
}

/// Rewrite every row that mentions `old`, as container or as value.
pub(crate) fn move_appearances_tx(
  conn: &Connection,
  old: TargetRef,
  new: TargetRef,
) -> rusqlite::Result<usize> {
  let (new_ty, old_ty) = (new.target_type.as_str(), old.target_type.as_str());
  let containers = conn.execute(
    "UPDATE appearances SET target_type = ?1, target_id = ?2
     WHERE target_type = ?3 AND target_id = ?4",
    params![new_ty, new.id, old_ty, old.id],
  )?;
  let values = conn.execute(
    "UPDATE appearances SET value_type = ?1, value_id = ?2
     WHERE value_type = ?3 AND value_id = ?4",
    params![new_ty, new.id, old_ty, old.id],
  )?;
  Ok(containers + values)
}

// ─── AppearanceIndex impl ────────────────────────────────────────────────────

impl AppearanceIndex for SqliteStore {
  type Error = Error;

  async fn record_appearance(&self, input: NewAppearance) -> Result<Appearance> {
    let when_date = input.when_date.map_or_else(now, |w| w.trunc_subsecs(6));
    let appearance = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO appearances
             (when_date, target_type, target_id, value_type, value_id, value_str)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![
            encode_dt(when_date),
            input.container.target_type.as_str(),
            input.container.id,
            input.value.target.target_type.as_str(),
            input.value.target.id,
            input.value.text,
          ],
        )?;
        Ok(Appearance {
          id: conn.last_insert_rowid(),
          when_date,
          container: input.container,
          value: input.value,
        })
      })
      .await?;
    tracing::debug!(
      container = %appearance.container,
      value = %appearance.value.target,
      "recorded appearance"
    );
    Ok(appearance)
  }

  async fn appearances(
    &self,
    value: TargetRef,
    skip: usize,
    limit: usize,
  ) -> Result<AppearanceBuckets> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut count = conn.prepare(
            "SELECT COUNT(*) FROM appearances
             WHERE value_type = ?1 AND value_id = ?2 AND target_type = ?3",
          )?;
          let mut page = conn.prepare(&format!(
            "SELECT {APPEARANCE_COLUMNS} FROM appearances a
             WHERE a.value_type = ?1 AND a.value_id = ?2 AND a.target_type = ?3
             ORDER BY a.when_date DESC, a.appearance_id DESC
             LIMIT ?4 OFFSET ?5"
          ))?;

          let mut buckets = AppearanceBuckets::new();
          for bucket in AppearanceBucket::iter() {
            let ty = bucket.target_type().as_str();
            let total: i64 =
              count.query_row(params![value.target_type.as_str(), value.id, ty], |r| r.get(0))?;
            let items = page
              .query_map(
                params![value.target_type.as_str(), value.id, ty, limit as i64, skip as i64],
                appearance_from_row,
              )?
              .collect::<rusqlite::Result<Vec<_>>>()?;
            buckets.insert(bucket, AppearancePage { total: total as u64, items });
          }
          Ok(buckets)
        })
        .await?,
    )
  }

  async fn delete_appearances_for_container(&self, container: TargetRef) -> Result<usize> {
    let removed = self
      .conn
      .call(move |conn| Ok(delete_container_appearances_tx(conn, container)?))
      .await?;
    tracing::debug!(%container, removed, "deleted container appearances");
    Ok(removed)
  }

  async fn delete_appearances_for_value(&self, value: TargetRef) -> Result<usize> {
    let removed = self
      .conn
      .call(move |conn| Ok(delete_value_appearances_tx(conn, value)?))
      .await?;
    tracing::debug!(%value, removed, "deleted value appearances");
    Ok(removed)
  }

  async fn copy_appearances(&self, src: TargetRef, dst: TargetRef) -> Result<usize> {
    let now = now();
    let copied = self
      .conn
      .call(move |conn| Ok(copy_appearances_tx(conn, src, dst, now)?))
      .await?;
    tracing::debug!(%src, %dst, copied, "copied appearances");
    Ok(copied)
  }
}
