//! Pure SQL builders for the query executor.
//!
//! Nothing here touches a connection; every builder returns SQL text plus the
//! positional (`?`) parameters it needs, in order. That keeps the filter
//! translation, the link-membership subquery and the permission scoping
//! testable on their own.

use std::collections::BTreeSet;

use rusqlite::types::Value;
use ward_core::{
  filter::{Clause, FilterTree, FilterValue},
  permission::{PermissionKind, RoleId},
  store::{ObjectQuery, Sort, TargetFilter},
  target::TargetType,
};

use crate::{
  Error, Result,
  encode::{OBJECT_COLUMNS, filter_value},
};

// ─── Fragments ───────────────────────────────────────────────────────────────

/// A boolean SQL expression and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
  pub sql:    String,
  pub params: Vec<Value>,
}

impl Fragment {
  fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
    Self { sql: sql.into(), params }
  }

  fn constant(truth: bool) -> Self {
    Self::new(if truth { "1" } else { "0" }, Vec::new())
  }
}

/// `?, ?, ?` for `n` parameters.
pub fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

/// Accumulates `AND`ed conditions.
#[derive(Debug, Default)]
struct Conditions {
  sql:    Vec<String>,
  params: Vec<Value>,
}

impl Conditions {
  fn push(&mut self, fragment: Fragment) {
    self.sql.push(fragment.sql);
    self.params.extend(fragment.params);
  }

  fn where_clause(&self) -> String {
    if self.sql.is_empty() {
      String::new()
    } else {
      format!("WHERE {}", self.sql.join(" AND "))
    }
  }
}

/// A count query and a page query sharing one `WHERE`.
#[derive(Debug, Clone)]
pub struct PagedQuery {
  pub count_sql:   String,
  pub select_sql:  String,
  /// Parameters of the shared `WHERE`.
  pub params:      Vec<Value>,
  /// `LIMIT ? OFFSET ?` values, appended after `params` for `select_sql`.
  pub page_params: [Value; 2],
}

// ─── Fields ──────────────────────────────────────────────────────────────────

fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_base_column(field: &str) -> bool {
  matches!(field, "id" | "owner" | "created" | "modified" | "when_date")
}

/// The SQL expression for a filter or sort field on the `objects o` table.
/// Anything that is not a base column is looked up inside the JSON `data`.
pub fn column_expr(field: &str) -> Result<String> {
  match field {
    base if is_base_column(base) => Ok(format!("o.{base}")),
    other if is_identifier(other) => Ok(format!("json_extract(o.data, '$.{other}')")),
    other => Err(Error::InvalidField(other.to_owned())),
  }
}

/// Like [`column_expr`], but JSON fields compared against text literals are
/// cast to text. `json_extract` returns JSON numbers as SQLite numbers, which
/// never equal a text literal; an undeclared numeric field would otherwise
/// match nothing.
fn comparison_expr<'a>(
  field: &str,
  mut values: impl Iterator<Item = &'a FilterValue>,
) -> Result<String> {
  let col = column_expr(field)?;
  if !is_base_column(field) && values.all(|v| matches!(v, FilterValue::Text(_))) {
    return Ok(format!("CAST({col} AS TEXT)"));
  }
  Ok(col)
}

pub fn order_by(sort: &Sort) -> Result<String> {
  let dir = if sort.descending { "DESC" } else { "ASC" };
  let col = column_expr(&sort.field)?;
  if sort.field == "id" {
    return Ok(format!("ORDER BY {col} {dir}"));
  }
  Ok(format!("ORDER BY {col} {dir}, o.id {dir}"))
}

// ─── Link membership ─────────────────────────────────────────────────────────

/// Ids of `target_type` objects linked from `link_type` objects in `ids`.
///
/// With `all`, an object qualifies only if the number of distinct matched
/// ids linked to it equals the number of distinct ids asked for. An empty
/// id set selects nothing.
pub fn linked_ids_subquery(
  link_type: TargetType,
  target_type: TargetType,
  ids: &[i64],
  all: bool,
) -> Fragment {
  let ids: BTreeSet<i64> = ids.iter().copied().collect();
  if ids.is_empty() {
    return Fragment::new("SELECT NULL WHERE 0", Vec::new());
  }

  let mut sql = format!(
    "SELECT l.v1_id FROM links l \
     WHERE l.v0_type = ? AND l.v1_type = ? AND l.v0_id IN ({})",
    placeholders(ids.len())
  );
  let mut params = vec![
    Value::Text(link_type.as_str().to_owned()),
    Value::Text(target_type.as_str().to_owned()),
  ];
  params.extend(ids.iter().map(|id| Value::Integer(*id)));

  if all {
    sql.push_str(" GROUP BY l.v1_id HAVING COUNT(DISTINCT l.v0_id) = ?");
    params.push(Value::Integer(ids.len() as i64));
  }

  Fragment::new(sql, params)
}

// ─── Clauses ─────────────────────────────────────────────────────────────────

/// Translate one compiled clause. Negated comparisons treat a missing
/// (`NULL`) field as "not matching the value", so such rows are kept.
pub fn clause_sql(
  target_type: TargetType,
  field: &str,
  clause: &Clause,
  negated: bool,
) -> Result<Fragment> {
  let fragment = match clause {
    Clause::Linked { link_type, ids, all } => {
      let sub = linked_ids_subquery(*link_type, target_type, ids, *all);
      let op = if negated { "NOT IN" } else { "IN" };
      Fragment::new(format!("o.id {op} ({})", sub.sql), sub.params)
    }
    Clause::Equals { value } => {
      let col = comparison_expr(field, std::iter::once(value))?;
      let op = if negated { "IS NOT" } else { "=" };
      Fragment::new(format!("{col} {op} ?"), vec![filter_value(value)])
    }
    Clause::Range { low, high } => {
      let col = column_expr(field)?;
      let sql = if negated {
        format!("({col} IS NULL OR {col} NOT BETWEEN ? AND ?)")
      } else {
        format!("{col} BETWEEN ? AND ?")
      };
      Fragment::new(sql, vec![filter_value(low), filter_value(high)])
    }
    Clause::In { values } if values.is_empty() => Fragment::constant(negated),
    Clause::In { values } => {
      let col = comparison_expr(field, values.iter())?;
      let marks = placeholders(values.len());
      let sql = if negated {
        format!("({col} IS NULL OR {col} NOT IN ({marks}))")
      } else {
        format!("{col} IN ({marks})")
      };
      Fragment::new(sql, values.iter().map(filter_value).collect())
    }
  };
  Ok(fragment)
}

// ─── Scoping ─────────────────────────────────────────────────────────────────

/// The permission-scoping condition for rows of `target_type` on
/// `objects o`. `None` means no scoping applies: either a system call
/// (`roles` is `None`) or a whitelisted type. An empty role set can read
/// nothing.
pub fn scope_sql(target_type: TargetType, roles: Option<&[RoleId]>) -> Option<Fragment> {
  let roles = roles?;
  if target_type.is_whitelisted() {
    return None;
  }
  if roles.is_empty() {
    return Some(Fragment::constant(false));
  }

  let mut params = vec![Value::Text(PermissionKind::Read.as_str().to_owned())];
  params.extend(roles.iter().map(|r| Value::Integer(*r)));
  Some(Fragment::new(
    format!(
      "EXISTS (SELECT 1 FROM permissions p \
       WHERE p.target_type = o.target_type AND p.target_id = o.id \
       AND p.permission = ? AND p.role_id IN ({}))",
      placeholders(roles.len())
    ),
    params,
  ))
}

// ─── Whole queries ───────────────────────────────────────────────────────────

fn base_conditions(target_type: TargetType) -> Conditions {
  let mut conds = Conditions::default();
  conds.push(Fragment::new(
    "o.target_type = ?",
    vec![Value::Text(target_type.as_str().to_owned())],
  ));
  conds.push(Fragment::new("o.deleted = 0", Vec::new()));
  conds
}

fn paged(
  conds: Conditions,
  sort: &Sort,
  skip: usize,
  limit: Option<usize>,
) -> Result<PagedQuery> {
  let where_clause = conds.where_clause();
  let order = order_by(sort)?;
  Ok(PagedQuery {
    count_sql:   format!("SELECT COUNT(*) FROM objects o {where_clause}"),
    select_sql:  format!(
      "SELECT {OBJECT_COLUMNS} FROM objects o {where_clause} {order} LIMIT ? OFFSET ?"
    ),
    params:      conds.params,
    page_params: [
      Value::Integer(limit.map_or(-1, |l| l as i64)),
      Value::Integer(skip as i64),
    ],
  })
}

/// Build the executor query: base table, every filter clause, then scoping.
pub fn object_query(query: &ObjectQuery) -> Result<PagedQuery> {
  let mut conds = base_conditions(query.target_type);
  push_filter(&mut conds, query.target_type, &query.filter)?;
  if let Some(scope) = scope_sql(query.target_type, query.roles.as_deref()) {
    conds.push(scope);
  }
  paged(conds, &query.sort, query.skip, query.limit)
}

fn push_filter(
  conds: &mut Conditions,
  target_type: TargetType,
  filter: &FilterTree,
) -> Result<()> {
  for (field, clause, negated) in filter.iter() {
    conds.push(clause_sql(target_type, field, clause, negated)?);
  }
  Ok(())
}

/// Build the link-graph target filter query.
pub fn target_filter_query(query: &TargetFilter) -> Result<PagedQuery> {
  let mut conds = base_conditions(query.target_type);
  let sub = linked_ids_subquery(query.link_type, query.target_type, &query.ids, query.all);
  conds.push(Fragment::new(format!("o.id IN ({})", sub.sql), sub.params));
  paged(conds, &query.sort, query.skip, query.limit)
}
