//! The textual filter mini-language.
//!
//! Each field carries a single textual filter value. The grammar is a public
//! wire contract:
//!
//! | Pattern     | Meaning                                              |
//! |-------------|------------------------------------------------------|
//! | `v`         | equals `v`                                           |
//! | `!v`        | not equals `v`                                       |
//! | `(a,b)`     | inclusive range                                      |
//! | `!(a,b)`    | not in range                                         |
//! | `[a,b,c]`   | membership in list                                   |
//! | `![a,b,c]`  | not in list                                          |
//! | `{a,b,c}`   | link fields only: linked to *all* of the ids         |
//! | leading `\` | the rest of the value is a literal                   |
//!
//! Compilation is two stages:
//!   raw &str
//!     └─ parse_expression()  → Expression   (syntax only)
//!          └─ type_clause()  → Clause       (per-field coercion via SearchSchema)
//!               └─ FilterTree { clauses, negated }

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, search::SearchSchema, target::TargetType};

// ─── Typed output ────────────────────────────────────────────────────────────

/// A literal after per-field type coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
  Int(i64),
  Float(f64),
  Text(String),
  Bool(bool),
  DateTime(DateTime<Utc>),
}

/// A single compiled condition on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Clause {
  Equals { value: FilterValue },
  /// Inclusive on both ends.
  Range { low: FilterValue, high: FilterValue },
  In { values: Vec<FilterValue> },
  /// Membership through the link graph: the row is linked from any of the
  /// `link_type` objects in `ids`, or from all of them when `all` is set.
  Linked {
    link_type: TargetType,
    ids:       Vec<i64>,
    all:       bool,
  },
}

/// The compiled filter. `negated` holds clauses whose sense is inverted.
///
/// Both maps are keyed by field name, so a field can carry either a positive
/// or a negated clause in one call, never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterTree {
  pub clauses: BTreeMap<String, Clause>,
  pub negated: BTreeMap<String, Clause>,
}

impl FilterTree {
  pub fn is_empty(&self) -> bool {
    self.clauses.is_empty() && self.negated.is_empty()
  }

  /// Iterate `(field, clause, negated)` over both buckets.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &Clause, bool)> {
    self
      .clauses
      .iter()
      .map(|(f, c)| (f.as_str(), c, false))
      .chain(self.negated.iter().map(|(f, c)| (f.as_str(), c, true)))
  }

  fn insert(&mut self, field: &str, clause: Clause, negated: bool) {
    let (into, from) = if negated {
      (&mut self.negated, &mut self.clauses)
    } else {
      (&mut self.clauses, &mut self.negated)
    };
    from.remove(field);
    into.insert(field.to_owned(), clause);
  }
}

// ─── Syntax ──────────────────────────────────────────────────────────────────

/// The shape of a filter value before any typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
  Scalar(String),
  Range(Vec<String>),
  List(Vec<String>),
  AllOf(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
  pub negated: bool,
  pub shape:   Shape,
}

/// Parse the syntax of one filter value. Never fails; malformed brackets
/// fall through to a scalar literal.
pub fn parse_expression(raw: &str) -> Expression {
  let (negated, rest) = match raw.strip_prefix('!') {
    Some(rest) => (true, rest),
    None => (false, raw),
  };

  if let Some(literal) = rest.strip_prefix('\\') {
    return Expression { negated, shape: Shape::Scalar(literal.to_owned()) };
  }

  let shape = if let Some(inner) = enclosed(rest, '(', ')') {
    Shape::Range(split_tokens(inner))
  } else if let Some(inner) = enclosed(rest, '[', ']') {
    Shape::List(split_tokens(inner))
  } else if let Some(inner) = enclosed(rest, '{', '}') {
    Shape::AllOf(split_tokens(inner))
  } else {
    Shape::Scalar(unquote(rest.trim()).to_owned())
  };

  Expression { negated, shape }
}

fn enclosed(s: &str, open: char, close: char) -> Option<&str> {
  s.strip_prefix(open)?.strip_suffix(close)
}

/// Split on `,` outside single or double quotes, trimming and unquoting each
/// token. An empty (or all-whitespace) body yields no tokens.
fn split_tokens(s: &str) -> Vec<String> {
  if s.trim().is_empty() {
    return Vec::new();
  }

  let mut tokens = Vec::new();
  let mut start = 0usize;
  let mut quote: Option<char> = None;
  for (i, c) in s.char_indices() {
    match (c, quote) {
      ('"' | '\'', None) => quote = Some(c),
      (c, Some(q)) if c == q => quote = None,
      (',', None) => {
        tokens.push(unquote(s[start..i].trim()).to_owned());
        start = i + 1;
      }
      _ => {}
    }
  }
  tokens.push(unquote(s[start..].trim()).to_owned());
  tokens
}

/// Remove one layer of matching surrounding quotes.
fn unquote(s: &str) -> &str {
  for q in ['"', '\''] {
    if s.len() >= 2
      && let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q))
    {
      return inner;
    }
  }
  s
}

// ─── Typing ──────────────────────────────────────────────────────────────────

/// Compile `(field, value)` pairs into a [`FilterTree`].
///
/// A later value for a field replaces an earlier one, positive or negated.
pub fn compile<'a, S>(
  schema: &S,
  filters: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<FilterTree>
where
  S: SearchSchema + ?Sized,
{
  let mut tree = FilterTree::default();
  for (field, raw) in filters {
    let expr = parse_expression(raw);
    let negated = expr.negated;
    let clause = type_clause(schema, field, expr)?;
    tree.insert(field, clause, negated);
  }
  Ok(tree)
}

fn type_clause<S>(schema: &S, field: &str, expr: Expression) -> Result<Clause>
where
  S: SearchSchema + ?Sized,
{
  if let Some(link_type) = schema.link_field(field) {
    return type_link_clause(schema, field, link_type, expr);
  }

  let map = |tok: &String| schema.type_mapping(field, tok);

  match expr.shape {
    Shape::Scalar(tok) => Ok(Clause::Equals { value: map(&tok)? }),
    Shape::Range(tokens) => match tokens.as_slice() {
      [low, high] => Ok(Clause::Range { low: map(low)?, high: map(high)? }),
      _ => Err(Error::validation(
        field,
        &tokens.join(","),
        "a range needs exactly two values",
      )),
    },
    Shape::List(tokens) => Ok(Clause::In {
      values: tokens.iter().map(map).collect::<Result<_>>()?,
    }),
    Shape::AllOf(tokens) => Err(Error::validation(
      field,
      &tokens.join(","),
      "all-of membership is only valid for link fields",
    )),
  }
}

fn type_link_clause<S>(
  schema: &S,
  field: &str,
  link_type: TargetType,
  expr: Expression,
) -> Result<Clause>
where
  S: SearchSchema + ?Sized,
{
  let to_id = |tok: &String| -> Result<i64> {
    match schema.type_mapping(field, tok)? {
      FilterValue::Int(id) => Ok(id),
      _ => Err(Error::validation(field, tok, "link filters take numeric ids")),
    }
  };

  let (tokens, all) = match expr.shape {
    Shape::Scalar(tok) => (vec![tok], false),
    Shape::List(tokens) => (tokens, false),
    Shape::AllOf(tokens) if expr.negated => {
      return Err(Error::validation(
        field,
        &tokens.join(","),
        "all-of membership cannot be negated",
      ));
    }
    Shape::AllOf(tokens) => (tokens, true),
    Shape::Range(tokens) => {
      return Err(Error::validation(
        field,
        &tokens.join(","),
        "ranges are not valid for link fields",
      ));
    }
  };

  Ok(Clause::Linked {
    link_type,
    ids: tokens.iter().map(to_id).collect::<Result<_>>()?,
    all,
  })
}
