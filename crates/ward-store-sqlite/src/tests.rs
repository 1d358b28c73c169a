//! Integration tests for `SqliteStore` against an in-memory database.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use serde_json::json;
use ward_core::{
  appearance::{AppearanceBucket, AppearanceValue, NewAppearance},
  audit::AuditContext,
  filter::compile,
  link::NewLink,
  permission::{PermissionKind, PermissionMap, RoleId},
  policy::CreatorRolesOnly,
  record::NewRecord,
  search::BaseSchema,
  store::{
    AppearanceIndex, LinkGraph, ObjectQuery, ObjectStore, PermissionRegistry, Sort, TargetFilter,
  },
  target::{TargetRef, TargetType},
};

use crate::{DefaultPermissions, Error, PROMOTION_CONTEXT, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

/// A store with `user` holding a fresh role named after them.
async fn store_with_user(user: &str) -> (SqliteStore, RoleId) {
  let s = store().await;
  let role = s.create_role(user, None).await.unwrap();
  s.assign_role(user, role.id).await.unwrap();
  (s, role.id)
}

fn alert(owner: &str) -> NewRecord { NewRecord::new(TargetType::Alert, owner) }

fn ids(records: &[ward_core::record::Record]) -> Vec<i64> {
  records.iter().map(|r| r.id()).collect()
}

// ─── Roles ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_role_twice_is_an_error() {
  let s = store().await;
  s.create_role("analysts", Some("tier 1")).await.unwrap();
  let err = s.create_role("analysts", None).await.unwrap_err();
  assert!(matches!(err, Error::RoleExists(name) if name == "analysts"));
}

#[tokio::test]
async fn assign_role_is_idempotent() {
  let (s, role) = store_with_user("alice").await;
  s.assign_role("alice", role).await.unwrap();

  let roles = s.roles_for_user("alice").await.unwrap();
  assert_eq!(roles.len(), 1);
  assert_eq!(roles[0].name, "alice");
  assert_eq!(s.get_role_by_name("alice").await.unwrap().map(|r| r.id), Some(role));
}

#[tokio::test]
async fn assign_unknown_role_fails() {
  let s = store().await;
  assert!(matches!(s.assign_role("bob", 99).await, Err(Error::RoleNotFound(_))));
}

// ─── Grants ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn grant_is_idempotent() {
  let (s, role) = store_with_user("alice").await;
  let obj = s.create(alert("alice"), None).await.unwrap().target;

  let first = s.grant(role, obj, PermissionKind::Read).await.unwrap();
  let second = s.grant(role, obj, PermissionKind::Read).await.unwrap();
  assert_eq!(first, second);

  let roles = s.get_permission_roles(obj).await.unwrap();
  assert_eq!(roles[&PermissionKind::Read].len(), 1);
  assert_eq!(
    s.effective_permissions("alice", obj).await.unwrap(),
    BTreeSet::from([PermissionKind::Read])
  );
}

#[tokio::test]
async fn revoke_round_trips() {
  let (s, role) = store_with_user("alice").await;
  let obj = s.create(alert("alice"), None).await.unwrap().target;
  let before = s.effective_permissions("alice", obj).await.unwrap();

  let granted = s.grant(role, obj, PermissionKind::Modify).await.unwrap();
  let revoked = s.revoke(role, obj, PermissionKind::Modify).await.unwrap();
  assert_eq!(revoked, Some(granted));
  assert_eq!(s.effective_permissions("alice", obj).await.unwrap(), before);

  assert_eq!(s.revoke(role, obj, PermissionKind::Modify).await.unwrap(), None);
}

#[tokio::test]
async fn admin_sentinel_makes_holders_admin() {
  let (s, role) = store_with_user("root").await;
  assert!(!s.is_admin(&[role]).await.unwrap());
  assert_eq!(s.scope_for_user("root").await.unwrap(), Some(vec![role]));

  s.grant_admin(role).await.unwrap();
  assert!(s.is_admin(&[role]).await.unwrap());
  assert!(s.is_user_admin("root").await.unwrap());
  assert_eq!(s.scope_for_user("root").await.unwrap(), None);
}

#[tokio::test]
async fn copy_object_permissions_reproduces_the_role_map() {
  let s = store().await;
  let a_role = s.create_role("a", None).await.unwrap().id;
  let b_role = s.create_role("b", None).await.unwrap().id;
  let src = s.create(alert("alice"), None).await.unwrap().target;
  let dst = s.create(alert("alice"), None).await.unwrap().target;

  s.grant(a_role, src, PermissionKind::Read).await.unwrap();
  s.grant(a_role, src, PermissionKind::Modify).await.unwrap();
  s.grant(b_role, src, PermissionKind::Read).await.unwrap();

  assert_eq!(s.copy_object_permissions(src, dst).await.unwrap(), 3);
  assert_eq!(
    s.get_permission_roles(src).await.unwrap(),
    s.get_permission_roles(dst).await.unwrap()
  );
  // Nothing new the second time.
  assert_eq!(s.copy_object_permissions(src, dst).await.unwrap(), 0);
}

#[tokio::test]
async fn owner_policy_generalises_across_the_type() {
  let s = store().await;
  let own = s.create_role("alice", None).await.unwrap().id;
  let team = s.create_role("team", None).await.unwrap().id;
  let other = s.create_role("other", None).await.unwrap().id;
  s.assign_role("alice", own).await.unwrap();
  s.assign_role("alice", team).await.unwrap();

  let earlier = s.create(alert("bob"), None).await.unwrap().target;
  s.grant(team, earlier, PermissionKind::Admin).await.unwrap();
  s.grant(other, earlier, PermissionKind::Read).await.unwrap();

  let fresh = s.create_with_owner(alert("alice"), None).await.unwrap().target;
  let map = s.get_permission_roles(fresh).await.unwrap();

  let holders = |perm: PermissionKind| -> Vec<RoleId> {
    map.get(&perm).map(|rs| rs.iter().map(|r| r.id).collect()).unwrap_or_default()
  };
  assert_eq!(holders(PermissionKind::Read), vec![own, team]);
  assert_eq!(holders(PermissionKind::Delete), vec![own, team]);
  // Carried over from the team's grant on the earlier alert.
  assert_eq!(holders(PermissionKind::Admin), vec![team]);
}

#[tokio::test]
async fn creator_roles_only_policy_skips_generalisation() {
  let (s, role) = store_with_user("alice").await;
  let s = s.with_owner_policy(CreatorRolesOnly);

  let earlier = s.create(alert("alice"), None).await.unwrap().target;
  s.grant(role, earlier, PermissionKind::Admin).await.unwrap();

  let fresh = s.create_with_owner(alert("alice"), None).await.unwrap().target;
  let perms = s.effective_permissions("alice", fresh).await.unwrap();
  assert_eq!(perms, BTreeSet::from(PermissionKind::OWNER));
}

#[tokio::test]
async fn default_permissions_skip_unknown_roles() {
  let s = store().await;
  let readers = s.create_role("readers", None).await.unwrap().id;
  let defaults = DefaultPermissions::from([(
    PermissionKind::Read,
    vec!["readers".to_owned(), "ghosts".to_owned()],
  )]);
  let s = s.with_default_permissions(defaults);

  let obj = s.create_with_permissions(alert("alice"), None, None).await.unwrap().target;
  let map = s.get_permission_roles(obj).await.unwrap();
  assert_eq!(map.len(), 1);
  assert_eq!(map[&PermissionKind::Read][0].id, readers);
}

#[tokio::test]
async fn explicit_permission_map_is_applied() {
  let (s, role) = store_with_user("alice").await;
  let perms = PermissionMap::from([
    (PermissionKind::Read, vec![role]),
    (PermissionKind::Delete, vec![role]),
  ]);
  let obj = s
    .create_with_permissions(alert("alice"), Some(perms), None)
    .await
    .unwrap()
    .target;
  assert_eq!(
    s.permissions_for_roles(&[role], obj).await.unwrap(),
    BTreeSet::from([PermissionKind::Read, PermissionKind::Delete])
  );
}

#[tokio::test]
async fn require_permission_checks_each_route() {
  let s = store().await;
  let analyst = s.create_role("analyst", None).await.unwrap().id;
  let admin = s.create_role("admin", None).await.unwrap().id;
  s.grant_admin(admin).await.unwrap();

  let obj = s.create(alert("owner"), None).await.unwrap().target;
  let tag = s.create(NewRecord::new(TargetType::Tag, "owner"), None).await.unwrap().target;

  let denied = s
    .require_permission("eve", &[analyst], obj, PermissionKind::Modify)
    .await;
  assert!(matches!(
    denied,
    Err(Error::PermissionDenied { perm: PermissionKind::Modify, .. })
  ));

  s.require_permission("owner", &[], obj, PermissionKind::Delete).await.unwrap();
  s.require_permission("root", &[admin], obj, PermissionKind::Modify).await.unwrap();
  s.require_permission("eve", &[], tag, PermissionKind::Read).await.unwrap();
  assert!(s.require_permission("eve", &[], tag, PermissionKind::Modify).await.is_err());

  s.grant(analyst, obj, PermissionKind::Modify).await.unwrap();
  s.require_permission("eve", &[analyst], obj, PermissionKind::Modify).await.unwrap();
}

#[tokio::test]
async fn filter_search_hits_keeps_readable_hits() {
  let (s, role) = store_with_user("alice").await;
  assert_eq!(s.filter_search_hits(&[], &[role]).await.unwrap(), None);

  let readable = s.create(alert("x"), None).await.unwrap().target;
  let hidden = s.create(alert("x"), None).await.unwrap().target;
  let tag = s.create(NewRecord::new(TargetType::Tag, "x"), None).await.unwrap().target;
  s.grant(role, readable, PermissionKind::Read).await.unwrap();

  let visible = s
    .filter_search_hits(&[readable, hidden, tag], &[role])
    .await
    .unwrap();
  assert_eq!(visible, Some(vec![readable, tag]));
}

#[tokio::test]
async fn deleted_objects_fail_search_filtering_and_guards() {
  let (s, role) = store_with_user("alice").await;
  let admin = s.create_role("admin", None).await.unwrap().id;
  s.grant_admin(admin).await.unwrap();

  let gone = s.create(alert("x"), None).await.unwrap().target;
  let gone_tag = s.create(NewRecord::new(TargetType::Tag, "x"), None).await.unwrap().target;
  s.grant(role, gone, PermissionKind::Read).await.unwrap();
  s.remove(gone, "x", None).await.unwrap();
  s.remove(gone_tag, "x", None).await.unwrap();

  assert_eq!(
    s.filter_search_hits(&[gone, gone_tag], &[role]).await.unwrap(),
    Some(vec![])
  );
  assert_eq!(s.filter_search_hits(&[gone], &[admin]).await.unwrap(), Some(vec![]));

  for roles in [vec![role], vec![admin]] {
    assert!(matches!(
      s.require_permission("eve", &roles, gone, PermissionKind::Read).await,
      Err(Error::NotFound(t)) if t == gone
    ));
  }
  assert!(matches!(
    s.require_permission("x", &[], gone_tag, PermissionKind::Read).await,
    Err(Error::NotFound(_))
  ));
}

// ─── Scoped queries ──────────────────────────────────────────────────────────

#[tokio::test]
async fn scoping_is_monotonic_in_the_role_set() {
  let s = store().await;
  let r1 = s.create_role("r1", None).await.unwrap().id;
  let r2 = s.create_role("r2", None).await.unwrap().id;

  let a = s.create(alert("x"), None).await.unwrap().target;
  let b = s.create(alert("x"), None).await.unwrap().target;
  s.create(alert("x"), None).await.unwrap();
  s.grant(r1, a, PermissionKind::Read).await.unwrap();
  s.grant(r2, b, PermissionKind::Read).await.unwrap();
  s.grant(r2, a, PermissionKind::Modify).await.unwrap();

  let narrow = s.query_objects_with_roles(TargetType::Alert, Some(&[r1])).await.unwrap();
  let wide = s.query_objects_with_roles(TargetType::Alert, Some(&[r1, r2])).await.unwrap();
  let none = s.query_objects_with_roles(TargetType::Alert, Some(&[])).await.unwrap();
  let system = s.query_objects_with_roles(TargetType::Alert, None).await.unwrap();

  assert_eq!(ids(&narrow), vec![a.id]);
  assert_eq!(ids(&wide), vec![b.id, a.id]);
  assert!(none.is_empty());
  assert_eq!(system.len(), 3);

  assert!(s.get_with_roles(b, Some(&[r1])).await.unwrap().is_none());
  assert!(s.get_with_roles(b, Some(&[r1, r2])).await.unwrap().is_some());
}

#[tokio::test]
async fn whitelisted_types_are_never_scoped() {
  let s = store().await;
  let tag = s.create(NewRecord::new(TargetType::Tag, "x"), None).await.unwrap().target;

  let tags = s.query_objects_with_roles(TargetType::Tag, Some(&[])).await.unwrap();
  assert_eq!(ids(&tags), vec![tag.id]);
  assert!(s.get_with_roles(tag, Some(&[])).await.unwrap().is_some());
}

async fn five_alerts(s: &SqliteStore) -> Vec<i64> {
  let mut out = Vec::new();
  for day in 1..=5 {
    let when = Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap();
    let rec = s
      .create(
        alert("x").with_when_date(when).with_data(json!({ "status": "open", "score": day })),
        None,
      )
      .await
      .unwrap();
    out.push(rec.id());
  }
  out
}

async fn filtered(s: &SqliteStore, filters: &[(&str, &str)]) -> Vec<i64> {
  let schema = BaseSchema::for_type(TargetType::Alert).field("score", ward_core::search::FieldKind::Int);
  let mut query = ObjectQuery::new(TargetType::Alert, None);
  query.filter = compile(&schema, filters.iter().copied()).unwrap();
  query.sort = Sort::asc("id");
  ids(&s.query_with_filters(&query).await.unwrap().items)
}

#[tokio::test]
async fn filter_grammar_against_rows() {
  let s = store().await;
  let all = five_alerts(&s).await;
  let (one, three, five) = (all[0], all[2], all[4]);
  let list = format!("[{one},{three},{five}]");
  let not_list = format!("!{list}");
  let not_five = format!("!{five}");

  let without_five: Vec<i64> = all.iter().copied().filter(|id| *id != five).collect();
  assert_eq!(filtered(&s, &[("id", not_five.as_str())]).await, without_five);
  assert_eq!(filtered(&s, &[("id", list.as_str())]).await, vec![one, three, five]);
  assert_eq!(filtered(&s, &[("id", not_list.as_str())]).await, vec![all[1], all[3]]);
  assert_eq!(
    filtered(&s, &[("when_date", "('2024-01-01','2024-01-02')")]).await,
    vec![one]
  );
  assert_eq!(filtered(&s, &[("score", "!(2,4)")]).await, vec![one, five]);
  assert_eq!(filtered(&s, &[("status", "OPEN")]).await.len(), 5);
  assert!(filtered(&s, &[("id", "[]")]).await.is_empty());
  assert_eq!(filtered(&s, &[("id", "![]")]).await.len(), 5);
}

#[tokio::test]
async fn undeclared_numeric_fields_match_by_value() {
  let s = store().await;
  let all = five_alerts(&s).await;

  let schema = BaseSchema::for_type(TargetType::Alert);
  let mut query = ObjectQuery::new(TargetType::Alert, None);
  query.sort = Sort::asc("id");

  query.filter = compile(&schema, [("score", "3")]).unwrap();
  assert_eq!(ids(&s.query_with_filters(&query).await.unwrap().items), vec![all[2]]);

  query.filter = compile(&schema, [("score", "[1,5]")]).unwrap();
  assert_eq!(
    ids(&s.query_with_filters(&query).await.unwrap().items),
    vec![all[0], all[4]]
  );
}

#[test]
fn filter_validation_errors_surface() {
  let schema = BaseSchema::for_type(TargetType::Alert);
  let err = compile(&schema, [("id", "abc")]).unwrap_err();
  assert!(matches!(err, ward_core::Error::Validation { .. }));
}

#[tokio::test]
async fn total_is_counted_before_paging() {
  let s = store().await;
  five_alerts(&s).await;

  let mut query = ObjectQuery::new(TargetType::Alert, None);
  query.skip = 1;
  query.limit = Some(2);
  let page = s.query_with_filters(&query).await.unwrap();
  assert_eq!(page.total, 5);
  assert_eq!(page.items.len(), 2);
  // Default sort is newest id first.
  assert!(page.items[0].id() > page.items[1].id());
}

#[tokio::test]
async fn unknown_sort_field_is_rejected() {
  let s = store().await;
  let mut query = ObjectQuery::new(TargetType::Alert, None);
  query.sort = Sort::asc("bad field");
  assert!(matches!(
    s.query_with_filters(&query).await,
    Err(Error::InvalidField(_))
  ));
}

// ─── Link graph ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn tag_filters_any_and_all() {
  let s = store().await;
  let t1 = s.create(NewRecord::new(TargetType::Tag, "x"), None).await.unwrap().target;
  let t2 = s.create(NewRecord::new(TargetType::Tag, "x"), None).await.unwrap().target;
  let x = s.create(alert("x"), None).await.unwrap().target;
  let y = s.create(alert("x"), None).await.unwrap().target;
  s.assign(t1, x, Some("tagged")).await.unwrap();
  s.assign(t2, x, Some("tagged")).await.unwrap();
  s.assign(t1, y, Some("tagged")).await.unwrap();

  let mut query = TargetFilter {
    link_type:   TargetType::Tag,
    ids:         vec![t1.id, t2.id],
    target_type: TargetType::Alert,
    all:         true,
    sort:        Sort::asc("id"),
    skip:        0,
    limit:       None,
  };
  let all = s.target_filter(&query).await.unwrap();
  assert_eq!(ids(&all.items), vec![x.id]);
  assert_eq!(all.total, 1);

  query.all = false;
  let any = s.target_filter(&query).await.unwrap();
  assert_eq!(ids(&any.items), vec![x.id, y.id]);

  // The same through the filter grammar.
  let schema = BaseSchema::for_type(TargetType::Alert);
  let all_of = format!("{{{},{}}}", t1.id, t2.id);
  let mut q = ObjectQuery::new(TargetType::Alert, None);
  q.filter = compile(&schema, [("tag", all_of.as_str())]).unwrap();
  assert_eq!(ids(&s.query_with_filters(&q).await.unwrap().items), vec![x.id]);
}

#[tokio::test]
async fn target_filter_hides_deleted_objects() {
  let s = store().await;
  let t = s.create(NewRecord::new(TargetType::Tag, "x"), None).await.unwrap().target;
  let x = s.create(alert("x"), None).await.unwrap().target;
  s.assign(t, x, None).await.unwrap();
  s.remove(x, "x", None).await.unwrap();

  let page = s
    .target_filter(&TargetFilter {
      link_type:   TargetType::Tag,
      ids:         vec![t.id],
      target_type: TargetType::Alert,
      all:         false,
      sort:        Sort::default(),
      skip:        0,
      limit:       None,
    })
    .await
    .unwrap();
  assert_eq!(page.total, 0);
}

#[tokio::test]
async fn create_link_rejects_duplicates() {
  let s = store().await;
  let a = TargetRef::new(TargetType::Event, 1);
  let b = TargetRef::new(TargetType::Alert, 2);

  let link = s.create_link(NewLink::new(a, b)).await.unwrap();
  assert!(matches!(
    s.create_link(NewLink::new(a, b)).await,
    Err(Error::LinkExists { .. })
  ));
  assert_eq!(s.get_or_create_link(NewLink::new(a, b)).await.unwrap(), link);
}

#[tokio::test]
async fn delete_links_directionality() {
  let s = store().await;
  let a = TargetRef::new(TargetType::Tag, 1);
  let b = TargetRef::new(TargetType::Alert, 2);

  s.assign(a, b, None).await.unwrap();
  let one_way = s.delete_links(a, b, false).await.unwrap().unwrap();
  assert_eq!(one_way.len(), 1);
  assert_eq!(s.find_all_links(TargetType::Alert, 2).await.unwrap().len(), 1);

  s.assign(a, b, None).await.unwrap();
  let both = s.unassign(a, b).await.unwrap().unwrap();
  assert_eq!(both.len(), 2);
  assert!(s.delete_links(a, b, true).await.unwrap().is_none());
}

#[tokio::test]
async fn repoint_links_drops_duplicates() {
  let s = store().await;
  let old = TargetRef::new(TargetType::Tag, 1);
  let new = TargetRef::new(TargetType::Tag, 2);
  let x = TargetRef::new(TargetType::Alert, 10);
  let y = TargetRef::new(TargetType::Alert, 11);

  s.assign(old, x, None).await.unwrap();
  s.assign(old, y, None).await.unwrap();
  s.assign(new, x, None).await.unwrap();

  assert_eq!(s.repoint_links(old, new).await.unwrap(), 2);
  assert!(s.find_all_links(TargetType::Tag, 1).await.unwrap().is_empty());
  assert_eq!(s.find_all_links(TargetType::Tag, 2).await.unwrap().len(), 4);
  assert_eq!(s.delete_links_for_object(new).await.unwrap(), 4);
}

// ─── Appearances ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn appearances_are_bucketed_newest_first() {
  let s = store().await;
  let entity = TargetRef::new(TargetType::Entity, 7);
  for (container, day) in [
    (TargetRef::new(TargetType::Alert, 1), 1),
    (TargetRef::new(TargetType::Alert, 2), 3),
    (TargetRef::new(TargetType::Event, 3), 2),
    (TargetRef::new(TargetType::Entry, 4), 2),
  ] {
    s.record_appearance(NewAppearance {
      when_date: Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
      container,
      value: AppearanceValue { target: entity, text: Some("10.0.0.1".into()) },
    })
    .await
    .unwrap();
  }

  let buckets = s.appearances(entity, 0, 1).await.unwrap();
  assert_eq!(buckets.len(), 9);
  let alerts = &buckets[&AppearanceBucket::Alert];
  assert_eq!(alerts.total, 2);
  assert_eq!(alerts.items.len(), 1);
  assert_eq!(alerts.items[0].container.id, 2);
  assert_eq!(buckets[&AppearanceBucket::Event].total, 1);
  assert_eq!(buckets[&AppearanceBucket::Intel].total, 0);

  assert_eq!(s.delete_appearances_for_value(entity).await.unwrap(), 4);
}

// ─── Mutations ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_merges_and_audits() {
  let s = store().await;
  let ctx = AuditContext::new("alice");
  let rec = s
    .create(alert("alice").with_data(json!({ "subject": "a", "status": "new" })), Some(&ctx))
    .await
    .unwrap();

  let updated = s
    .update(rec.target, json!({ "status": "open" }), Some(&ctx))
    .await
    .unwrap();
  assert_eq!(updated.data, json!({ "subject": "a", "status": "open" }));
  assert!(updated.modified >= rec.modified);

  let history = s.get_history(rec.target).await.unwrap();
  let whats: Vec<&str> = history.iter().map(|a| a.what.as_str()).collect();
  assert_eq!(whats, vec!["create", "update"]);
  assert_eq!(history[1].audit_data["data"]["status"], "open");

  assert!(matches!(
    s.update(rec.target, json!([1]), None).await,
    Err(Error::InvalidPatch)
  ));
  assert!(matches!(
    s.update(TargetRef::new(TargetType::Alert, 999), json!({}), None).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn soft_delete_hides_and_owner_undeletes() {
  let s = store().await;
  let rec = s.create(alert("alice"), None).await.unwrap();

  assert!(s.remove(rec.target, "alice", None).await.unwrap().is_some());
  assert!(s.remove(rec.target, "alice", None).await.unwrap().is_none());
  assert!(s.get(rec.target).await.unwrap().is_none());
  assert!(s.query_objects_with_roles(TargetType::Alert, None).await.unwrap().is_empty());

  let back = s.undelete(rec.target, true, Some("alice"), None).await.unwrap();
  assert_eq!(back, rec);
  assert!(s.get(rec.target).await.unwrap().is_some());
}

#[tokio::test]
async fn undelete_by_another_user_is_denied() {
  let s = store().await;
  let rec = s.create(alert("alice"), None).await.unwrap();
  s.remove(rec.target, "alice", None).await.unwrap();

  assert!(matches!(
    s.undelete(rec.target, true, Some("mallory"), None).await,
    Err(Error::PermissionDenied { .. })
  ));
  // Admins pass no user.
  s.undelete(rec.target, true, None, None).await.unwrap();
  assert!(matches!(
    s.undelete(rec.target, true, None, None).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn undelete_under_a_fresh_id_moves_references() {
  let (s, role) = store_with_user("alice").await;
  let ctx = AuditContext::new("alice");
  let rec = s.create_with_owner(alert("alice"), Some(&ctx)).await.unwrap();
  let tag = TargetRef::new(TargetType::Tag, 1);
  s.assign(tag, rec.target, None).await.unwrap();
  s.remove(rec.target, "alice", Some(&ctx)).await.unwrap();

  let back = s.undelete(rec.target, false, Some("alice"), Some(&ctx)).await.unwrap();
  assert_ne!(back.id(), rec.id());
  assert_eq!(back.owner, "alice");
  assert_eq!((back.created, back.modified), (rec.created, rec.modified));

  assert!(s.permissions_for_roles(&[role], back.target).await.unwrap().contains(&PermissionKind::Read));
  assert_eq!(s.find_all_links(TargetType::Alert, back.id()).await.unwrap().len(), 2);
  assert!(s.find_all_links(TargetType::Alert, rec.id()).await.unwrap().is_empty());
  assert_eq!(s.get_history(back.target).await.unwrap().len(), 3);
  assert!(matches!(
    s.undelete(rec.target, true, None, None).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn undelete_latest_picks_the_users_most_recent_delete() {
  let s = store().await;
  let first = s.create(alert("alice"), None).await.unwrap();
  let second = s.create(alert("alice"), None).await.unwrap();
  let bobs = s.create(alert("bob"), None).await.unwrap();
  s.remove(first.target, "alice", None).await.unwrap();
  s.remove(second.target, "alice", None).await.unwrap();
  s.remove(bobs.target, "bob", None).await.unwrap();

  let back = s
    .undelete_latest(TargetType::Alert, true, Some("alice"), None)
    .await
    .unwrap();
  assert_eq!(back.target, second.target);

  assert!(matches!(
    s.undelete_latest(TargetType::Event, true, None, None).await,
    Err(Error::NothingDeleted(TargetType::Event))
  ));
}

#[tokio::test]
async fn remove_many_reports_each_item() {
  let s = store().await;
  let a = s.create(alert("x"), None).await.unwrap().target;
  let b = s.create(alert("x"), None).await.unwrap().target;
  let missing = TargetRef::new(TargetType::Alert, 404);

  let outcome = s.remove_many(&[a, missing, b], "x", None).await.unwrap();
  assert_eq!(outcome.succeeded, vec![a, b]);
  assert_eq!(outcome.not_found, vec![missing]);
  assert!(outcome.failed.is_empty());
}

#[tokio::test]
async fn purge_cascades() {
  let (s, role) = store_with_user("alice").await;
  let rec = s.create_with_owner(alert("alice"), None).await.unwrap().target;
  let tag = TargetRef::new(TargetType::Tag, 1);
  s.assign(tag, rec, None).await.unwrap();
  s.record_appearance(NewAppearance {
    when_date: None,
    container: rec,
    value:     AppearanceValue { target: TargetRef::new(TargetType::Entity, 5), text: None },
  })
  .await
  .unwrap();
  s.remove(rec, "alice", None).await.unwrap();

  assert!(s.purge(rec, None).await.unwrap().is_some());
  assert!(s.purge(rec, None).await.unwrap().is_none());
  assert!(s.permissions_for_roles(&[role], rec).await.unwrap().is_empty());
  assert!(s.find_all_links(TargetType::Tag, 1).await.unwrap().is_empty());
  let buckets = s.appearances(TargetRef::new(TargetType::Entity, 5), 0, 10).await.unwrap();
  assert_eq!(buckets[&AppearanceBucket::Alert].total, 0);
  assert!(matches!(
    s.undelete(rec, true, None, None).await,
    Err(Error::NotFound(_))
  ));
}

// ─── Containers ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn children_inherit_parent_grants() {
  let (s, role) = store_with_user("alice").await;
  let event = s
    .create_with_owner(NewRecord::new(TargetType::Event, "alice"), None)
    .await
    .unwrap()
    .target;

  let entry = s
    .create_in_object(NewRecord::new(TargetType::Entry, "alice"), event, None)
    .await
    .unwrap();
  assert_eq!(entry.parent, Some(event));
  assert_eq!(
    s.permissions_for_roles(&[role], entry.target).await.unwrap(),
    s.permissions_for_roles(&[role], event).await.unwrap()
  );

  let gone = TargetRef::new(TargetType::Event, 999);
  assert!(matches!(
    s.create_in_object(NewRecord::new(TargetType::Entry, "alice"), gone, None).await,
    Err(Error::NotFound(t)) if t == gone
  ));
}

#[tokio::test]
async fn container_history_includes_child_creates_and_deletes_only() {
  let s = store().await;
  let ctx = AuditContext::new("alice");
  let event = s
    .create(NewRecord::new(TargetType::Event, "alice"), Some(&ctx))
    .await
    .unwrap()
    .target;
  let entry = s
    .create_in_object(NewRecord::new(TargetType::Entry, "alice"), event, Some(&ctx))
    .await
    .unwrap()
    .target;
  s.update(entry, json!({ "body": "edited" }), Some(&ctx)).await.unwrap();
  s.remove(entry, "alice", Some(&ctx)).await.unwrap();

  let history = s.get_history(event).await.unwrap();
  let rows: Vec<(&str, TargetType)> =
    history.iter().map(|a| (a.what.as_str(), a.thing.target_type)).collect();
  assert_eq!(
    rows,
    vec![
      ("create", TargetType::Event),
      ("create", TargetType::Entry),
      ("delete", TargetType::Entry),
    ]
  );

  // A non-container only sees its own rows.
  assert_eq!(s.get_history(entry).await.unwrap().len(), 3);
}

#[tokio::test]
async fn promote_copies_grants_links_and_appearances() {
  let (s, role) = store_with_user("alice").await;
  let ctx = AuditContext::new("alice");
  let src = s.create_with_owner(alert("alice"), Some(&ctx)).await.unwrap().target;
  let entity = TargetRef::new(TargetType::Entity, 3);
  s.record_appearance(NewAppearance {
    when_date: None,
    container: src,
    value:     AppearanceValue { target: entity, text: None },
  })
  .await
  .unwrap();

  let dst = s
    .promote(src, NewRecord::new(TargetType::Event, "alice"), Some(&ctx))
    .await
    .unwrap()
    .target;

  assert_eq!(
    s.get_permission_roles(src).await.unwrap(),
    s.get_permission_roles(dst).await.unwrap()
  );
  assert!(s.permissions_for_roles(&[role], dst).await.unwrap().contains(&PermissionKind::Modify));

  let links = s.find_all_links(TargetType::Event, dst.id).await.unwrap();
  assert_eq!(links.len(), 1);
  assert_eq!((links[0].v0, links[0].v1), (src, dst));
  assert_eq!(links[0].context.as_deref(), Some(PROMOTION_CONTEXT));

  let buckets = s.appearances(entity, 0, 10).await.unwrap();
  assert_eq!(buckets[&AppearanceBucket::Event].total, 1);

  let src_history = s.get_history(src).await.unwrap();
  assert_eq!(src_history.last().map(|a| a.what.as_str()), Some("promote"));
}
