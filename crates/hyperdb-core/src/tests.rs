//! `Database` behaviour against the in-memory backend.

use std::sync::{Arc, Mutex};

use crate::{
  ClassDef, Database, Direction, ErrorKind, Filter, ItemId, MemoryBackend, PropertyType, Schema,
  SortKey, TrackerConfig, Value,
  date::{Date, Interval},
  error::Error,
  journal::{Action, Params},
  password::Scheme,
  props,
  trigger::Event,
};

fn id(n: u64) -> ItemId { ItemId::new(n) }

fn tracker_schema() -> Schema {
  Schema::new()
    .class(ClassDef::new("status").prop("name", PropertyType::string()).key("name"))
    .class(
      ClassDef::new("user")
        .prop("username", PropertyType::string())
        .prop("password", PropertyType::password())
        .key("username"),
    )
    .class(ClassDef::new("msg").prop("content", PropertyType::indexed_string()))
    .class(
      ClassDef::new("issue")
        .prop("title", PropertyType::string())
        .prop("status", PropertyType::link("status"))
        .prop("nosy", PropertyType::multilink("user"))
        .prop("messages", PropertyType::multilink("msg"))
        .prop("deadline", PropertyType::date())
        .prop("estimate", PropertyType::interval())
        .prop("urgent", PropertyType::boolean())
        .prop("votes", PropertyType::integer()),
    )
    .class(ClassDef::file("file").prop("content", PropertyType::indexed_string()))
}

fn config() -> TrackerConfig {
  TrackerConfig {
    password_scheme: Scheme::Plaintext,
    ..TrackerConfig::default()
  }
}

fn db() -> Database {
  Database::open(
    Box::new(MemoryBackend::default()),
    tracker_schema(),
    config(),
    Some(id(1)),
  )
  .unwrap()
}

/// A database with statuses `open` (1) and `closed` (2) and users `ada` (1)
/// and `bob` (2), committed.
fn seeded() -> Database {
  let mut db = db();
  db.create("status", props! { "name" => "open" }).unwrap();
  db.create("status", props! { "name" => "closed" }).unwrap();
  db.create("user", props! { "username" => "ada" }).unwrap();
  db.create("user", props! { "username" => "bob" }).unwrap();
  db.commit().unwrap();
  db
}

// ─── Create and get ──────────────────────────────────────────────────────────

#[test]
fn create_then_get_round_trips() {
  let mut db = db();
  let open = db.create("status", props! { "name" => "open" }).unwrap();
  assert_eq!(open, id(1));
  assert_eq!(db.get("status", open, "name").unwrap(), Some(Value::from("open")));
  assert_eq!(db.lookup("status", "open").unwrap(), open);

  let history = db.history("status", open).unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].action, Action::Create);
  assert_eq!(history[0].params, Params::Empty);
}

#[test]
fn implicit_properties_are_populated() {
  let mut db = db();
  let open = db.create("status", props! { "name" => "open" }).unwrap();
  assert_eq!(db.get("status", open, "id").unwrap(), Some(Value::from("1")));
  assert_eq!(db.get("status", open, "creator").unwrap(), Some(Value::Link(id(1))));
  assert_eq!(db.get("status", open, "actor").unwrap(), Some(Value::Link(id(1))));
  let created = db.get("status", open, "creation").unwrap().and_then(|v| v.as_date());
  let activity = db.get("status", open, "activity").unwrap().and_then(|v| v.as_date());
  assert!(created.is_some());
  assert_eq!(created, activity);
}

#[test]
fn unknown_and_reserved_properties_are_refused() {
  let mut db = db();
  let err = db.create("status", props! { "name" => "x", "id" => "4" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::ReservedName);
  let err = db.create("status", props! { "colour" => "red" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NoSuchProperty);
  let err = db.get("status", id(9), "name").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NoSuchItem);
  let err = db.create("widget", props! {}).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NoSuchClass);
}

#[test]
fn keyed_classes_require_the_key() {
  let mut db = db();
  let err = db.create("status", props! {}).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[test]
fn read_only_handles_cannot_write() {
  let mut db = db();
  db.set_actor(None);
  let err = db.create("status", props! { "name" => "open" }).unwrap_err();
  assert!(matches!(err, Error::ReadOnly));
}

#[test]
fn values_are_parsed_per_type() {
  let mut db = seeded();
  let issue = db
    .create("issue", props! {
      "title" => "  padded  ",
      "deadline" => "2024-03-01.12:00",
      "estimate" => "2d 3:00",
      "urgent" => "yes",
      "votes" => "3",
    })
    .unwrap();
  assert_eq!(db.get("issue", issue, "title").unwrap(), Some(Value::from("padded")));
  assert_eq!(
    db.get("issue", issue, "deadline").unwrap(),
    Some(Value::Date(Date::from_ymd_hms(2024, 3, 1, 12, 0, 0).unwrap()))
  );
  assert_eq!(
    db.get("issue", issue, "estimate").unwrap(),
    Some(Value::Interval(Interval::from_seconds(2 * 86_400 + 3 * 3_600)))
  );
  assert_eq!(db.get("issue", issue, "urgent").unwrap(), Some(Value::Boolean(true)));
  assert_eq!(db.get("issue", issue, "votes").unwrap(), Some(Value::from(3i64)));

  let err = db.create("issue", props! { "votes" => "many" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TypeMismatch);
  assert!(err.to_string().contains("votes"));
}

#[test]
fn passwords_are_hashed_on_the_way_in() {
  let mut db = seeded();
  let ada = db.lookup("user", "ada").unwrap();
  db.set("user", ada, props! { "password" => "sekrit" }).unwrap();
  let Some(Value::Password(stored)) = db.get("user", ada, "password").unwrap() else {
    panic!("password not stored");
  };
  assert!(stored.verify("sekrit").unwrap());
  assert!(!stored.verify("guess").unwrap());
}

// ─── Links ───────────────────────────────────────────────────────────────────

#[test]
fn links_resolve_by_key_id_and_designator() {
  let mut db = seeded();
  let issue = db
    .create("issue", props! { "title" => "t", "status" => "open", "nosy" => ["ada", "user2"] })
    .unwrap();
  assert_eq!(db.get("issue", issue, "status").unwrap(), Some(Value::Link(id(1))));
  assert_eq!(
    db.get("issue", issue, "nosy").unwrap(),
    Some(Value::Multilink(vec![id(1), id(2)]))
  );
  db.set("issue", issue, props! { "status" => "2" }).unwrap();
  assert_eq!(db.get("issue", issue, "status").unwrap(), Some(Value::Link(id(2))));
}

#[test]
fn unset_multilinks_read_as_empty_lists() {
  let mut db = seeded();
  let issue = db.create("issue", props! { "title" => "t" }).unwrap();
  assert_eq!(db.get("issue", issue, "nosy").unwrap(), Some(Value::Multilink(vec![])));
  assert_eq!(db.get("issue", issue, "status").unwrap(), None);
}

#[test]
fn multilink_edits_apply_to_the_current_value() {
  let mut db = seeded();
  let issue = db.create("issue", props! { "title" => "t", "nosy" => "ada" }).unwrap();
  db.set("issue", issue, props! { "nosy" => "+bob" }).unwrap();
  assert_eq!(
    db.get("issue", issue, "nosy").unwrap(),
    Some(Value::Multilink(vec![id(1), id(2)]))
  );
  db.set("issue", issue, props! { "nosy" => "-ada" }).unwrap();
  assert_eq!(db.get("issue", issue, "nosy").unwrap(), Some(Value::Multilink(vec![id(2)])));
}

#[test]
fn dangling_and_unknown_links_are_refused() {
  let mut db = seeded();
  let err = db.create("issue", props! { "status" => "7" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::LinkDangling);
  let err = db.create("issue", props! { "status" => "pending" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TypeMismatch);
  assert!(db.list("issue").unwrap().is_empty());
}

#[test]
fn link_changes_are_journalled_on_the_target() {
  let mut db = seeded();
  let issue = db.create("issue", props! { "nosy" => ["ada"] }).unwrap();
  db.set("issue", issue, props! { "nosy" => Vec::<ItemId>::new() }).unwrap();

  let actions: Vec<(Action, Params)> = db
    .history("user", id(1))
    .unwrap()
    .into_iter()
    .map(|e| (e.action, e.params))
    .collect();
  let link = Params::Link {
    class: "issue".into(),
    id:    issue,
    prop:  "nosy".into(),
  };
  assert_eq!(actions[1..], [(Action::Link, link.clone()), (Action::Unlink, link)]);
}

// ─── Keys, retire and restore ────────────────────────────────────────────────

#[test]
fn keys_are_unique_among_live_items() {
  let mut db = seeded();
  let err = db.create("status", props! { "name" => "open" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::KeyConflict);
  let err = db.set("status", id(2), props! { "name" => "open" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::KeyConflict);
}

#[test]
fn retire_hides_from_list_and_lookup_but_keeps_history() {
  let mut db = seeded();
  db.retire("status", id(1)).unwrap();
  assert_eq!(db.list("status").unwrap(), vec![id(2)]);
  assert_eq!(db.lookup("status", "open").unwrap_err().kind(), ErrorKind::NoSuchKey);
  assert_eq!(db.get("status", id(1), "name").unwrap(), Some(Value::from("open")));
  assert!(db.is_retired("status", id(1)).unwrap());
  assert_eq!(db.count("status").unwrap(), 2);

  let last = db.history("status", id(1)).unwrap().pop().unwrap();
  assert_eq!(last.action, Action::Retire);
}

#[test]
fn retired_keys_can_be_reused_and_restore_checks_them() {
  let mut db = seeded();
  db.retire("status", id(1)).unwrap();
  let reopened = db.create("status", props! { "name" => "open" }).unwrap();
  assert_eq!(db.lookup("status", "open").unwrap(), reopened);

  let err = db.restore("status", id(1)).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::KeyConflict);
  db.retire("status", reopened).unwrap();
  db.restore("status", id(1)).unwrap();
  assert_eq!(db.lookup("status", "open").unwrap(), id(1));
}

#[test]
fn destroy_is_refused_while_referenced() {
  let mut db = seeded();
  let issue = db.create("issue", props! { "status" => "open" }).unwrap();
  let err = db.destroy("status", id(1)).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::LinkDangling);

  db.set("issue", issue, props! { "status" => "-1" }).unwrap();
  db.destroy("status", id(1)).unwrap();
  assert_eq!(db.get("status", id(1), "name").unwrap_err().kind(), ErrorKind::NoSuchItem);
  assert!(db.history("status", id(1)).unwrap().is_empty());
}

// ─── Transactions ────────────────────────────────────────────────────────────

#[test]
fn rollback_restores_the_last_commit() {
  let mut db = seeded();
  let issue = db.create("issue", props! { "title" => "t" }).unwrap();
  db.commit().unwrap();

  db.set("issue", issue, props! { "title" => "t2" }).unwrap();
  db.create("issue", props! { "title" => "other" }).unwrap();
  db.rollback().unwrap();

  assert_eq!(db.get("issue", issue, "title").unwrap(), Some(Value::from("t")));
  assert_eq!(db.list("issue").unwrap(), vec![issue]);
  assert!(
    db.history("issue", issue)
      .unwrap()
      .iter()
      .all(|e| e.action != Action::Set)
  );
  let next = db.create("issue", props! { "title" => "again" }).unwrap();
  assert_eq!(next, id(2));
}

#[test]
fn setting_equal_values_changes_nothing() {
  let mut db = seeded();
  let changes = db.set("status", id(1), props! { "name" => "open" }).unwrap();
  assert!(changes.is_empty());
  db.commit().unwrap();
  db.commit().unwrap();
  assert_eq!(db.history("status", id(1)).unwrap().len(), 1);
}

#[test]
fn journal_records_old_values_and_the_actor() {
  let mut db = seeded();
  db.set_actor(Some(id(2)));
  db.set("status", id(1), props! { "name" => "new" }).unwrap();

  let last = db.history("status", id(1)).unwrap().pop().unwrap();
  assert_eq!(last.action, Action::Set);
  assert_eq!(last.actor, Some(id(2)));
  let Params::Set(old) = last.params else { panic!("expected set params") };
  assert_eq!(old.get("name"), Some(&Some(Value::from("open"))));
  assert_eq!(db.get("status", id(1), "actor").unwrap(), Some(Value::Link(id(2))));
}

#[test]
fn pack_keeps_create_entries() {
  let mut db = seeded();
  db.set("status", id(1), props! { "name" => "a" }).unwrap();
  db.set("status", id(1), props! { "name" => "b" }).unwrap();
  db.commit().unwrap();

  let removed = db.pack(Date::now() + Interval::from_seconds(86_400)).unwrap();
  assert_eq!(removed, 2);
  let history = db.history("status", id(1)).unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].action, Action::Create);
}

// ─── Triggers ────────────────────────────────────────────────────────────────

#[test]
fn auditors_edit_values_and_veto_mutations() {
  let mut db = seeded();
  db.audit("issue", Event::Create, |_db, _audit, changes| {
    if let Some(Some(Value::String(title))) = changes.get_mut("title") {
      if title.as_str() == "spam" {
        return Err(Error::Reject("no spam".into()));
      }
      *title = title.to_uppercase();
    }
    Ok(())
  });

  let issue = db.create("issue", props! { "title" => "quiet" }).unwrap();
  assert_eq!(db.get("issue", issue, "title").unwrap(), Some(Value::from("QUIET")));

  let err = db.create("issue", props! { "title" => "spam" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Reject);
  assert_eq!(db.list("issue").unwrap(), vec![issue]);
}

#[test]
fn reactors_see_the_old_item() {
  let mut db = seeded();
  let seen = Arc::new(Mutex::new(Vec::new()));
  let log = seen.clone();
  db.react("status", Event::Set, move |db, reaction| {
    let old = reaction.old.and_then(|item| item.value("name"));
    let new = db.get(reaction.class, reaction.id, "name")?;
    log.lock().unwrap().push((old, new));
    Ok(())
  });

  db.set("status", id(1), props! { "name" => "reopened" }).unwrap();
  assert_eq!(
    *seen.lock().unwrap(),
    vec![(Some(Value::from("open")), Some(Value::from("reopened")))]
  );
}

#[test]
fn failing_reactors_roll_back_the_transaction() {
  let mut db = seeded();
  let issue = db.create("issue", props! { "title" => "t" }).unwrap();
  db.commit().unwrap();
  db.react("issue", Event::Set, |_db, _reaction| Err(Error::Reject("frozen".into())));

  db.create("status", props! { "name" => "pending" }).unwrap();
  let err = db.set("issue", issue, props! { "title" => "t2" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Reject);
  assert_eq!(db.get("issue", issue, "title").unwrap(), Some(Value::from("t")));
  assert_eq!(db.lookup("status", "pending").unwrap_err().kind(), ErrorKind::NoSuchKey);
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[test]
fn find_matches_any_linked_id() {
  let mut db = seeded();
  let a = db.create("issue", props! { "status" => "open", "nosy" => ["ada"] }).unwrap();
  let b = db.create("issue", props! { "status" => "closed", "nosy" => ["ada", "bob"] }).unwrap();
  db.create("issue", props! { "status" => "closed" }).unwrap();

  assert_eq!(db.find("issue", &[("nosy", &[id(1)])]).unwrap(), vec![a, b]);
  assert_eq!(
    db.find("issue", &[("nosy", &[id(1)]), ("status", &[id(2)])]).unwrap(),
    vec![b]
  );
  let err = db.find("issue", &[("title", &[id(1)])]).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[test]
fn string_find_ignores_case() {
  let mut db = seeded();
  assert_eq!(db.string_find("user", &[("username", "ADA")]).unwrap(), vec![id(1)]);
  assert!(db.string_find("user", &[("username", "ad")]).unwrap().is_empty());
}

#[test]
fn filter_combines_conditions() {
  let mut db = seeded();
  let a = db
    .create("issue", props! { "title" => "Broken login", "status" => "open", "urgent" => true })
    .unwrap();
  let b = db
    .create("issue", props! { "title" => "Slow login", "status" => "closed", "nosy" => ["bob"] })
    .unwrap();
  let c = db.create("issue", props! { "title" => "Typo" }).unwrap();

  let ids = |f: Filter, db: &mut Database| db.filter("issue", &f).unwrap();
  assert_eq!(ids(Filter::new().condition("title", ["login"]), &mut db), vec![a, b]);
  assert_eq!(ids(Filter::new().condition("title", ["br*n"]), &mut db), vec![a]);
  assert_eq!(ids(Filter::new().condition("status", ["open", "-1"]), &mut db), vec![a, c]);
  assert_eq!(ids(Filter::new().condition("nosy", ["bob"]), &mut db), vec![b]);
  assert_eq!(ids(Filter::new().condition("nosy", ["-1"]), &mut db), vec![a, c]);
  assert_eq!(ids(Filter::new().condition("urgent", ["yes"]), &mut db), vec![a]);
  assert_eq!(ids(Filter::new().condition("id", ["1", "3"]), &mut db), vec![a, c]);
  assert_eq!(
    ids(Filter::new().condition("title", ["login"]).restrict([b, c]), &mut db),
    vec![b]
  );
  assert_eq!(
    ids(Filter::new().condition("creator", ["ada"]), &mut db),
    vec![a, b, c]
  );
}

#[test]
fn filter_on_date_ranges() {
  let mut db = seeded();
  let early = db.create("issue", props! { "deadline" => "2024-01-15" }).unwrap();
  let late = db.create("issue", props! { "deadline" => "2024-06-01" }).unwrap();
  let none = db.create("issue", props! { "title" => "undated" }).unwrap();

  let filter = Filter::new().condition("deadline", ["2024-01"]);
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![early]);
  let filter = Filter::new().condition("deadline", ["from 2024-02-01"]);
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![late]);
  let filter = Filter::new().condition("deadline", ["-"]);
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![none]);
}

#[test]
fn filter_sorts_and_groups() {
  let mut db = seeded();
  let a = db.create("issue", props! { "title" => "a", "status" => "open" }).unwrap();
  let b = db.create("issue", props! { "title" => "b", "status" => "closed" }).unwrap();
  let c = db.create("issue", props! { "title" => "c", "status" => "open" }).unwrap();

  let filter = Filter::new().sort(SortKey::desc("title"));
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![c, b, a]);

  // Links sort by the target's order property: "closed" < "open".
  let filter = Filter::new()
    .group(SortKey::asc("status"))
    .sort(SortKey::desc("title"));
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![b, c, a]);

  let filter = Filter::new().sort(SortKey {
    direction: Direction::None,
    prop:      Some("title".into()),
  });
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![a, b, c]);
}

#[test]
fn filter_skips_retired_items_unless_asked() {
  let mut db = seeded();
  db.retire("status", id(2)).unwrap();
  assert_eq!(db.filter("status", &Filter::new()).unwrap(), vec![id(1)]);
  assert_eq!(
    db.filter("status", &Filter::new().include_retired()).unwrap(),
    vec![id(1), id(2)]
  );
}

#[test]
fn filter_selects_by_retired_state() {
  let mut db = seeded();
  db.retire("status", id(2)).unwrap();
  let only = Filter::new().only_retired();
  assert_eq!(db.filter("status", &only).unwrap(), vec![id(2)]);
  let only_open = Filter::new().only_retired().condition("name", ["open"]);
  assert!(db.filter("status", &only_open).unwrap().is_empty());
}

#[test]
fn linked_conditions_hold_on_the_same_item() {
  let mut db = seeded();
  let m1 = db.create("msg", props! { "content" => "crash" }).unwrap();
  db.set_actor(Some(id(2)));
  let m2 = db.create("msg", props! { "content" => "typo" }).unwrap();
  let a = db.create("issue", props! { "title" => "a", "messages" => vec![m1] }).unwrap();
  let b = db.create("issue", props! { "title" => "b", "messages" => vec![m1, m2] }).unwrap();
  db.create("issue", props! { "title" => "c" }).unwrap();

  let filter = Filter::new().condition("messages.creator", ["bob"]);
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![b]);
  let filter = Filter::new().condition("messages.content", ["crash"]);
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![a, b]);
  // No single message is both bob's and about a crash.
  let filter = Filter::new()
    .condition("messages.creator", ["bob"])
    .condition("messages.content", ["crash"]);
  assert!(db.filter("issue", &filter).unwrap().is_empty());
  let filter = Filter::new().condition("messages.content", ["nothing"]);
  assert!(db.filter("issue", &filter).unwrap().is_empty());
}

#[test]
fn linked_paths_must_cross_links() {
  let mut db = seeded();
  let err = db.filter("issue", &Filter::new().condition("title.name", ["x"])).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TypeMismatch);
  let err = db.filter("issue", &Filter::new().condition("status.colour", ["x"])).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NoSuchProperty);
  let err = db.filter("issue", &Filter::new().sort(SortKey::asc("status.colour"))).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NoSuchProperty);
}

#[test]
fn filter_sorts_by_linked_properties() {
  let mut db = seeded();
  let a = db.create("issue", props! { "title" => "a", "nosy" => ["bob"] }).unwrap();
  let b = db.create("issue", props! { "title" => "b", "nosy" => ["ada", "bob"] }).unwrap();
  let c = db.create("issue", props! { "title" => "c" }).unwrap();

  let filter = Filter::new().sort(SortKey::asc("nosy.username"));
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![c, b, a]);
  let filter = Filter::new().sort(SortKey::desc("creator.username")).sort(SortKey::desc("id"));
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![c, b, a]);
}

#[test]
fn exact_conditions_compare_whole_strings() {
  let mut db = seeded();
  let a = db.create("issue", props! { "title" => "Login" }).unwrap();
  db.create("issue", props! { "title" => "Login broken" }).unwrap();
  let c = db.create("issue", props! { "status" => "open" }).unwrap();

  assert_eq!(db.filter("issue", &Filter::new().exact("title", ["Login"])).unwrap(), vec![a]);
  assert!(db.filter("issue", &Filter::new().exact("title", ["login"])).unwrap().is_empty());
  assert_eq!(db.filter("issue", &Filter::new().exact("title", [""])).unwrap(), vec![c]);
  assert_eq!(db.filter("issue", &Filter::new().exact("status", ["open"])).unwrap(), vec![c]);
}

#[test]
fn link_expressions_combine_ids() {
  let mut db = seeded();
  let a = db.create("issue", props! { "nosy" => ["ada"], "status" => "open" }).unwrap();
  let b = db.create("issue", props! { "nosy" => ["ada", "bob"], "status" => "closed" }).unwrap();
  let c = db.create("issue", props! { "title" => "nobody" }).unwrap();

  let ids = |values: &[&str], db: &mut Database| {
    db.filter("issue", &Filter::new().condition("nosy", values.iter().copied())).unwrap()
  };
  assert_eq!(ids(&["ada", "bob", "-3"], &mut db), vec![b]);
  assert_eq!(ids(&["bob", "-2"], &mut db), vec![a, c]);
  assert_eq!(ids(&["-1", "-2"], &mut db), vec![a, b]);
  assert_eq!(ids(&["bob", "-1", "-4"], &mut db), vec![b, c]);

  let status = Filter::new().condition("status", ["2", "-1", "-4", "-2"]);
  assert_eq!(db.filter("issue", &status).unwrap(), vec![a]);

  let err = db.filter("issue", &Filter::new().condition("nosy", ["1", "-3"])).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[test]
fn filter_pages_after_ordering() {
  let mut db = seeded();
  let made: Vec<ItemId> = ["d", "a", "c", "b"]
    .into_iter()
    .map(|t| db.create("issue", props! { "title" => t }).unwrap())
    .collect();
  let filter = Filter::new().sort(SortKey::asc("title")).offset(1).limit(2);
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![made[3], made[2]]);
  let filter = Filter::new().sort(SortKey::desc("title")).limit(1);
  assert_eq!(db.filter("issue", &filter).unwrap(), vec![made[0]]);
}

#[test]
fn full_text_filtering_intersects_with_conditions() {
  let mut db = seeded();
  let hit = db.create("msg", props! { "content" => "the flebble broke" }).unwrap();
  let a = db.create("issue", props! { "title" => "a", "messages" => vec![hit], "status" => "open" }).unwrap();
  db.create("issue", props! { "title" => "b", "messages" => vec![hit], "status" => "closed" }).unwrap();
  db.create("issue", props! { "title" => "c", "status" => "open" }).unwrap();
  db.commit().unwrap();

  let words = ["flebble".to_owned()];
  let filter = Filter::new().condition("status", ["open"]);
  assert_eq!(db.filter_text("issue", &words, &filter).unwrap(), vec![a]);
  let restricted = Filter::new().restrict([id(3)]);
  assert!(db.filter_text("issue", &words, &restricted).unwrap().is_empty());
}

#[test]
fn filter_rejects_unknown_properties() {
  let mut db = seeded();
  let err = db.filter("issue", &Filter::new().condition("colour", ["red"])).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NoSuchProperty);
  let err = db.filter("issue", &Filter::new().sort(SortKey::asc("colour"))).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NoSuchProperty);
}

#[test]
fn labels_fall_back_to_the_id() {
  let mut db = seeded();
  let issue = db.create("issue", props! { "title" => "Crash" }).unwrap();
  let blank = db.create("issue", props! { "votes" => 1 }).unwrap();
  assert_eq!(db.get_label("issue", issue).unwrap(), "Crash");
  assert_eq!(db.get_label("issue", blank).unwrap(), blank.to_string());
  assert_eq!(db.get_label("status", id(2)).unwrap(), "closed");
}

// ─── Full-text search ────────────────────────────────────────────────────────

#[test]
fn search_attributes_hits_through_links() {
  let mut db = seeded();
  let msg = db.create("msg", props! { "content" => "the flebble is broken" }).unwrap();
  let other = db.create("msg", props! { "content" => "nothing to see" }).unwrap();
  let issue = db.create("issue", props! { "title" => "t", "messages" => vec![msg, other] }).unwrap();
  db.commit().unwrap();

  let words = vec!["flebble".to_owned()];
  let hits = db.search(&words, "issue", &[]).unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[&issue].get("messages"), Some(&vec![msg]));

  let direct = db.search(&words, "msg", &[]).unwrap();
  assert_eq!(direct.keys().copied().collect::<Vec<_>>(), vec![msg]);
  assert!(direct[&msg].is_empty());

  assert!(db.search(&words, "issue", &[("msg", "content")]).unwrap().is_empty());
}

#[test]
fn reindex_restores_dropped_entries() {
  let mut db = seeded();
  let msg = db.create("msg", props! { "content" => "flebble" }).unwrap();
  db.commit().unwrap();
  assert_eq!(db.reindex(None).unwrap(), 1);
  let hits = db.search(&["flebble".to_owned()], "msg", &[]).unwrap();
  assert!(hits.contains_key(&msg));
}

// ─── File classes ────────────────────────────────────────────────────────────

#[test]
fn file_content_lives_in_the_blob_store() {
  let mut db = seeded();
  let file = db.create("file", props! { "content" => "  raw bytes\n" }).unwrap();
  assert_eq!(db.get("file", file, "content").unwrap(), Some(Value::from("  raw bytes\n")));
  assert_eq!(db.get("file", file, "type").unwrap(), Some(Value::from("text/plain")));
  db.commit().unwrap();
  assert_eq!(db.get_file("file", file, None).unwrap(), Some(b"  raw bytes\n".to_vec()));

  db.set("file", file, props! { "content" => "changed" }).unwrap();
  db.rollback().unwrap();
  assert_eq!(db.get("file", file, "content").unwrap(), Some(Value::from("  raw bytes\n")));
}

#[test]
fn cleared_file_content_reads_as_unset_until_rollback() {
  let mut db = seeded();
  let file = db.create("file", props! { "content" => "old" }).unwrap();
  db.commit().unwrap();

  db.set("file", file, props! { "content" => crate::Input::Null }).unwrap();
  assert_eq!(db.get("file", file, "content").unwrap(), None);
  assert_eq!(db.get_file("file", file, None).unwrap(), None);

  db.rollback().unwrap();
  assert_eq!(db.get("file", file, "content").unwrap(), Some(Value::from("old")));

  db.set("file", file, props! { "content" => crate::Input::Null }).unwrap();
  db.commit().unwrap();
  assert_eq!(db.get_file("file", file, None).unwrap(), None);
}

#[test]
fn far_future_date_offsets_are_refused() {
  let mut db = seeded();
  let err = db.create("issue", props! { "deadline" => ". +999999999y" }).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[test]
fn file_content_is_indexed_only_as_plain_text() {
  let mut db = seeded();
  let text = db.create("file", props! { "content" => "zorblax" }).unwrap();
  db.create("file", props! { "content" => "zorblax", "type" => "image/png" }).unwrap();
  let hits = db.search(&["zorblax".to_owned()], "file", &[]).unwrap();
  assert_eq!(hits.keys().copied().collect::<Vec<_>>(), vec![text]);
}

// ─── Export and import ───────────────────────────────────────────────────────

#[test]
fn export_then_import_reproduces_the_database() {
  let mut source = seeded();
  let msg = db_msg(&mut source);
  source
    .create("issue", props! {
      "title" => "exported",
      "status" => "open",
      "nosy" => ["ada", "bob"],
      "messages" => vec![msg],
      "estimate" => "1w",
      "votes" => 4,
    })
    .unwrap();
  source.create("file", props! { "content" => "blob body", "type" => "text/x-log" }).unwrap();
  source.set("user", id(1), props! { "password" => "pw" }).unwrap();
  source.retire("status", id(2)).unwrap();
  source.commit().unwrap();
  let export = source.export_all().unwrap();

  let mut target = db();
  target.import_all(&export).unwrap();
  target.commit().unwrap();
  assert_eq!(target.export_all().unwrap(), export);
  assert_eq!(target.lookup("user", "bob").unwrap(), id(2));

  let next = target.create("status", props! { "name" => "later" }).unwrap();
  assert_eq!(next, id(3));
}

fn db_msg(db: &mut Database) -> ItemId {
  db.create("msg", props! { "content" => "exported message" }).unwrap()
}

#[test]
fn export_rows_follow_the_property_names() {
  let mut db = seeded();
  let names = db.export_propnames("status").unwrap();
  assert_eq!(names, ["name", "id", "creation", "activity", "creator", "actor"]);
  let row = db.export_list("status", id(1)).unwrap();
  assert_eq!(row.len(), names.len() + 1);
  assert_eq!(row[0].as_deref(), Some("open"));
  assert_eq!(row[1].as_deref(), Some("1"));
  assert_eq!(row.last().unwrap().as_deref(), Some("0"));
}

#[test]
fn importing_over_an_existing_id_fails() {
  let mut db = seeded();
  let names = db.export_propnames("status").unwrap();
  let row = db.export_list("status", id(1)).unwrap();
  let err = db.import_list("status", &names, &row).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::KeyConflict);
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[test]
fn session_stores_are_reachable_from_the_handle() {
  let mut db = db();
  let key = db.sessions().get_unique_key().unwrap();
  let mut fields = serde_json::Map::new();
  fields.insert("user".into(), serde_json::json!("ada"));
  db.sessions().set(&key, fields).unwrap();
  assert_eq!(db.sessions().get(&key, "user").unwrap(), Some(serde_json::json!("ada")));
  assert!(!db.otks().exists(&key).unwrap());
}
