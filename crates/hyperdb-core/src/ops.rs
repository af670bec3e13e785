//! Item mutations: create, set, retire, restore, destroy.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::{
  Error, Result,
  blob::BlobKey,
  codec::{self, parse_bool, parse_number},
  database::Database,
  date::{Date, Interval},
  filter::{Predicate, Retired},
  indexer::{TEXT_PLAIN, TextId},
  item::Item,
  journal::{self, Action, JournalEntry, Params},
  password::Password,
  schema::{ClassDef, is_reserved},
  trigger::Event,
  txn::Deferred,
  types::{ItemId, PropertyType},
  value::{Changes, Input, PropValues, Value},
};

impl Database {
  pub(crate) fn class_def(&self, class: &str) -> Result<ClassDef> { Ok(self.schema.require(class)?.clone()) }

  // ── Mutations ──

  /// Create an item and return its id.
  pub fn create(&mut self, class: &str, props: PropValues) -> Result<ItemId> {
    let actor = self.writable()?;
    let def = self.class_def(class)?;
    let mut changes = self.normalise(&def, props, None)?;
    self.fire_auditors(class, Event::Create, None, &mut changes)?;
    self.validate_changes(&def, &mut changes)?;

    let mut values: BTreeMap<String, Value> =
      changes.into_iter().filter_map(|(prop, value)| value.map(|v| (prop, v))).collect();
    if let Some(key) = def.key_prop() {
      match values.get(key).and_then(Value::as_str) {
        Some(key_value) => self.check_key_free(&def, key_value, None)?,
        None => return Err(Error::mismatch(class, key, "the key property must be set")),
      }
    }
    let content = if def.is_file() {
      values
        .entry("type".to_owned())
        .or_insert_with(|| Value::String(TEXT_PLAIN.to_owned()));
      values.remove("content")
    } else {
      None
    };

    let id = self.backend.new_id(class)?;
    let mut item = Item::new(id, Date::now(), Some(actor));
    item.values = values;
    let record = codec::encode_item(&def, &item)?;
    self.backend.add_node(class, id, &record)?;
    if let Some(content) = &content {
      self.stage_content(class, id, content)?;
    }
    self.cache.insert(class, item.clone());

    self.journal(&def, id, Action::Create, Params::Empty)?;
    self.journal_links(&def, id, &BTreeMap::new(), &item.values)?;
    self.index_item(&def, &item, content.as_ref(), None)?;
    debug!(class, id = %id, "created item");

    self.fire_reactors(class, Event::Create, id, None)?;
    Ok(id)
  }

  /// Change properties of an item. Returns the properties that actually
  /// changed; values equal to the current ones are dropped.
  pub fn set(&mut self, class: &str, id: ItemId, props: PropValues) -> Result<Changes> {
    let actor = self.writable()?;
    let def = self.class_def(class)?;
    let old = self.item(class, id)?;
    let mut changes = self.normalise(&def, props, Some(&old))?;
    self.fire_auditors(class, Event::Set, Some(id), &mut changes)?;
    self.validate_changes(&def, &mut changes)?;

    let content_changing = def.is_file() && changes.contains_key("content");
    let old_content = if content_changing { self.content_value(class, id)? } else { None };
    changes.retain(|prop, value| {
      let current = if content_changing && prop == "content" {
        old_content.as_ref()
      } else {
        old.values.get(prop)
      };
      current != value.as_ref()
    });

    if let Some(key) = def.key_prop()
      && let Some(new_key) = changes.get(key)
    {
      match new_key.as_ref().and_then(Value::as_str) {
        Some(key_value) => self.check_key_free(&def, key_value, Some(id))?,
        None => return Err(Error::mismatch(class, key, "the key property cannot be unset")),
      }
    }

    if changes.is_empty() {
      self.fire_reactors(class, Event::Set, id, Some(&old))?;
      return Ok(changes);
    }

    let mut item = old.clone();
    for (prop, value) in &changes {
      if def.is_file() && prop == "content" {
        continue;
      }
      match value {
        Some(value) => item.values.insert(prop.clone(), value.clone()),
        None => item.values.remove(prop),
      };
    }
    item.touch(Date::now(), Some(actor));
    let record = codec::encode_item(&def, &item)?;
    self.backend.set_node(class, id, &record)?;
    let new_content = changes.get("content").filter(|_| def.is_file()).cloned().flatten();
    if def.is_file() && changes.contains_key("content") {
      match &new_content {
        Some(content) => self.stage_content(class, id, content)?,
        None => self.stage_removal(class, id)?,
      }
    }
    self.cache.insert(class, item.clone());

    let previous: BTreeMap<String, Option<Value>> = changes
      .keys()
      .filter(|prop| !(def.is_file() && prop.as_str() == "content"))
      .map(|prop| (prop.clone(), old.values.get(prop).cloned()))
      .collect();
    if !previous.is_empty() {
      self.journal(&def, id, Action::Set, Params::Set(previous))?;
    }
    self.journal_links(&def, id, &old.values, &item.values)?;
    self.index_item(&def, &item, new_content.as_ref(), Some(&changes))?;
    debug!(class, id = %id, changed = changes.len(), "set item");

    self.fire_reactors(class, Event::Set, id, Some(&old))?;
    Ok(changes)
  }

  /// Hide an item from `list`, `lookup`, `find` and `filter`.
  pub fn retire(&mut self, class: &str, id: ItemId) -> Result<()> { self.flip_retired(class, id, true) }

  /// Undo [`retire`](Self::retire). Fails with `KeyConflict` when a live item
  /// has taken the key meanwhile.
  pub fn restore(&mut self, class: &str, id: ItemId) -> Result<()> { self.flip_retired(class, id, false) }

  fn flip_retired(&mut self, class: &str, id: ItemId, retire: bool) -> Result<()> {
    let actor = self.writable()?;
    let def = self.class_def(class)?;
    let old = self.item(class, id)?;
    if old.retired == retire {
      return Ok(());
    }
    let (event, action) = if retire {
      (Event::Retire, Action::Retire)
    } else {
      (Event::Restore, Action::Restore)
    };
    self.fire_auditors(class, event, Some(id), &mut Changes::new())?;
    if !retire
      && let Some(key) = def.key_prop()
      && let Some(key_value) = old.values.get(key).and_then(Value::as_str)
    {
      self.check_key_free(&def, key_value, Some(id))?;
    }

    let mut item = old.clone();
    item.retired = retire;
    item.touch(Date::now(), Some(actor));
    let record = codec::encode_item(&def, &item)?;
    self.backend.set_node(class, id, &record)?;
    self.cache.insert(class, item);
    self.journal(&def, id, action, Params::Empty)?;
    debug!(class, id = %id, %event, "flipped retired flag");

    self.fire_reactors(class, event, id, Some(&old))
  }

  /// Remove an item, its journal, its blob and its index entries. Refused
  /// while any other item links to it.
  pub fn destroy(&mut self, class: &str, id: ItemId) -> Result<()> {
    self.writable()?;
    let def = self.class_def(class)?;
    if !self.exists(class, id)? {
      return Err(Error::NoSuchItem {
        class: class.to_owned(),
        id,
      });
    }
    let referrers: Vec<(String, String)> = self
      .schema
      .referrers(class)
      .map(|(source, prop)| (source.name().to_owned(), prop.to_owned()))
      .collect();
    for (source, prop) in referrers {
      let predicate = [Predicate::LinksAny {
        prop: prop.clone(),
        ids:  BTreeSet::from([id]),
      }];
      let linked = self.scan(&source, &predicate, Retired::Include)?;
      if linked.iter().any(|item| !(source == class && item.id == id)) {
        return Err(Error::LinkDangling {
          class: source,
          prop,
          target: class.to_owned(),
          id,
        });
      }
    }

    self.backend.destroy_node(class, id)?;
    self.cache.invalidate(class, id);
    if def.is_file() {
      self.stage_removal(class, id)?;
    }
    for (prop, ty) in def.props() {
      if ty.is_indexed() {
        self.backend.indexer().purge(&TextId::new(class, id, prop))?;
      }
    }
    debug!(class, id = %id, "destroyed item");
    Ok(())
  }

  // ── Blobs ──

  /// Stage `bytes` as the blob of `(class, id, prop)`; it becomes permanent
  /// on commit.
  pub fn store_file(&mut self, class: &str, id: ItemId, prop: Option<&str>, bytes: &[u8]) -> Result<()> {
    self.writable()?;
    self.schema.require(class)?;
    let key = BlobKey::new(class, id, prop);
    self.blobs.stage(&key, bytes)?;
    self.txn.defer(Deferred::PromoteBlob(key));
    Ok(())
  }

  /// Staged bytes if this transaction wrote any, else the committed bytes.
  pub fn get_file(&mut self, class: &str, id: ItemId, prop: Option<&str>) -> Result<Option<Vec<u8>>> {
    self.schema.require(class)?;
    self.blobs.get(&BlobKey::new(class, id, prop))
  }

  fn stage_content(&mut self, class: &str, id: ItemId, content: &Value) -> Result<()> {
    let text = content.as_str().unwrap_or_default();
    let key = BlobKey::new(class, id, None);
    self.blobs.stage(&key, text.as_bytes())?;
    self.txn.defer(Deferred::PromoteBlob(key));
    Ok(())
  }

  fn stage_removal(&mut self, class: &str, id: ItemId) -> Result<()> {
    let key = BlobKey::new(class, id, None);
    self.blobs.stage_removal(&key)?;
    self.txn.defer(Deferred::PromoteBlob(key));
    Ok(())
  }

  pub(crate) fn content_value(&mut self, class: &str, id: ItemId) -> Result<Option<Value>> {
    let bytes = self.blobs.get(&BlobKey::new(class, id, None))?;
    Ok(bytes.map(|b| Value::String(String::from_utf8_lossy(&b).into_owned())))
  }

  // ── Journal and index side effects ──

  pub(crate) fn journal(&mut self, def: &ClassDef, id: ItemId, action: Action, params: Params) -> Result<()> {
    if !def.journals() {
      return Ok(());
    }
    let entry = JournalEntry::new(id, self.actor, action, params);
    let stored = journal::encode_entry(def, &entry)?;
    self.backend.add_journal(def.name(), &stored)
  }

  /// Journal `link`/`unlink` on the targets of changed link properties.
  fn journal_links(
    &mut self,
    def: &ClassDef,
    id: ItemId,
    old: &BTreeMap<String, Value>,
    new: &BTreeMap<String, Value>,
  ) -> Result<()> {
    let linked = |values: &BTreeMap<String, Value>, prop: &str| -> BTreeSet<ItemId> {
      match values.get(prop) {
        Some(Value::Link(target)) => BTreeSet::from([*target]),
        Some(Value::Multilink(targets)) => targets.iter().copied().collect(),
        _ => BTreeSet::new(),
      }
    };
    for (prop, ty) in def.props() {
      let Some(target) = ty.target() else { continue };
      if !ty.journals_links() {
        continue;
      }
      let target_def = self.class_def(target)?;
      if !target_def.journals() {
        continue;
      }
      let before = linked(old, prop);
      let after = linked(new, prop);
      let params = || Params::Link {
        class: def.name().to_owned(),
        id,
        prop: prop.to_owned(),
      };
      for removed in before.difference(&after) {
        self.journal(&target_def, *removed, Action::Unlink, params())?;
      }
      for added in after.difference(&before) {
        self.journal(&target_def, *added, Action::Link, params())?;
      }
    }
    Ok(())
  }

  /// Push indexed properties of `item` into the indexer. With `only`, just
  /// the properties named there.
  pub(crate) fn index_item(
    &mut self,
    def: &ClassDef,
    item: &Item,
    content: Option<&Value>,
    only: Option<&Changes>,
  ) -> Result<()> {
    for (prop, ty) in def.props() {
      if !ty.is_indexed() || only.is_some_and(|c| !c.contains_key(prop)) {
        continue;
      }
      let is_content = def.is_file() && prop == "content";
      let text = if is_content {
        content.and_then(Value::as_str)
      } else {
        item.values.get(prop).and_then(Value::as_str)
      };
      let mime = if is_content {
        item.values.get("type").and_then(Value::as_str).unwrap_or(TEXT_PLAIN)
      } else {
        TEXT_PLAIN
      };
      let text_id = TextId::new(def.name(), item.id, prop);
      match text {
        Some(text) => self.backend.indexer().add_text(&text_id, text, mime)?,
        None => self.backend.indexer().purge(&text_id)?,
      }
    }
    Ok(())
  }

  // ── Normalisation ──

  /// Turn caller input into canonical values.
  pub(crate) fn normalise(
    &mut self,
    def: &ClassDef,
    props: PropValues,
    current: Option<&Item>,
  ) -> Result<Changes> {
    let mut changes = Changes::new();
    for (prop, input) in props {
      if is_reserved(&prop) {
        return Err(Error::ReservedName(prop));
      }
      let ty = def
        .prop_type(&prop)
        .ok_or_else(|| Error::NoSuchProperty {
          class: def.name().to_owned(),
          prop:  prop.clone(),
        })?
        .clone();
      let verbatim = def.is_file() && prop == "content";
      let value = self
        .normalise_value(&ty, input, current.and_then(|i| i.values.get(&prop)), verbatim)
        .map_err(|e| e.in_prop(def.name(), &prop))?;
      changes.insert(prop, value);
    }
    Ok(changes)
  }

  fn normalise_value(
    &mut self,
    ty: &PropertyType,
    input: Input,
    current: Option<&Value>,
    verbatim: bool,
  ) -> Result<Option<Value>> {
    let text = match input {
      Input::Null => return Ok(None),
      Input::Value(value) => return self.coerce(ty, value).map(Some),
      Input::List(items) => match ty {
        PropertyType::Multilink { target, .. } => return self.resolve_multilink(target, &items, current),
        _ => return Err(Error::InvalidValue(format!("a list is not a {} value", ty.name()))),
      },
      Input::Text(text) => text,
    };
    if verbatim {
      return Ok(Some(Value::String(text)));
    }
    let text = text.trim();
    if text.is_empty() && !matches!(ty, PropertyType::String { .. }) {
      return Ok(None);
    }
    Ok(Some(match ty {
      PropertyType::String { .. } => Value::String(text.to_owned()),
      PropertyType::Password => Value::Password(self.hash_password(text)?),
      PropertyType::Date => Value::Date(Date::parse(text)?),
      PropertyType::Interval => Value::Interval(Interval::parse(text)?),
      PropertyType::Link { target, .. } => {
        if text == "-1" {
          return Ok(None);
        }
        Value::Link(self.resolve_link(target, text)?)
      }
      PropertyType::Multilink { target, .. } => {
        let items: Vec<String> = text
          .split(',')
          .map(|s| s.trim().to_owned())
          .filter(|s| !s.is_empty())
          .collect();
        return self.resolve_multilink(target, &items, current);
      }
      PropertyType::Boolean => Value::Boolean(
        parse_bool(text).ok_or_else(|| Error::InvalidValue(format!("not a boolean: {text:?}")))?,
      ),
      PropertyType::Number { kind } => Value::Number(parse_number(*kind, text)?),
    }))
  }

  /// Canonicalise an already-typed value for `ty`.
  fn coerce(&self, ty: &PropertyType, value: Value) -> Result<Value> {
    match (ty, value) {
      (PropertyType::Password, Value::String(clear)) => {
        Ok(Value::Password(self.hash_password(&clear)?))
      }
      (PropertyType::Multilink { .. }, Value::Link(id)) => Ok(Value::Multilink(vec![id])),
      (ty, value) => codec::deserialise(ty, &codec::serialise(ty, &value)?),
    }
  }

  fn hash_password(&self, cleartext: &str) -> Result<Password> {
    Password::hash_with_rounds(self.config.password_scheme, cleartext, self.config.pbkdf2_rounds)
  }

  /// An id given as a number, a designator (`status3`) or a key value.
  pub(crate) fn resolve_link(&mut self, target: &str, text: &str) -> Result<ItemId> {
    if let Ok(id) = text.parse::<ItemId>() {
      return Ok(id);
    }
    if let Some(id) = text.strip_prefix(target).and_then(|rest| rest.parse::<ItemId>().ok()) {
      return Ok(id);
    }
    match self.lookup(target, text) {
      Ok(id) => Ok(id),
      Err(Error::NoSuchKey { .. } | Error::Schema(_)) => {
        Err(Error::InvalidValue(format!("{text:?} is not a {target}")))
      }
      Err(e) => Err(e),
    }
  }

  /// Resolve a multilink list; `+x`/`-x` entries edit `current`.
  fn resolve_multilink(
    &mut self,
    target: &str,
    items: &[String],
    current: Option<&Value>,
  ) -> Result<Option<Value>> {
    let edits = items.iter().any(|s| s.starts_with(['+', '-']));
    let mut ids: Vec<ItemId> = match (edits, current) {
      (true, Some(Value::Multilink(ids))) => ids.clone(),
      _ => Vec::new(),
    };
    for entry in items {
      let entry = entry.trim();
      if let Some(removed) = entry.strip_prefix('-') {
        let id = self.resolve_link(target, removed.trim())?;
        ids.retain(|x| *x != id);
      } else {
        let added = entry.strip_prefix('+').unwrap_or(entry).trim();
        if added.is_empty() {
          continue;
        }
        let id = self.resolve_link(target, added)?;
        if !ids.contains(&id) {
          ids.push(id);
        }
      }
    }
    Ok((!ids.is_empty()).then(|| Value::from(ids)))
  }

  /// Check names and types of (possibly auditor-edited) changes, canonicalise
  /// them, and verify link targets exist.
  fn validate_changes(&mut self, def: &ClassDef, changes: &mut Changes) -> Result<()> {
    let class = def.name();
    for (prop, value) in changes.iter_mut() {
      if is_reserved(prop) {
        return Err(Error::ReservedName(prop.clone()));
      }
      let ty = def.prop_type(prop).ok_or_else(|| Error::NoSuchProperty {
        class: class.to_owned(),
        prop:  prop.clone(),
      })?;
      let Some(current) = value.take() else { continue };
      let canonical = self.coerce(ty, current).map_err(|e| e.in_prop(class, prop))?;
      let canonical = match canonical {
        Value::Multilink(ids) if ids.is_empty() => None,
        other => Some(other),
      };
      if let (Some(target), Some(value)) = (ty.target(), &canonical) {
        let targets: Vec<ItemId> = match value {
          Value::Link(id) => vec![*id],
          Value::Multilink(ids) => ids.clone(),
          _ => Vec::new(),
        };
        for id in targets {
          if !self.exists(target, id)? {
            return Err(Error::LinkDangling {
              class: class.to_owned(),
              prop: prop.clone(),
              target: target.to_owned(),
              id,
            });
          }
        }
      }
      *value = canonical;
    }
    Ok(())
  }

  /// Fail with `KeyConflict` if a live item other than `except` holds `key`.
  fn check_key_free(&mut self, def: &ClassDef, key: &str, except: Option<ItemId>) -> Result<()> {
    let Some(key_prop) = def.key_prop() else {
      return Ok(());
    };
    let predicate = [Predicate::Exact {
      prop:  key_prop.to_owned(),
      value: key.to_owned(),
    }];
    let holders = self.scan(def.name(), &predicate, Retired::Exclude)?;
    if holders.iter().any(|item| Some(item.id) != except) {
      return Err(Error::KeyConflict {
        class: def.name().to_owned(),
        key:   key.to_owned(),
      });
    }
    Ok(())
  }
}
