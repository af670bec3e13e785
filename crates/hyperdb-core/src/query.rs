//! Reads: item access, key lookup, `find`, `stringFind`, `filter`,
//! full-text `search`, history and labels.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::{
  Error, Result,
  codec,
  database::Database,
  date::{Date, Interval, Range},
  filter::{Direction, Filter, LinkExpr, LinkOp, Predicate, Retired, SortValue, compare_rows},
  indexer::TextId,
  item::Item,
  journal::{self, JournalEntry},
  schema::{ClassDef, USER_CLASS},
  types::{ItemId, PropertyType},
  value::{Number, Value},
};

/// Full-text search result: pivot-class id → property → linked hit ids.
/// Direct hits on the pivot class carry an empty property map.
pub type SearchHits = BTreeMap<ItemId, BTreeMap<String, Vec<ItemId>>>;

impl Database {
  // ── Items ──

  /// The decoded item, retired or not.
  pub fn item(&mut self, class: &str, id: ItemId) -> Result<Item> {
    if let Some(item) = self.cache.get(class, id) {
      return Ok(item);
    }
    let def = self.schema.require(class)?;
    let record = self.backend.get_node(class, id)?.ok_or_else(|| Error::NoSuchItem {
      class: class.to_owned(),
      id,
    })?;
    let item = codec::decode_item(def, id, record)?;
    self.cache.insert(class, item.clone());
    Ok(item)
  }

  pub(crate) fn exists(&mut self, class: &str, id: ItemId) -> Result<bool> {
    if self.cache.get(class, id).is_some() {
      return Ok(true);
    }
    Ok(self.backend.get_node(class, id)?.is_some())
  }

  /// Value of one property. Unset scalars are `None`; an unset multilink is
  /// an empty list; file content comes from the blob store.
  pub fn get(&mut self, class: &str, id: ItemId, prop: &str) -> Result<Option<Value>> {
    let def = self.class_def(class)?;
    let item = self.item(class, id)?;
    if let Some(value) = item.implicit(prop) {
      return Ok(value);
    }
    let ty = def.prop_type(prop).ok_or_else(|| Error::NoSuchProperty {
      class: class.to_owned(),
      prop:  prop.to_owned(),
    })?;
    if def.is_file() && prop == "content" {
      return self.content_value(class, id);
    }
    Ok(match (item.values.get(prop), ty) {
      (None, PropertyType::Multilink { .. }) => Some(Value::Multilink(Vec::new())),
      (value, _) => value.cloned(),
    })
  }

  pub fn is_retired(&mut self, class: &str, id: ItemId) -> Result<bool> { Ok(self.item(class, id)?.retired) }

  /// Ids of live items, ascending.
  pub fn list(&mut self, class: &str) -> Result<Vec<ItemId>> {
    self.schema.require(class)?;
    self.backend.node_ids(class, false)
  }

  /// Number of ids allocated so far, retired and destroyed items included.
  pub fn count(&mut self, class: &str) -> Result<u64> {
    self.schema.require(class)?;
    self.backend.max_id(class)
  }

  /// Id of the live item whose key property equals `key`.
  pub fn lookup(&mut self, class: &str, key: &str) -> Result<ItemId> {
    let def = self.schema.require(class)?;
    let key_prop = def
      .key_prop()
      .ok_or_else(|| Error::Schema(format!("class {class} has no key property")))?
      .to_owned();
    let predicate = [Predicate::Exact {
      prop:  key_prop,
      value: key.to_owned(),
    }];
    let found = self.scan(class, &predicate, Retired::Exclude)?;
    found.first().map(|item| item.id).ok_or_else(|| Error::NoSuchKey {
      class: class.to_owned(),
      key:   key.to_owned(),
    })
  }

  /// Items matching every predicate. Backends may narrow the candidates;
  /// every predicate is re-checked here.
  pub(crate) fn scan(&mut self, class: &str, predicates: &[Predicate], retired: Retired) -> Result<Vec<Item>> {
    self.schema.require(class)?;
    let ids = match self.backend.candidates(class, predicates)? {
      Some(ids) => ids,
      None => self.backend.node_ids(class, retired != Retired::Exclude)?,
    };
    let mut found = Vec::new();
    for id in ids {
      let item = match self.item(class, id) {
        Ok(item) => item,
        Err(Error::NoSuchItem { .. }) => continue,
        Err(e) => return Err(e),
      };
      if !retired.admits(item.retired) {
        continue;
      }
      if predicates.iter().all(|p| p.matches(&item)) {
        found.push(item);
      }
    }
    Ok(found)
  }

  // ── Queries ──

  /// Live items whose link or multilink properties reference any of the
  /// given ids; AND across properties.
  pub fn find(&mut self, class: &str, conditions: &[(&str, &[ItemId])]) -> Result<Vec<ItemId>> {
    let def = self.class_def(class)?;
    let mut predicates = Vec::with_capacity(conditions.len());
    for (prop, ids) in conditions {
      match def.prop_type(prop) {
        Some(PropertyType::Link { .. } | PropertyType::Multilink { .. }) => {}
        Some(_) => return Err(Error::mismatch(class, prop, "find only accepts link properties")),
        None => return Err(no_such_property(class, prop)),
      }
      predicates.push(Predicate::LinksAny {
        prop: (*prop).to_owned(),
        ids:  ids.iter().copied().collect(),
      });
    }
    Ok(self.scan(class, &predicates, Retired::Exclude)?.into_iter().map(|i| i.id).collect())
  }

  /// Live items whose string properties equal the given values, ignoring
  /// case; AND across properties.
  pub fn string_find(&mut self, class: &str, conditions: &[(&str, &str)]) -> Result<Vec<ItemId>> {
    let def = self.class_def(class)?;
    let mut predicates = Vec::with_capacity(conditions.len());
    for (prop, value) in conditions {
      match def.prop_type(prop) {
        Some(PropertyType::String { .. }) => {}
        Some(_) => return Err(Error::mismatch(class, prop, "stringFind only accepts string properties")),
        None => return Err(no_such_property(class, prop)),
      }
      predicates.push(Predicate::TextEq {
        prop:   (*prop).to_owned(),
        values: vec![value.to_lowercase()],
      });
    }
    Ok(self.scan(class, &predicates, Retired::Exclude)?.into_iter().map(|i| i.id).collect())
  }

  /// Ids matching `filter`, ordered by its group keys, then its sort keys,
  /// then id, and cut to its offset and limit.
  pub fn filter(&mut self, class: &str, filter: &Filter) -> Result<Vec<ItemId>> {
    let def = self.class_def(class)?;
    let mut predicates = self.resolve_conditions(&def, filter)?;
    if let Some(restrict) = &filter.restrict {
      predicates.push(Predicate::Id(restrict.clone()));
    }
    let ordering: Vec<(String, Direction)> = filter
      .ordering()
      .into_iter()
      .map(|(path, dir)| (path.to_owned(), dir))
      .collect();
    for (path, _) in &ordering {
      self.path_type(&def, path)?;
    }

    let items = self.scan(class, &predicates, filter.retired)?;
    let directions: Vec<Direction> = ordering.iter().map(|(_, d)| *d).collect();
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
      let mut row = Vec::with_capacity(ordering.len());
      for (path, _) in &ordering {
        row.push(self.sort_value(&def, &item, path)?);
      }
      rows.push((row, item.id));
    }
    rows.sort_by(|(a, a_id), (b, b_id)| compare_rows(a, b, &directions).then(a_id.cmp(b_id)));
    debug!(class, matched = rows.len(), "filtered");
    Ok(filter.page(rows.into_iter().map(|(_, id)| id).collect()))
  }

  /// [`filter`](Self::filter) restricted to the classes' full-text hits
  /// for `words`.
  pub fn filter_text(&mut self, class: &str, words: &[String], filter: &Filter) -> Result<Vec<ItemId>> {
    let hits = self.search(words, class, &[])?;
    let mut filter = filter.clone();
    let restrict: BTreeSet<ItemId> = match filter.restrict.take() {
      Some(earlier) => hits.keys().filter(|id| earlier.contains(id)).copied().collect(),
      None => hits.into_keys().collect(),
    };
    filter.restrict = Some(restrict);
    self.filter(class, &filter)
  }

  /// Conditions on the class's own properties become predicates. Paths
  /// crossing a link are grouped by their first hop and answered by a
  /// filter on the target class.
  fn resolve_conditions(&mut self, def: &ClassDef, filter: &Filter) -> Result<Vec<Predicate>> {
    let class = def.name();
    let mut predicates = Vec::new();
    let mut hops: BTreeMap<String, Filter> = BTreeMap::new();
    for (exact, conditions) in [(false, &filter.conditions), (true, &filter.exact)] {
      for (path, values) in conditions {
        if let Some((head, rest)) = path.split_once('.') {
          let hop = hops.entry(head.to_owned()).or_default();
          let spec = if exact { &mut hop.exact } else { &mut hop.conditions };
          spec.insert(rest.to_owned(), values.clone());
          continue;
        }
        if path == "id" {
          let ids = values
            .iter()
            .map(|v| v.parse::<ItemId>())
            .collect::<Result<BTreeSet<_>>>()
            .map_err(|e| e.in_prop(class, path))?;
          predicates.push(Predicate::Id(ids));
          continue;
        }
        let ty = implicit_type(def, path).ok_or_else(|| no_such_property(class, path))?;
        let predicate = self
          .resolve_condition(path, &ty, values, exact)
          .map_err(|e| e.in_prop(class, path))?;
        predicates.push(predicate);
      }
    }

    for (head, hop) in hops {
      let ty = implicit_type(def, &head).ok_or_else(|| no_such_property(class, &head))?;
      let target = ty
        .target()
        .ok_or_else(|| Error::mismatch(class, &head, "only link properties can be followed"))?
        .to_owned();
      let ids = self.filter(&target, &hop)?;
      debug!(class, prop = %head, target = %target, matched = ids.len(), "resolved linked condition");
      predicates.push(Predicate::LinksAny {
        prop: head,
        ids:  ids.into_iter().collect(),
      });
    }
    Ok(predicates)
  }

  /// The type at the end of a dotted property path starting at `def`.
  fn path_type(&self, def: &ClassDef, path: &str) -> Result<PropertyType> {
    let mut class = def.name().to_owned();
    let mut segments = path.split('.').peekable();
    while let Some(prop) = segments.next() {
      let here = self.schema.require(&class)?;
      let ty = implicit_type(here, prop).ok_or_else(|| no_such_property(&class, prop))?;
      if segments.peek().is_none() {
        return Ok(ty);
      }
      class = ty
        .target()
        .ok_or_else(|| Error::mismatch(&class, prop, "only link properties can be followed"))?
        .to_owned();
    }
    Err(no_such_property(def.name(), path))
  }

  fn link_expr(&mut self, target: &str, values: &[String]) -> Result<LinkExpr> {
    let mut ops = Vec::with_capacity(values.len());
    for value in values {
      let value = value.trim();
      let op = match value.parse::<i64>() {
        Ok(code) if code < 0 => LinkOp::from_code(code)?,
        _ if value == "-" || value.is_empty() => LinkOp::Empty,
        _ => LinkOp::Has(self.resolve_link(target, value)?),
      };
      ops.push(op);
    }
    LinkExpr::new(ops)
  }

  fn resolve_condition(&mut self, prop: &str, ty: &PropertyType, values: &[String], exact: bool) -> Result<Predicate> {
    let prop = prop.to_owned();
    let is_unset = |v: &str| v.is_empty() || v == "-1" || v == "-";
    if let Some(target) = ty.target()
      && LinkExpr::is_expression(values)
    {
      let expr = self.link_expr(target, values)?;
      return Ok(Predicate::Expression { prop, expr });
    }
    Ok(match ty {
      PropertyType::String { .. } if exact => Predicate::Equals {
        prop,
        values: values.to_vec(),
      },
      PropertyType::String { .. } => Predicate::text(prop, values.to_vec())?,
      PropertyType::Password => {
        return Err(Error::InvalidValue("password properties cannot be filtered".into()));
      }
      PropertyType::Link { target, .. } => {
        let mut ids = BTreeSet::new();
        let mut unset = values.is_empty();
        for value in values {
          if is_unset(value.trim()) {
            unset = true;
          } else {
            ids.insert(self.resolve_link(target, value.trim())?);
          }
        }
        Predicate::Link { prop, ids, unset }
      }
      PropertyType::Multilink { target, .. } => {
        let mut all = BTreeSet::new();
        let mut empty = values.is_empty();
        for value in values {
          if is_unset(value.trim()) {
            empty = true;
          } else {
            all.insert(self.resolve_link(target, value.trim())?);
          }
        }
        Predicate::Multilink { prop, all, empty }
      }
      PropertyType::Date => {
        let mut ranges = Vec::new();
        let mut unset = false;
        for value in values {
          if is_unset(value.trim()) {
            unset = true;
          } else {
            ranges.push(Range::<Date>::parse(value)?);
          }
        }
        Predicate::Date { prop, ranges, unset }
      }
      PropertyType::Interval => {
        let mut ranges = Vec::new();
        let mut unset = false;
        for value in values {
          if is_unset(value.trim()) {
            unset = true;
          } else {
            ranges.push(Range::<Interval>::parse(value)?);
          }
        }
        Predicate::Interval { prop, ranges, unset }
      }
      PropertyType::Boolean => Predicate::Boolean {
        prop,
        values: values
          .iter()
          .map(|v| {
            codec::parse_bool(v).ok_or_else(|| Error::InvalidValue(format!("not a boolean: {v:?}")))
          })
          .collect::<Result<_>>()?,
      },
      PropertyType::Number { kind } => Predicate::Number {
        prop,
        values: values
          .iter()
          .map(|v| codec::parse_number(*kind, v).map(Number::as_f64))
          .collect::<Result<_>>()?,
      },
    })
  }

  /// Sort value of `path` on `item`. Each hop through a multilink yields
  /// the sorted values of every linked item.
  fn sort_value(&mut self, def: &ClassDef, item: &Item, path: &str) -> Result<SortValue> {
    let (prop, rest) = match path.split_once('.') {
      Some((prop, rest)) => (prop, Some(rest)),
      None => (path, None),
    };
    if prop == "id" {
      return Ok(SortValue::Number(item.id.get() as f64));
    }
    let target = implicit_type(def, prop).and_then(|ty| ty.target().map(str::to_owned));
    if let Some(rest) = rest {
      let Some(target) = target else { return Ok(SortValue::Null) };
      let target_def = self.class_def(&target)?;
      return Ok(match item.value(prop) {
        Some(Value::Link(id)) => self.hop_sort_value(&target_def, id, rest)?,
        Some(Value::Multilink(ids)) => {
          let mut values = Vec::with_capacity(ids.len());
          for id in ids {
            values.push(self.hop_sort_value(&target_def, id, rest)?);
          }
          values.sort_by(SortValue::compare);
          SortValue::Many(values)
        }
        _ => SortValue::Null,
      });
    }
    Ok(match (item.value(prop), target) {
      (None, _) => SortValue::Null,
      (Some(Value::Link(id)), Some(target)) => self.linked_sort_value(&target, id)?,
      (Some(Value::Multilink(ids)), Some(target)) => {
        let mut values = Vec::with_capacity(ids.len());
        for id in ids {
          values.push(self.linked_sort_value(&target, id)?);
        }
        values.sort_by(SortValue::compare);
        SortValue::Many(values)
      }
      (Some(value), _) => plain_sort_value(&value),
    })
  }

  fn hop_sort_value(&mut self, def: &ClassDef, id: ItemId, rest: &str) -> Result<SortValue> {
    match self.item(def.name(), id) {
      Ok(linked) => self.sort_value(def, &linked, rest),
      Err(Error::NoSuchItem { .. }) => Ok(SortValue::Null),
      Err(e) => Err(e),
    }
  }

  /// Sort value of a linked item: its order property.
  fn linked_sort_value(&mut self, target: &str, id: ItemId) -> Result<SortValue> {
    let Some(target_def) = self.schema.get(target) else {
      return Ok(SortValue::Number(id.get() as f64));
    };
    let orderprop = target_def.orderprop().to_owned();
    let item = match self.item(target, id) {
      Ok(item) => item,
      Err(Error::NoSuchItem { .. }) => return Ok(SortValue::Null),
      Err(e) => return Err(e),
    };
    Ok(match item.value(&orderprop) {
      _ if orderprop == "id" => SortValue::Number(id.get() as f64),
      Some(value) => plain_sort_value(&value),
      None => SortValue::Null,
    })
  }

  // ── Full-text search ──

  /// Resolve index hits for `words` to items of `class`. Hits on classes
  /// linked from `class` are attributed through the linking property.
  /// `(class, prop)` pairs in `ignore` are skipped.
  pub fn search(&mut self, words: &[String], class: &str, ignore: &[(&str, &str)]) -> Result<SearchHits> {
    let def = self.class_def(class)?;
    let hits = self.backend.indexer().find(words)?;
    let mut results = SearchHits::new();
    for TextId { class: hit_class, id, prop } in hits.into_values() {
      if ignore.iter().any(|(c, p)| *c == hit_class && *p == prop) {
        continue;
      }
      if hit_class == class {
        match self.item(class, id) {
          Ok(item) if !item.retired => {
            results.entry(id).or_default();
          }
          Ok(_) | Err(Error::NoSuchItem { .. }) => {}
          Err(e) => return Err(e),
        }
        continue;
      }
      let linking: Vec<String> = def
        .props()
        .filter(|(_, ty)| ty.target() == Some(hit_class.as_str()))
        .map(|(name, _)| name.to_owned())
        .collect();
      for link_prop in linking {
        let predicate = [Predicate::LinksAny {
          prop: link_prop.clone(),
          ids:  BTreeSet::from([id]),
        }];
        for item in self.scan(class, &predicate, Retired::Exclude)? {
          results.entry(item.id).or_default().entry(link_prop.clone()).or_default().push(id);
        }
      }
    }
    for props in results.values_mut() {
      for ids in props.values_mut() {
        ids.sort();
        ids.dedup();
      }
    }
    Ok(results)
  }

  /// Rebuild index entries for `class`, or drop the whole index and rebuild
  /// every class. Returns how many items were indexed.
  pub fn reindex(&mut self, class: Option<&str>) -> Result<usize> {
    let classes: Vec<ClassDef> = match class {
      Some(name) => vec![self.class_def(name)?],
      None => {
        self.backend.indexer().force_reindex()?;
        self.schema.classes().cloned().collect()
      }
    };
    let mut indexed = 0;
    for def in classes {
      if !def.props().any(|(_, ty)| ty.is_indexed()) {
        continue;
      }
      for id in self.backend.node_ids(def.name(), true)? {
        let item = self.item(def.name(), id)?;
        let content = if def.is_file() { self.content_value(def.name(), id)? } else { None };
        self.index_item(&def, &item, content.as_ref(), None)?;
        indexed += 1;
      }
    }
    info!(indexed, "reindexed");
    Ok(indexed)
  }

  // ── Journal ──

  /// Journal of an item in timestamp order, including entries added in the
  /// current transaction.
  pub fn history(&mut self, class: &str, id: ItemId) -> Result<Vec<JournalEntry>> {
    let def = self.class_def(class)?;
    let stored = self.backend.get_journal(class, id)?;
    let mut entries = stored
      .into_iter()
      .map(|entry| journal::decode_entry(&def, entry))
      .collect::<Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.timestamp);
    Ok(entries)
  }

  /// Drop journal entries older than `before`, keeping every `create`
  /// entry. Returns how many were removed.
  pub fn pack(&mut self, before: Date) -> Result<usize> {
    self.writable()?;
    let cutoff = before.serialise();
    let names: Vec<String> = self.schema.class_names().map(str::to_owned).collect();
    let mut removed = 0;
    for name in names {
      removed += self.backend.pack(&name, &cutoff)?;
    }
    info!(removed, before = %before, "packed journals");
    Ok(removed)
  }

  // ── Labels ──

  /// Human-readable label of an item: its label property, or its id.
  pub fn get_label(&mut self, class: &str, id: ItemId) -> Result<String> {
    let def = self.class_def(class)?;
    let Some(prop) = def.labelprop(true) else {
      return Ok(id.to_string());
    };
    Ok(match self.get(class, id, prop)? {
      Some(value) if !value.to_string().is_empty() => value.to_string(),
      _ => id.to_string(),
    })
  }
}

/// Declared type of `prop`, or the type an implicit property reads as.
fn implicit_type(def: &ClassDef, prop: &str) -> Option<PropertyType> {
  match prop {
    "id" => Some(PropertyType::integer()),
    "creation" | "activity" => Some(PropertyType::Date),
    "creator" | "actor" => Some(PropertyType::link(USER_CLASS)),
    _ => def.prop_type(prop).cloned(),
  }
}

fn no_such_property(class: &str, prop: &str) -> Error {
  Error::NoSuchProperty {
    class: class.to_owned(),
    prop:  prop.to_owned(),
  }
}

fn plain_sort_value(value: &Value) -> SortValue {
  match value {
    Value::String(s) => SortValue::Text(s.clone()),
    Value::Password(p) => SortValue::Text(p.encode()),
    Value::Date(d) => SortValue::Date(*d),
    Value::Interval(i) => SortValue::Interval(i.as_seconds()),
    Value::Link(id) => SortValue::Number(id.get() as f64),
    Value::Multilink(ids) => SortValue::Many(ids.iter().map(|id| SortValue::Number(id.get() as f64)).collect()),
    Value::Boolean(b) => SortValue::Number(if *b { 1.0 } else { 0.0 }),
    Value::Number(n) => SortValue::Number(n.as_f64()),
  }
}
