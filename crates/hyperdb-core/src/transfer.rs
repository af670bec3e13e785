//! Export and import of items and journals in canonical text form.
//!
//! A row holds one cell per property name from
//! [`export_propnames`](Database::export_propnames) followed by the retired
//! flag. Unset values are `None`. Imports bypass auditors, reactors and the
//! journal; journals travel separately.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  Error, Result,
  codec,
  database::Database,
  date::Date,
  item::Item,
  journal::{self, Action, StoredEntry},
  schema::{ClassDef, IMPLICIT_PROPS},
  types::ItemId,
  value::Value,
};

pub type Row = Vec<Option<String>>;

/// `[item id, timestamp, actor id or "", action, params JSON]`.
pub type JournalRow = [String; 5];

/// One class worth of exported data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassExport {
  pub propnames: Vec<String>,
  pub rows:      Vec<Row>,
  pub journals:  Vec<JournalRow>,
}

/// A whole database, class by class.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Export {
  pub classes: BTreeMap<String, ClassExport>,
}

impl Database {
  // ── Items ──

  /// Declared properties sorted by name, then the implicit ones.
  pub fn export_propnames(&self, class: &str) -> Result<Vec<String>> {
    let def = self.schema.require(class)?;
    let mut names: Vec<String> = def.props().map(|(name, _)| name.to_owned()).collect();
    names.sort();
    names.extend(IMPLICIT_PROPS.iter().map(|p| (*p).to_owned()));
    Ok(names)
  }

  pub fn export_list(&mut self, class: &str, id: ItemId) -> Result<Row> {
    let def = self.class_def(class)?;
    let item = self.item(class, id)?;
    let mut row = Row::new();
    for prop in self.export_propnames(class)? {
      let value = if def.is_file() && prop == "content" {
        self.content_value(class, id)?
      } else {
        item.value(&prop)
      };
      row.push(value.as_ref().map(codec::to_text));
    }
    row.push(Some(if item.retired { "1" } else { "0" }.to_owned()));
    Ok(row)
  }

  /// Recreate an exported item under its original id.
  pub fn import_list(&mut self, class: &str, propnames: &[String], row: &[Option<String>]) -> Result<ItemId> {
    self.writable()?;
    let def = self.class_def(class)?;
    if row.len() != propnames.len() + 1 {
      return Err(Error::InvalidValue(format!(
        "{class} row has {} cells for {} properties",
        row.len(),
        propnames.len()
      )));
    }
    let cell = |prop: &str| {
      propnames
        .iter()
        .position(|p| p == prop)
        .and_then(|i| row[i].as_deref())
    };
    let id: ItemId = cell("id")
      .ok_or_else(|| Error::InvalidValue(format!("{class} row has no id")))?
      .parse()?;
    if self.exists(class, id)? {
      return Err(Error::KeyConflict {
        class: class.to_owned(),
        key:   id.to_string(),
      });
    }

    let created = match cell("creation") {
      Some(text) => Date::parse(text)?,
      None => Date::now(),
    };
    let link = |prop: &str| cell(prop).map(str::parse::<ItemId>).transpose();
    let mut item = Item::new(id, created, link("creator")?);
    if let Some(text) = cell("activity") {
      item.activity = Date::parse(text)?;
    }
    item.actor = link("actor")?.or(item.creator);
    item.retired = row.last().and_then(|c| c.as_deref()).and_then(codec::parse_bool).unwrap_or(false);

    let mut content = None;
    for (prop, text) in propnames.iter().zip(row) {
      let (Some(ty), Some(text)) = (def.prop_type(prop), text) else { continue };
      let value = codec::from_text(ty, text).map_err(|e| e.in_prop(class, prop))?;
      if def.is_file() && prop == "content" {
        content = Some(value);
      } else if !matches!(&value, Value::Multilink(ids) if ids.is_empty()) {
        item.values.insert(prop.clone(), value);
      }
    }

    let record = codec::encode_item(&def, &item)?;
    self.backend.add_node(class, id, &record)?;
    if self.backend.max_id(class)? < id.get() {
      self.backend.set_max_id(class, id.get())?;
    }
    if let Some(Value::String(text)) = &content {
      self.store_file(class, id, None, text.as_bytes())?;
    }
    self.cache.insert(class, item.clone());
    self.index_item(&def, &item, content.as_ref(), None)?;
    Ok(id)
  }

  // ── Journals ──

  /// Every journal entry of every item of `class`, retired items included.
  pub fn export_journals(&mut self, class: &str) -> Result<Vec<JournalRow>> {
    self.schema.require(class)?;
    let mut rows = Vec::new();
    for id in self.backend.node_ids(class, true)? {
      for entry in self.backend.get_journal(class, id)? {
        rows.push([
          entry.id.to_string(),
          entry.timestamp,
          entry.actor.map(|a| a.to_string()).unwrap_or_default(),
          entry.action.to_string(),
          journal::params_to_text(&entry.params),
        ]);
      }
    }
    Ok(rows)
  }

  /// Replace the journals of the items named in `rows`.
  pub fn import_journals(&mut self, class: &str, rows: &[JournalRow]) -> Result<usize> {
    self.writable()?;
    let def = self.class_def(class)?;
    let mut journals: BTreeMap<ItemId, Vec<StoredEntry>> = BTreeMap::new();
    for row in rows {
      let entry = parse_journal_row(&def, row)?;
      journals.entry(ItemId::new(entry.id)).or_default().push(entry);
    }
    let mut imported = 0;
    for (id, entries) in journals {
      self.backend.set_journal(class, id, &entries)?;
      imported += entries.len();
    }
    Ok(imported)
  }

  // ── Whole database ──

  pub fn export_all(&mut self) -> Result<Export> {
    let names: Vec<String> = self.schema.class_names().map(str::to_owned).collect();
    let mut export = Export::default();
    for name in names {
      let mut class = ClassExport {
        propnames: self.export_propnames(&name)?,
        ..ClassExport::default()
      };
      for id in self.backend.node_ids(&name, true)? {
        class.rows.push(self.export_list(&name, id)?);
      }
      class.journals = self.export_journals(&name)?;
      export.classes.insert(name, class);
    }
    Ok(export)
  }

  /// Load `export` into this database. Classes unknown to the schema fail
  /// the import with `NoSuchClass`.
  pub fn import_all(&mut self, export: &Export) -> Result<()> {
    let mut items = 0;
    for (name, class) in &export.classes {
      for row in &class.rows {
        self.import_list(name, &class.propnames, row)?;
        items += 1;
      }
      self.import_journals(name, &class.journals)?;
    }
    info!(classes = export.classes.len(), items, "imported database");
    Ok(())
  }
}

fn parse_journal_row(def: &ClassDef, row: &JournalRow) -> Result<StoredEntry> {
  let [id, timestamp, actor, action, params] = row;
  let id: ItemId = id.parse()?;
  let action: Action = action.parse()?;
  Date::parse(timestamp).map_err(|e| Error::corruption(def.name(), Some(id), e))?;
  let actor = match actor.trim() {
    "" => None,
    text => Some(text.parse::<ItemId>()?.get()),
  };
  Ok(StoredEntry {
    id: id.get(),
    timestamp: timestamp.clone(),
    actor,
    action,
    params: journal::params_from_text(def, action, params)?,
  })
}
