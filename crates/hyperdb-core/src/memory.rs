//! A backend that keeps everything in memory. Used for tests and for
//! throwaway trackers; nothing survives the handle.

use std::{collections::BTreeMap, path::PathBuf};

use crate::{
  Error, Result,
  backend::Backend,
  codec::{self, StoredRecord},
  indexer::{Indexer, MemoryIndexer, Tokeniser},
  journal::{Action, StoredEntry},
  schema::{ClassChange, ClassDescriptor, SchemaDescriptor},
  sessions::{MemorySessions, SessionStore},
  types::ItemId,
};

#[derive(Debug, Clone, Default)]
struct State {
  schema:   Option<SchemaDescriptor>,
  nodes:    BTreeMap<String, BTreeMap<u64, StoredRecord>>,
  journals: BTreeMap<String, BTreeMap<u64, Vec<StoredEntry>>>,
  ids:      BTreeMap<String, u64>,
}

#[derive(Debug)]
pub struct MemoryBackend {
  saved:    State,
  current:  State,
  indexer:  MemoryIndexer,
  sessions: MemorySessions,
  otks:     MemorySessions,
}

impl Default for MemoryBackend {
  fn default() -> Self { MemoryBackend::new(Tokeniser::default()) }
}

impl MemoryBackend {
  pub fn new(tokeniser: Tokeniser) -> Self {
    MemoryBackend {
      saved:    State::default(),
      current:  State::default(),
      indexer:  MemoryIndexer::new(tokeniser),
      sessions: MemorySessions::new("sessions"),
      otks:     MemorySessions::new("otks"),
    }
  }

  fn nodes(&mut self, class: &str) -> Result<&mut BTreeMap<u64, StoredRecord>> {
    self
      .current
      .nodes
      .get_mut(class)
      .ok_or_else(|| Error::NoSuchClass(class.to_owned()))
  }
}

impl Backend for MemoryBackend {
  fn name(&self) -> &'static str { "memory" }

  fn load_schema(&mut self) -> Result<Option<SchemaDescriptor>> { Ok(self.current.schema.clone()) }

  fn save_schema(&mut self, descriptor: &SchemaDescriptor) -> Result<()> {
    self.current.schema = Some(descriptor.clone());
    Ok(())
  }

  fn bind_schema(&mut self, descriptor: &SchemaDescriptor) -> Result<()> {
    for name in descriptor.tables.keys() {
      self.current.nodes.entry(name.clone()).or_default();
      self.current.journals.entry(name.clone()).or_default();
    }
    Ok(())
  }

  fn create_class(&mut self, name: &str, _class: &ClassDescriptor) -> Result<()> {
    self.current.nodes.insert(name.to_owned(), BTreeMap::new());
    self.current.journals.insert(name.to_owned(), BTreeMap::new());
    self.current.ids.insert(name.to_owned(), 0);
    Ok(())
  }

  fn drop_class(&mut self, name: &str) -> Result<()> {
    self.current.nodes.remove(name);
    self.current.journals.remove(name);
    self.current.ids.remove(name);
    Ok(())
  }

  fn update_class(&mut self, change: &ClassChange) -> Result<()> {
    let nodes = self.nodes(&change.name)?;
    for record in nodes.values_mut() {
      for prop in &change.removed {
        record.values.remove(prop);
      }
      for prop in &change.retyped {
        let (Some(old), Some(new)) = (change.old.prop_type(prop), change.new.prop_type(prop)) else {
          continue;
        };
        let converted = record.values.get(prop).and_then(|v| codec::convert(&old, &new, v));
        match converted {
          Some(value) => record.values.insert(prop.clone(), value),
          None => record.values.remove(prop),
        };
      }
    }
    Ok(())
  }

  fn new_id(&mut self, class: &str) -> Result<ItemId> {
    let next = self.current.ids.entry(class.to_owned()).or_insert(0);
    *next += 1;
    Ok(ItemId::new(*next))
  }

  fn max_id(&mut self, class: &str) -> Result<u64> {
    Ok(self.current.ids.get(class).copied().unwrap_or(0))
  }

  fn set_max_id(&mut self, class: &str, id: u64) -> Result<()> {
    let current = self.current.ids.entry(class.to_owned()).or_insert(0);
    *current = (*current).max(id);
    Ok(())
  }

  fn add_node(&mut self, class: &str, id: ItemId, record: &StoredRecord) -> Result<()> {
    self.nodes(class)?.insert(id.get(), record.clone());
    Ok(())
  }

  fn set_node(&mut self, class: &str, id: ItemId, record: &StoredRecord) -> Result<()> {
    let slot = self.nodes(class)?.get_mut(&id.get()).ok_or_else(|| Error::NoSuchItem {
      class: class.to_owned(),
      id,
    })?;
    *slot = record.clone();
    Ok(())
  }

  fn get_node(&mut self, class: &str, id: ItemId) -> Result<Option<StoredRecord>> {
    Ok(self.nodes(class)?.get(&id.get()).cloned())
  }

  fn destroy_node(&mut self, class: &str, id: ItemId) -> Result<()> {
    self.nodes(class)?.remove(&id.get());
    if let Some(journals) = self.current.journals.get_mut(class) {
      journals.remove(&id.get());
    }
    Ok(())
  }

  fn node_ids(&mut self, class: &str, include_retired: bool) -> Result<Vec<ItemId>> {
    Ok(
      self
        .nodes(class)?
        .iter()
        .filter(|(_, record)| include_retired || !record.retired)
        .map(|(id, _)| ItemId::new(*id))
        .collect(),
    )
  }

  fn add_journal(&mut self, class: &str, entry: &StoredEntry) -> Result<()> {
    self
      .current
      .journals
      .entry(class.to_owned())
      .or_default()
      .entry(entry.id)
      .or_default()
      .push(entry.clone());
    Ok(())
  }

  fn get_journal(&mut self, class: &str, id: ItemId) -> Result<Vec<StoredEntry>> {
    Ok(
      self
        .current
        .journals
        .get(class)
        .and_then(|j| j.get(&id.get()))
        .cloned()
        .unwrap_or_default(),
    )
  }

  fn set_journal(&mut self, class: &str, id: ItemId, entries: &[StoredEntry]) -> Result<()> {
    self
      .current
      .journals
      .entry(class.to_owned())
      .or_default()
      .insert(id.get(), entries.to_vec());
    Ok(())
  }

  fn pack(&mut self, class: &str, before: &str) -> Result<usize> {
    let mut removed = 0;
    if let Some(journals) = self.current.journals.get_mut(class) {
      for entries in journals.values_mut() {
        let len = entries.len();
        entries.retain(|e| e.action == Action::Create || e.timestamp.as_str() >= before);
        removed += len - entries.len();
      }
    }
    Ok(removed)
  }

  fn indexer(&mut self) -> &mut dyn Indexer { &mut self.indexer }

  fn sessions(&mut self) -> &mut dyn SessionStore { &mut self.sessions }

  fn otks(&mut self) -> &mut dyn SessionStore { &mut self.otks }

  fn blob_dir(&self) -> Option<PathBuf> { None }

  fn commit(&mut self) -> Result<()> {
    self.saved = self.current.clone();
    Ok(())
  }

  fn rollback(&mut self) -> Result<()> {
    self.current = self.saved.clone();
    Ok(())
  }

  fn close(&mut self) -> Result<()> { self.rollback() }
}
