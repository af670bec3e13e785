//! [`DbmBackend`]: the file profile.
//!
//! ```text
//! <home>/db/
//! ├─ lockfile          exclusive while a handle is open
//! ├─ version           storage format
//! ├─ schema            descriptor
//! ├─ ids               per-class id counters
//! ├─ nodes.<class>     id → record
//! ├─ journals.<class>  id → journal entries
//! ├─ indexes/          per-letter word segments
//! ├─ sessions, otks
//! └─ files/            blobs
//! ```
//!
//! Every table is read whole on first use and rewritten whole on commit.

use std::{
  collections::{BTreeMap, BTreeSet},
  path::{Path, PathBuf},
};

use hyperdb_core::{
  Backend, ItemId, TrackerConfig,
  codec::{self, StoredRecord},
  indexer::Indexer,
  journal::{Action, StoredEntry},
  schema::{ClassChange, ClassDescriptor, SchemaDescriptor},
  sessions::SessionStore,
};
use tracing::{debug, info};

use crate::{
  Error, Result,
  file::{Lockfile, Table, read_optional, remove_optional, write_atomic},
  indexer::DbmIndexer,
  sessions::DbmSessions,
};

pub const FORMAT_VERSION: u32 = 1;

type Nodes = BTreeMap<u64, StoredRecord>;
type Journals = BTreeMap<u64, Vec<StoredEntry>>;

struct ClassFiles {
  nodes:    Table<Nodes>,
  journals: Table<Journals>,
}

impl ClassFiles {
  fn paths(dir: &Path, class: &str) -> (PathBuf, PathBuf) {
    (dir.join(format!("nodes.{class}")), dir.join(format!("journals.{class}")))
  }

  fn existing(dir: &Path, class: &str) -> Self {
    let (nodes, journals) = Self::paths(dir, class);
    ClassFiles {
      nodes:    Table::new(class, nodes),
      journals: Table::new(class, journals),
    }
  }

  fn fresh(dir: &Path, class: &str) -> Self {
    let (nodes, journals) = Self::paths(dir, class);
    ClassFiles {
      nodes:    Table::fresh(class, nodes),
      journals: Table::fresh(class, journals),
    }
  }

  fn discard(&mut self) {
    self.nodes.discard();
    self.journals.discard();
  }
}

/// A hyperdb backend over a directory of whole-file tables.
pub struct DbmBackend {
  dir:      PathBuf,
  lock:     Option<Lockfile>,
  schema:   Table<Option<SchemaDescriptor>>,
  ids:      Table<BTreeMap<String, u64>>,
  classes:  BTreeMap<String, ClassFiles>,
  /// Classes whose files go at the next commit.
  dropped:  BTreeSet<String>,
  indexer:  DbmIndexer,
  sessions: DbmSessions,
  otks:     DbmSessions,
  files:    PathBuf,
}

impl std::fmt::Debug for DbmBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DbmBackend")
      .field("dir", &self.dir)
      .field("classes", &self.classes.keys().collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

impl DbmBackend {
  /// Lock and open the tracker database under `config.db_dir()`, creating
  /// it if needed.
  pub fn open(config: &TrackerConfig) -> Result<Self> {
    let dir = config.db_dir();
    std::fs::create_dir_all(&dir).map_err(Error::io(&dir))?;
    let lock = Lockfile::acquire(dir.join("lockfile"))?;

    let version_path = dir.join("version");
    let existing = match read_optional(&version_path)? {
      Some(bytes) => {
        let text = String::from_utf8_lossy(&bytes);
        let found: u32 = text.trim().parse().map_err(|_| Error::Corrupt {
          label:  "version".into(),
          detail: format!("unreadable format version {:?}", text.trim()),
        })?;
        if found > FORMAT_VERSION {
          return Err(Error::TooNew {
            found,
            supported: FORMAT_VERSION,
          });
        }
        true
      }
      None => {
        write_atomic(&version_path, FORMAT_VERSION.to_string().as_bytes())?;
        false
      }
    };

    let indexer = DbmIndexer::open(dir.join("indexes"), config.tokeniser()?, existing)?;
    info!(path = %dir.display(), existing, "opened dbm database");
    Ok(DbmBackend {
      schema: Table::new("schema", dir.join("schema")),
      ids: Table::new("ids", dir.join("ids")),
      classes: BTreeMap::new(),
      dropped: BTreeSet::new(),
      indexer,
      sessions: DbmSessions::new("sessions", dir.join("sessions")),
      otks: DbmSessions::new("otks", dir.join("otks")),
      files: config.files_dir(),
      lock: Some(lock),
      dir,
    })
  }

  fn class(&mut self, class: &str) -> Result<&mut ClassFiles> {
    self.classes.get_mut(class).ok_or_else(|| Error::Unbound(class.to_owned()))
  }

  fn nodes(&mut self, class: &str) -> Result<&mut Nodes> { self.class(class)?.nodes.get_mut() }

  fn journals(&mut self, class: &str) -> Result<&mut Journals> { self.class(class)?.journals.get_mut() }

  fn discard(&mut self) {
    self.schema.discard();
    self.ids.discard();
    for files in self.classes.values_mut() {
      files.discard();
    }
    for name in std::mem::take(&mut self.dropped) {
      self.classes.insert(name.clone(), ClassFiles::existing(&self.dir, &name));
    }
  }
}

fn update_records(nodes: &mut Nodes, change: &ClassChange) {
  for record in nodes.values_mut() {
    for prop in &change.removed {
      record.values.remove(prop);
    }
    for prop in &change.retyped {
      let (Some(old), Some(new)) = (change.old.prop_type(prop), change.new.prop_type(prop)) else {
        continue;
      };
      if let Some(stored) = record.values.remove(prop)
        && let Some(converted) = codec::convert(&old, &new, &stored)
      {
        record.values.insert(prop.clone(), converted);
      }
    }
  }
}

impl Backend for DbmBackend {
  fn name(&self) -> &'static str { "dbm" }

  // ── Schema ──

  fn load_schema(&mut self) -> hyperdb_core::Result<Option<SchemaDescriptor>> { Ok(self.schema.get()?.clone()) }

  fn save_schema(&mut self, descriptor: &SchemaDescriptor) -> hyperdb_core::Result<()> {
    *self.schema.get_mut()? = Some(descriptor.clone());
    Ok(())
  }

  fn bind_schema(&mut self, descriptor: &SchemaDescriptor) -> hyperdb_core::Result<()> {
    for name in descriptor.tables.keys() {
      if !self.classes.contains_key(name) {
        self.classes.insert(name.clone(), ClassFiles::existing(&self.dir, name));
      }
    }
    Ok(())
  }

  fn create_class(&mut self, name: &str, _class: &ClassDescriptor) -> hyperdb_core::Result<()> {
    self.dropped.remove(name);
    self.classes.insert(name.to_owned(), ClassFiles::fresh(&self.dir, name));
    self.ids.get_mut()?.entry(name.to_owned()).or_insert(0);
    Ok(())
  }

  fn drop_class(&mut self, name: &str) -> hyperdb_core::Result<()> {
    self.classes.remove(name);
    self.ids.get_mut()?.remove(name);
    self.dropped.insert(name.to_owned());
    Ok(())
  }

  fn update_class(&mut self, change: &ClassChange) -> hyperdb_core::Result<()> {
    if change.removed.is_empty() && change.retyped.is_empty() {
      return Ok(());
    }
    update_records(self.nodes(&change.name)?, change);
    Ok(())
  }

  // ── Items ──

  fn new_id(&mut self, class: &str) -> hyperdb_core::Result<ItemId> {
    let counter = self.ids.get_mut()?.entry(class.to_owned()).or_insert(0);
    *counter += 1;
    Ok(ItemId::new(*counter))
  }

  fn max_id(&mut self, class: &str) -> hyperdb_core::Result<u64> {
    Ok(self.ids.get()?.get(class).copied().unwrap_or(0))
  }

  fn set_max_id(&mut self, class: &str, id: u64) -> hyperdb_core::Result<()> {
    let counter = self.ids.get_mut()?.entry(class.to_owned()).or_insert(0);
    *counter = (*counter).max(id);
    Ok(())
  }

  fn add_node(&mut self, class: &str, id: ItemId, record: &StoredRecord) -> hyperdb_core::Result<()> {
    self.nodes(class)?.insert(id.get(), record.clone());
    debug!(class, id = %id, "stored record");
    Ok(())
  }

  fn set_node(&mut self, class: &str, id: ItemId, record: &StoredRecord) -> hyperdb_core::Result<()> {
    match self.nodes(class)?.get_mut(&id.get()) {
      Some(slot) => {
        *slot = record.clone();
        Ok(())
      }
      None => Err(hyperdb_core::Error::NoSuchItem {
        class: class.to_owned(),
        id,
      }),
    }
  }

  fn get_node(&mut self, class: &str, id: ItemId) -> hyperdb_core::Result<Option<StoredRecord>> {
    Ok(self.class(class)?.nodes.get()?.get(&id.get()).cloned())
  }

  fn destroy_node(&mut self, class: &str, id: ItemId) -> hyperdb_core::Result<()> {
    self.nodes(class)?.remove(&id.get());
    self.journals(class)?.remove(&id.get());
    Ok(())
  }

  fn node_ids(&mut self, class: &str, include_retired: bool) -> hyperdb_core::Result<Vec<ItemId>> {
    let nodes = self.class(class)?.nodes.get()?;
    Ok(
      nodes
        .iter()
        .filter(|(_, record)| include_retired || !record.retired)
        .map(|(id, _)| ItemId::new(*id))
        .collect(),
    )
  }

  // ── Journal ──

  fn add_journal(&mut self, class: &str, entry: &StoredEntry) -> hyperdb_core::Result<()> {
    self.journals(class)?.entry(entry.id).or_default().push(entry.clone());
    Ok(())
  }

  fn get_journal(&mut self, class: &str, id: ItemId) -> hyperdb_core::Result<Vec<StoredEntry>> {
    Ok(self.class(class)?.journals.get()?.get(&id.get()).cloned().unwrap_or_default())
  }

  fn set_journal(&mut self, class: &str, id: ItemId, entries: &[StoredEntry]) -> hyperdb_core::Result<()> {
    let journals = self.journals(class)?;
    if entries.is_empty() {
      journals.remove(&id.get());
    } else {
      journals.insert(id.get(), entries.to_vec());
    }
    Ok(())
  }

  fn pack(&mut self, class: &str, before: &str) -> hyperdb_core::Result<usize> {
    let mut removed = 0;
    for entries in self.journals(class)?.values_mut() {
      let kept = entries.len();
      entries.retain(|e| e.action == Action::Create || e.timestamp.as_str() >= before);
      removed += kept - entries.len();
    }
    Ok(removed)
  }

  // ── Secondary stores ──

  fn indexer(&mut self) -> &mut dyn Indexer { &mut self.indexer }

  fn sessions(&mut self) -> &mut dyn SessionStore { &mut self.sessions }

  fn otks(&mut self) -> &mut dyn SessionStore { &mut self.otks }

  fn blob_dir(&self) -> Option<PathBuf> { Some(self.files.clone()) }

  // ── Lifecycle ──

  fn commit(&mut self) -> hyperdb_core::Result<()> {
    for name in std::mem::take(&mut self.dropped) {
      let (nodes, journals) = ClassFiles::paths(&self.dir, &name);
      remove_optional(&nodes)?;
      remove_optional(&journals)?;
      info!(class = %name, "removed class files");
    }
    for files in self.classes.values_mut() {
      files.nodes.flush()?;
      files.journals.flush()?;
    }
    self.ids.flush()?;
    self.schema.flush()?;
    Ok(())
  }

  fn rollback(&mut self) -> hyperdb_core::Result<()> {
    self.discard();
    Ok(())
  }

  fn close(&mut self) -> hyperdb_core::Result<()> {
    self.discard();
    if let Some(lock) = self.lock.take() {
      lock.release()?;
    }
    debug!(path = %self.dir.display(), "closed dbm database");
    Ok(())
  }
}
