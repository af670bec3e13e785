//! The `Database` handle: one backend, one schema, one actor, one open
//! transaction.
//!
//! Item operations live in `ops` (mutations), `query` (reads) and
//! `transfer` (export/import); this module holds the handle itself, schema
//! synchronisation on open and the transaction boundaries.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  backend::Backend,
  blob::BlobStore,
  cache::ItemCache,
  codec::Stored,
  config::TrackerConfig,
  item::Item,
  schema::{ClassDef, Schema, SchemaChange, SchemaDescriptor},
  trigger::{Audit, Event, Reaction, Triggers},
  txn::Transaction,
  types::ItemId,
  value::Changes,
};

pub struct Database {
  pub(crate) backend:  Box<dyn Backend>,
  pub(crate) schema:   Schema,
  pub(crate) config:   TrackerConfig,
  pub(crate) actor:    Option<ItemId>,
  pub(crate) cache:    ItemCache,
  pub(crate) triggers: Triggers,
  pub(crate) txn:      Transaction,
  pub(crate) blobs:    BlobStore,
  revision:            u32,
}

impl std::fmt::Debug for Database {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Database")
      .field("backend", &self.backend.name())
      .field("actor", &self.actor)
      .field("revision", &self.revision)
      .finish_non_exhaustive()
  }
}

impl Database {
  // ── Lifecycle ──

  /// Open a database over `backend`, bringing its stored schema in line with
  /// `schema`. `actor` is the user mutations are attributed to; `None` opens
  /// the database read-only.
  pub fn open(
    backend: Box<dyn Backend>,
    schema: Schema,
    config: TrackerConfig,
    actor: Option<ItemId>,
  ) -> Result<Self> {
    schema.validate()?;
    let blobs = match backend.blob_dir() {
      Some(dir) => BlobStore::disk(dir),
      None => BlobStore::memory(),
    };
    let recovered = blobs.recover()?;
    if recovered > 0 {
      warn!(count = recovered, "discarded staged blobs from an earlier crash");
    }

    let mut db = Database {
      backend,
      cache: ItemCache::new(config.cache_size),
      schema,
      config,
      actor,
      triggers: Triggers::default(),
      txn: Transaction::new(),
      blobs,
      revision: 0,
    };
    db.sync_schema()?;
    if db.backend.indexer().should_reindex() {
      info!("index is stale, rebuilding");
      db.reindex(None)?;
    }
    db.commit()?;
    info!(
      backend = db.backend.name(),
      classes = db.schema.classes().count(),
      revision = db.revision,
      "opened database"
    );
    Ok(db)
  }

  /// Roll back uncommitted work and release the backend.
  pub fn close(mut self) -> Result<()> {
    self.rollback()?;
    self.backend.close()?;
    debug!("closed database");
    Ok(())
  }

  /// Make every change since the last boundary durable, then run deferred
  /// actions and flush the index. When the backend refuses the commit, the
  /// transaction is rolled back before the error is returned.
  pub fn commit(&mut self) -> Result<()> {
    if let Err(err) = self.backend.commit() {
      warn!(backend = self.backend.name(), error = %err, "commit failed, rolling back");
      if let Err(undo) = self.rollback() {
        warn!(error = %undo, "rollback after a failed commit failed");
      }
      return Err(err);
    }
    let deferred = self.txn.run(&mut self.blobs);
    let index = self.backend.indexer().save_index();
    debug!(backend = self.backend.name(), "committed");
    deferred?;
    index
  }

  /// Discard every change since the last boundary.
  pub fn rollback(&mut self) -> Result<()> {
    self.backend.rollback()?;
    self.backend.indexer().rollback()?;
    self.txn.undo(&mut self.blobs)?;
    self.cache.clear();
    debug!(backend = self.backend.name(), "rolled back");
    Ok(())
  }

  // ── Accessors ──

  pub fn schema(&self) -> &Schema { &self.schema }

  pub fn config(&self) -> &TrackerConfig { &self.config }

  pub fn backend_name(&self) -> &'static str { self.backend.name() }

  /// Revision of the persisted schema descriptor.
  pub fn schema_revision(&self) -> u32 { self.revision }

  pub fn actor(&self) -> Option<ItemId> { self.actor }

  /// Attribute later mutations to `actor`; `None` makes the handle read-only.
  pub fn set_actor(&mut self, actor: Option<ItemId>) { self.actor = actor; }

  pub fn class(&self, name: &str) -> Result<&ClassDef> { self.schema.require(name) }

  pub fn sessions(&mut self) -> &mut dyn crate::sessions::SessionStore { self.backend.sessions() }

  pub fn otks(&mut self) -> &mut dyn crate::sessions::SessionStore { self.backend.otks() }

  pub(crate) fn writable(&self) -> Result<ItemId> { self.actor.ok_or(Error::ReadOnly) }

  // ── Triggers ──

  /// Register an auditor for `event` on `class`. Auditors run in
  /// registration order before the write and may edit the incoming values.
  pub fn audit<F>(&mut self, class: &str, event: Event, auditor: F)
  where
    F: Fn(&mut Database, &Audit<'_>, &mut Changes) -> Result<()> + Send + Sync + 'static,
  {
    self.triggers.audit(class, event, Arc::new(auditor));
  }

  /// Register a reactor for `event` on `class`. Reactors run in registration
  /// order after the write; an error from one rolls the transaction back.
  pub fn react<F>(&mut self, class: &str, event: Event, reactor: F)
  where
    F: Fn(&mut Database, &Reaction<'_>) -> Result<()> + Send + Sync + 'static,
  {
    self.triggers.react(class, event, Arc::new(reactor));
  }

  pub(crate) fn fire_auditors(
    &mut self,
    class: &str,
    event: Event,
    id: Option<ItemId>,
    changes: &mut Changes,
  ) -> Result<()> {
    let audit = Audit { class, event, id };
    for auditor in self.triggers.auditors(class, event) {
      auditor(self, &audit, changes)?;
    }
    Ok(())
  }

  pub(crate) fn fire_reactors(
    &mut self,
    class: &str,
    event: Event,
    id: ItemId,
    old: Option<&Item>,
  ) -> Result<()> {
    let reaction = Reaction { class, event, id, old };
    for reactor in self.triggers.reactors(class, event) {
      if let Err(err) = reactor(self, &reaction) {
        warn!(class, id = %id, %event, error = %err, "reactor failed, rolling back");
        self.rollback()?;
        return Err(err);
      }
    }
    Ok(())
  }

  // ── Schema synchronisation ──

  fn sync_schema(&mut self) -> Result<()> {
    let mut live = self.schema.descriptor(1);
    let Some(stored) = self.backend.load_schema()? else {
      for (name, class) in &live.tables {
        self.backend.create_class(name, class)?;
      }
      self.backend.save_schema(&live)?;
      self.backend.bind_schema(&live)?;
      self.revision = live.version;
      info!(classes = live.tables.len(), "created schema");
      return Ok(());
    };

    live.version = stored.version;
    self.backend.bind_schema(&stored)?;
    let changes = stored.diff(&live);
    if changes.is_empty() {
      self.revision = stored.version;
      return Ok(());
    }

    for change in &changes {
      match change {
        SchemaChange::DropClass { name, .. } => {
          info!(class = %name, "dropping class");
          self.backend.drop_class(name)?;
        }
        SchemaChange::UpdateClass(change) => {
          info!(
            class = %change.name,
            added = ?change.added,
            removed = ?change.removed,
            retyped = ?change.retyped,
            key_changed = change.key_changed,
            "updating class"
          );
          if change.key_changed
            && let Some(key) = &change.new.key
            && !change.added.contains(key)
          {
            self.check_stored_keys_unique(&change.name, key)?;
          }
          self.backend.update_class(change)?;
        }
        SchemaChange::AddClass { name, class } => {
          info!(class = %name, "adding class");
          self.backend.create_class(name, class)?;
        }
      }
    }
    live.version = stored.version + 1;
    self.backend.save_schema(&live)?;
    self.backend.bind_schema(&live)?;
    self.revision = live.version;
    Ok(())
  }

  /// Fail with `KeyConflict` if two live items already share a value of
  /// `key`, which is about to become the key property.
  fn check_stored_keys_unique(&mut self, class: &str, key: &str) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for id in self.backend.node_ids(class, false)? {
      let Some(record) = self.backend.get_node(class, id)? else { continue };
      if let Some(Stored::Text(value)) = record.values.get(key)
        && !seen.insert(value.clone())
      {
        return Err(Error::KeyConflict {
          class: class.to_owned(),
          key:   value.clone(),
        });
      }
    }
    Ok(())
  }

  /// The descriptor the database currently runs against.
  pub fn descriptor(&self) -> SchemaDescriptor { self.schema.descriptor(self.revision) }
}
