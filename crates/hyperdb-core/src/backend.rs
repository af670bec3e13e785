//! The storage contract every physical backend implements.
//!
//! Backends deal only in class names, raw ids and [`Stored`](crate::codec::Stored)
//! scalars; typing, validation, journalling policy and triggers stay in
//! [`Database`](crate::Database). A backend holds one open transaction at a
//! time: writes are visible to its own reads at once and become durable on
//! [`commit`](Backend::commit).

use std::path::PathBuf;

use crate::{
  Result,
  codec::StoredRecord,
  filter::Predicate,
  indexer::Indexer,
  journal::StoredEntry,
  schema::{ClassChange, ClassDescriptor, SchemaDescriptor},
  sessions::SessionStore,
  types::ItemId,
};

pub trait Backend: Send {
  /// Short name for logs: `"dbm"`, `"sqlite"`, `"memory"`.
  fn name(&self) -> &'static str;

  // ── Schema ──

  /// The descriptor saved by the last [`save_schema`](Backend::save_schema),
  /// or `None` for a new database.
  fn load_schema(&mut self) -> Result<Option<SchemaDescriptor>>;

  fn save_schema(&mut self, descriptor: &SchemaDescriptor) -> Result<()>;

  /// Tell the backend which descriptor its records follow. Called on open
  /// after any schema changes have been applied.
  fn bind_schema(&mut self, descriptor: &SchemaDescriptor) -> Result<()>;

  fn create_class(&mut self, name: &str, class: &ClassDescriptor) -> Result<()>;

  fn drop_class(&mut self, name: &str) -> Result<()>;

  /// Apply added, removed and retyped properties and a key change to stored
  /// items. Retyped values go through [`codec::convert`](crate::codec::convert).
  fn update_class(&mut self, change: &ClassChange) -> Result<()>;

  // ── Items ──

  /// Allocate the next id of `class`.
  fn new_id(&mut self, class: &str) -> Result<ItemId>;

  /// The highest id allocated so far, `0` if none.
  fn max_id(&mut self, class: &str) -> Result<u64>;

  /// Raise the id counter to at least `id`.
  fn set_max_id(&mut self, class: &str, id: u64) -> Result<()>;

  fn add_node(&mut self, class: &str, id: ItemId, record: &StoredRecord) -> Result<()>;

  fn set_node(&mut self, class: &str, id: ItemId, record: &StoredRecord) -> Result<()>;

  fn get_node(&mut self, class: &str, id: ItemId) -> Result<Option<StoredRecord>>;

  fn destroy_node(&mut self, class: &str, id: ItemId) -> Result<()>;

  /// Ids of stored items in ascending order.
  fn node_ids(&mut self, class: &str, include_retired: bool) -> Result<Vec<ItemId>>;

  /// A superset of the ids matching `predicates`, or `None` to have the
  /// caller scan every item. The caller re-checks each predicate.
  fn candidates(&mut self, class: &str, predicates: &[Predicate]) -> Result<Option<Vec<ItemId>>> {
    let _ = (class, predicates);
    Ok(None)
  }

  // ── Journal ──

  fn add_journal(&mut self, class: &str, entry: &StoredEntry) -> Result<()>;

  /// Entries for `id` including those not yet committed, in the order added.
  fn get_journal(&mut self, class: &str, id: ItemId) -> Result<Vec<StoredEntry>>;

  /// Replace the journal of `id`.
  fn set_journal(&mut self, class: &str, id: ItemId, entries: &[StoredEntry]) -> Result<()>;

  /// Remove every non-create entry stamped before `before` (a serialised
  /// date). Returns how many were removed.
  fn pack(&mut self, class: &str, before: &str) -> Result<usize>;

  // ── Secondary stores ──

  fn indexer(&mut self) -> &mut dyn Indexer;

  fn sessions(&mut self) -> &mut dyn SessionStore;

  fn otks(&mut self) -> &mut dyn SessionStore;

  /// Directory for blobs, or `None` to keep them in memory.
  fn blob_dir(&self) -> Option<PathBuf>;

  // ── Lifecycle ──

  fn commit(&mut self) -> Result<()>;

  fn rollback(&mut self) -> Result<()>;

  /// Release locks and connections. Uncommitted work is discarded.
  fn close(&mut self) -> Result<()>;
}
