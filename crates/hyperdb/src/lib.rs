//! Open a hyperdb tracker database on the backend its configuration names.
//!
//! ```no_run
//! use hyperdb::{BackendKind, ClassDef, ItemId, PropertyType, Schema, TrackerConfig, props};
//!
//! let schema = Schema::new()
//!   .class(ClassDef::new("status").prop("name", PropertyType::string()).key("name"))
//!   .class(ClassDef::new("user").prop("username", PropertyType::string()).key("username"));
//! let config = TrackerConfig::at("/srv/tracker", BackendKind::Sqlite);
//! let mut db = hyperdb::open(config, schema, Some(ItemId::new(1)))?;
//! db.create("status", props! { "name" => "open" })?;
//! db.commit()?;
//! # Ok::<(), hyperdb::Error>(())
//! ```

use std::path::Path;

pub use hyperdb_core::*;
pub use hyperdb_store_dbm::DbmBackend;
pub use hyperdb_store_sqlite::SqliteBackend;
use tracing::debug;

/// The storage backend `config` selects, opened and ready for
/// [`Database::open`].
pub fn backend(config: &TrackerConfig) -> Result<Box<dyn Backend>> {
  debug!(backend = ?config.backend, home = %config.home.display(), "opening backend");
  Ok(match config.backend {
    BackendKind::Dbm => Box::new(DbmBackend::open(config)?),
    BackendKind::Sqlite => Box::new(SqliteBackend::open(config)?),
    BackendKind::Memory => Box::new(MemoryBackend::new(config.tokeniser()?)),
  })
}

/// Open the database described by `config` with `schema`, attributing
/// mutations to `actor` (`None` for a read-only handle).
pub fn open(config: TrackerConfig, schema: Schema, actor: Option<ItemId>) -> Result<Database> {
  let backend = backend(&config)?;
  Database::open(backend, schema, config, actor)
}

/// Like [`open`], reading the configuration from a TOML file overlaid with
/// `HYPERDB_*` environment variables.
pub fn open_with_config_file(
  path: impl AsRef<Path>,
  schema: Schema,
  actor: Option<ItemId>,
) -> Result<Database> {
  open(TrackerConfig::load(path)?, schema, actor)
}
