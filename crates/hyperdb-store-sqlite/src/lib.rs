//! SQLite backend for hyperdb.
//!
//! One table per class (`_<class>`), one journal table per class
//! (`<class>__journal`), one join table per multilink (`<class>_<prop>`),
//! plus `schema`, `ids`, `sessions`, `otks`, `__textids` and `__words`.
//! The storage format is versioned with `PRAGMA user_version`.

mod conn;
mod encode;
mod indexer;
mod schema;
mod sessions;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use schema::FORMAT_VERSION;
pub use store::SqliteBackend;
