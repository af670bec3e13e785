//! File-profile backend for hyperdb: one whole-file table per class for
//! records and one for journals, a tracker-wide lockfile, per-letter
//! compressed index segments and JSON session stores.

mod file;
mod indexer;
mod sessions;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use indexer::INDEX_VERSION;
pub use store::{DbmBackend, FORMAT_VERSION};
