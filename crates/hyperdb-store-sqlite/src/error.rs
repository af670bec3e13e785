//! Error type for `hyperdb-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] hyperdb_core::Error),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The file was written by a newer version of this crate.
  #[error("database format {found} is newer than the supported format {supported}")]
  TooNew { found: i64, supported: i64 },

  #[error("class {0} has no table")]
  Unbound(String),

  #[error("connection lock poisoned")]
  Poisoned,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for hyperdb_core::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::Core(inner) => inner,
      Error::Unbound(class) => hyperdb_core::Error::NoSuchClass(class),
      other => hyperdb_core::Error::storage(other),
    }
  }
}
