//! Error type for `hyperdb-store-dbm`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] hyperdb_core::Error),

  #[error("io error on {path}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("encode error: {0}")]
  Encode(#[from] bincode::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A file could not be decoded. `label` names the class or table.
  #[error("{label} is unreadable: {detail}")]
  Corrupt { label: String, detail: String },

  #[error("database format {found} is newer than the supported format {supported}")]
  TooNew { found: u32, supported: u32 },

  #[error("class {0} has no files")]
  Unbound(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
    let path = path.into();
    move |source| Error::Io { path, source }
  }
}

impl From<Error> for hyperdb_core::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::Core(inner) => inner,
      Error::Unbound(class) => hyperdb_core::Error::NoSuchClass(class),
      Error::Corrupt { label, detail } => hyperdb_core::Error::corruption(&label, None, detail),
      other => hyperdb_core::Error::storage(other),
    }
  }
}
