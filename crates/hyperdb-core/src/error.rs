//! Error taxonomy for `hyperdb-core`.
//!
//! Every fallible operation in the workspace surfaces one of these variants.
//! [`Error::kind`] collapses them into the categories callers branch on when
//! translating failures into user-facing messages.

use thiserror::Error;

use crate::types::ItemId;

#[derive(Debug, Error)]
pub enum Error {
  #[error("no such class: {0}")]
  NoSuchClass(String),

  #[error("no such item: {class}{id}")]
  NoSuchItem { class: String, id: ItemId },

  #[error("no such key {key:?} in class {class}")]
  NoSuchKey { class: String, key: String },

  #[error("class {class} has no property {prop:?}")]
  NoSuchProperty { class: String, prop: String },

  #[error("{class}.{prop}: {message}")]
  TypeMismatch {
    class:   String,
    prop:    String,
    message: String,
  },

  #[error("{class}.{prop}: link to {target}{id} would dangle")]
  LinkDangling {
    class:  String,
    prop:   String,
    target: String,
    id:     ItemId,
  },

  #[error("key {key:?} is already used in class {class}")]
  KeyConflict { class: String, key: String },

  #[error("{0:?} is a reserved property name")]
  ReservedName(String),

  #[error("database is read-only: no actor is set")]
  ReadOnly,

  #[error("rejected: {0}")]
  Reject(String),

  #[error("corrupt data in {class}{}: {detail}", item_suffix(.id))]
  Corruption {
    class:  String,
    id:     Option<ItemId>,
    detail: String,
  },

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("invalid schema: {0}")]
  Schema(String),

  #[error("invalid value: {0}")]
  InvalidValue(String),

  #[error("password scheme {0:?} cannot be computed")]
  UnsupportedScheme(String),

  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),
}

fn item_suffix(id: &Option<ItemId>) -> String {
  id.map(|id| id.to_string()).unwrap_or_default()
}

/// Field-less category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  NoSuchClass,
  NoSuchItem,
  NoSuchKey,
  NoSuchProperty,
  TypeMismatch,
  LinkDangling,
  KeyConflict,
  ReservedName,
  ReadOnly,
  Reject,
  Corruption,
  Storage,
  Schema,
  Config,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::NoSuchClass(_) => ErrorKind::NoSuchClass,
      Error::NoSuchItem { .. } => ErrorKind::NoSuchItem,
      Error::NoSuchKey { .. } => ErrorKind::NoSuchKey,
      Error::NoSuchProperty { .. } => ErrorKind::NoSuchProperty,
      Error::TypeMismatch { .. }
      | Error::InvalidValue(_)
      | Error::UnsupportedScheme(_) => ErrorKind::TypeMismatch,
      Error::LinkDangling { .. } => ErrorKind::LinkDangling,
      Error::KeyConflict { .. } => ErrorKind::KeyConflict,
      Error::ReservedName(_) => ErrorKind::ReservedName,
      Error::ReadOnly => ErrorKind::ReadOnly,
      Error::Reject(_) => ErrorKind::Reject,
      Error::Corruption { .. } => ErrorKind::Corruption,
      Error::Storage(_) => ErrorKind::Storage,
      Error::Schema(_) => ErrorKind::Schema,
      Error::Config(_) => ErrorKind::Config,
    }
  }

  /// Wrap any adapter-level failure as [`Error::Storage`].
  pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Error::Storage(err.into())
  }

  pub fn mismatch(class: &str, prop: &str, message: impl Into<String>) -> Self {
    Error::TypeMismatch {
      class:   class.to_owned(),
      prop:    prop.to_owned(),
      message: message.into(),
    }
  }

  pub fn corruption(class: &str, id: Option<ItemId>, detail: impl ToString) -> Self {
    Error::Corruption {
      class: class.to_owned(),
      id,
      detail: detail.to_string(),
    }
  }

  /// Attach a property context to a context-free parse failure.
  pub(crate) fn in_prop(self, class: &str, prop: &str) -> Self {
    match self {
      Error::InvalidValue(message) => Error::mismatch(class, prop, message),
      Error::UnsupportedScheme(scheme) => {
        Error::mismatch(class, prop, format!("unsupported password scheme {scheme:?}"))
      }
      other => other,
    }
  }
}

impl From<std::io::Error> for Error {
  fn from(err: std::io::Error) -> Self { Error::Storage(Box::new(err)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn corruption_message_names_the_item() {
    let err = Error::corruption("issue", Some(ItemId::new(7)), "bad params");
    assert_eq!(err.to_string(), "corrupt data in issue7: bad params");
    assert_eq!(err.kind(), ErrorKind::Corruption);

    let err = Error::corruption("issue", None, "bad segment");
    assert_eq!(err.to_string(), "corrupt data in issue: bad segment");
  }

  #[test]
  fn parse_failures_gain_property_context() {
    let err = Error::InvalidValue("not a date: \"soon\"".into()).in_prop("issue", "due");
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_eq!(err.to_string(), "issue.due: not a date: \"soon\"");
  }

  #[test]
  fn io_errors_are_storage_errors() {
    let err: Error = std::io::Error::other("disk full").into();
    assert_eq!(err.kind(), ErrorKind::Storage);
  }
}
