//! Item identifiers and property descriptors.
//!
//! A class declares its properties as `(name, PropertyType)` pairs. The
//! variant decides which values a property accepts, how they are stored, and
//! how they take part in filtering and sorting.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── ItemId ──────────────────────────────────────────────────────────────────

/// Id of an item within its class. Ids start at 1 and are never reused.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(u64);

impl ItemId {
  pub const fn new(n: u64) -> Self { ItemId(n) }

  pub const fn get(self) -> u64 { self.0 }
}

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl FromStr for ItemId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().parse::<u64>() {
      Ok(n) if n > 0 => Ok(ItemId(n)),
      _ => Err(Error::InvalidValue(format!("not an item id: {s:?}"))),
    }
  }
}

impl From<u64> for ItemId {
  fn from(n: u64) -> Self { ItemId(n) }
}

// ─── PropertyType ────────────────────────────────────────────────────────────

/// Canonical numeric representation of a `Number` property, fixed when the
/// property is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NumberKind {
  #[default]
  Float,
  Integer,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyType {
  String {
    /// Push values into the full-text indexer.
    indexme: bool,
  },
  Password,
  Date,
  Interval,
  Link {
    target:     String,
    /// Record link/unlink events in the target item's journal.
    do_journal: bool,
  },
  Multilink {
    target:     String,
    do_journal: bool,
  },
  Boolean,
  Number {
    kind: NumberKind,
  },
}

impl PropertyType {
  pub fn string() -> Self { PropertyType::String { indexme: false } }

  pub fn indexed_string() -> Self { PropertyType::String { indexme: true } }

  pub fn password() -> Self { PropertyType::Password }

  pub fn date() -> Self { PropertyType::Date }

  pub fn interval() -> Self { PropertyType::Interval }

  pub fn link(target: impl Into<String>) -> Self {
    PropertyType::Link {
      target:     target.into(),
      do_journal: true,
    }
  }

  pub fn multilink(target: impl Into<String>) -> Self {
    PropertyType::Multilink {
      target:     target.into(),
      do_journal: true,
    }
  }

  pub fn boolean() -> Self { PropertyType::Boolean }

  pub fn number() -> Self {
    PropertyType::Number {
      kind: NumberKind::Float,
    }
  }

  pub fn integer() -> Self {
    PropertyType::Number {
      kind: NumberKind::Integer,
    }
  }

  /// Stop journalling link/unlink events on the target. No effect on
  /// non-link types.
  pub fn without_journal(mut self) -> Self {
    if let PropertyType::Link { do_journal, .. }
    | PropertyType::Multilink { do_journal, .. } = &mut self
    {
      *do_journal = false;
    }
    self
  }

  /// Target class of a Link or Multilink.
  pub fn target(&self) -> Option<&str> {
    match self {
      PropertyType::Link { target, .. } | PropertyType::Multilink { target, .. } => {
        Some(target)
      }
      _ => None,
    }
  }

  pub fn journals_links(&self) -> bool {
    matches!(
      self,
      PropertyType::Link {
        do_journal: true,
        ..
      } | PropertyType::Multilink {
        do_journal: true,
        ..
      }
    )
  }

  pub fn is_multilink(&self) -> bool { matches!(self, PropertyType::Multilink { .. }) }

  pub fn is_indexed(&self) -> bool {
    matches!(self, PropertyType::String { indexme: true })
  }

  /// Short type name used in diagnostics.
  pub fn name(&self) -> &'static str {
    match self {
      PropertyType::String { .. } => "string",
      PropertyType::Password => "password",
      PropertyType::Date => "date",
      PropertyType::Interval => "interval",
      PropertyType::Link { .. } => "link",
      PropertyType::Multilink { .. } => "multilink",
      PropertyType::Boolean => "boolean",
      PropertyType::Number {
        kind: NumberKind::Float,
      } => "number",
      PropertyType::Number {
        kind: NumberKind::Integer,
      } => "integer",
    }
  }

  /// Representation persisted in the schema descriptor.
  ///
  /// Only storage-relevant attributes appear here: toggling `indexme` or
  /// `do_journal` does not count as a schema change.
  pub fn repr(&self) -> String {
    match self {
      PropertyType::Link { target, .. } => format!("Link({target})"),
      PropertyType::Multilink { target, .. } => format!("Multilink({target})"),
      PropertyType::String { .. } => "String".into(),
      PropertyType::Password => "Password".into(),
      PropertyType::Date => "Date".into(),
      PropertyType::Interval => "Interval".into(),
      PropertyType::Boolean => "Boolean".into(),
      PropertyType::Number {
        kind: NumberKind::Float,
      } => "Number".into(),
      PropertyType::Number {
        kind: NumberKind::Integer,
      } => "Integer".into(),
    }
  }

  /// Inverse of [`repr`](Self::repr).
  pub fn from_repr(repr: &str) -> Option<Self> {
    let inner = |prefix: &str| {
      repr
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .filter(|target| !target.is_empty())
    };
    if let Some(target) = inner("Link") {
      return Some(PropertyType::link(target));
    }
    if let Some(target) = inner("Multilink") {
      return Some(PropertyType::multilink(target));
    }
    Some(match repr {
      "String" => PropertyType::string(),
      "Password" => PropertyType::password(),
      "Date" => PropertyType::date(),
      "Interval" => PropertyType::interval(),
      "Boolean" => PropertyType::boolean(),
      "Number" => PropertyType::number(),
      "Integer" => PropertyType::integer(),
      _ => return None,
    })
  }
}

impl fmt::Display for PropertyType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.repr()) }
}
