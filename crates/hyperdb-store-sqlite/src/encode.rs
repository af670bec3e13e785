//! Table and column naming, and conversions between stored values and
//! SQLite values.
//!
//! Class and property names are validated identifiers, so they are safe to
//! splice into SQL once quoted.

use hyperdb_core::{
  Action, Error as CoreError, ItemId, NumberKind, PropertyType,
  codec::Stored,
  journal::{StoredEntry, StoredParams},
  schema::ClassDescriptor,
};
use rusqlite::types::Value as SqlValue;

use crate::Result;

// ─── Names ───────────────────────────────────────────────────────────────────

pub fn table(class: &str) -> String { format!("\"_{class}\"") }

pub fn journal_table(class: &str) -> String { format!("\"{class}__journal\"") }

pub fn multilink_table(class: &str, prop: &str) -> String { format!("\"{class}_{prop}\"") }

pub fn column(prop: &str) -> String { format!("\"_{prop}\"") }

pub fn key_index(class: &str) -> String { format!("\"_{class}_key_retired_idx\"") }

pub fn retired_index(class: &str) -> String { format!("\"_{class}_retired_idx\"") }

pub fn placeholders(n: usize) -> String {
  (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

// ─── Layout ──────────────────────────────────────────────────────────────────

pub fn sql_type(ty: &PropertyType) -> &'static str {
  match ty {
    PropertyType::Link { .. } | PropertyType::Boolean => "INTEGER",
    PropertyType::Number {
      kind: NumberKind::Integer,
    } => "INTEGER",
    PropertyType::Number {
      kind: NumberKind::Float,
    } => "REAL",
    _ => "TEXT",
  }
}

/// Column-backed properties of a class, in descriptor order.
pub fn scalar_props(class: &ClassDescriptor) -> Vec<String> {
  class
    .typed_props()
    .filter(|(_, ty)| !ty.is_multilink())
    .map(|(name, _)| name.to_owned())
    .collect()
}

/// Join-table-backed properties of a class.
pub fn multilink_props(class: &ClassDescriptor) -> Vec<String> {
  class
    .typed_props()
    .filter(|(_, ty)| ty.is_multilink())
    .map(|(name, _)| name.to_owned())
    .collect()
}

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn to_sql(stored: Option<&Stored>) -> SqlValue {
  match stored {
    None => SqlValue::Null,
    Some(Stored::Text(text)) => SqlValue::Text(text.clone()),
    Some(Stored::Int(n)) => SqlValue::Integer(*n),
    Some(Stored::Real(x)) => SqlValue::Real(*x),
    Some(Stored::Ids(ids)) => SqlValue::Text(ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",")),
  }
}

pub fn from_sql(value: SqlValue) -> Option<Stored> {
  match value {
    SqlValue::Null => None,
    SqlValue::Integer(n) => Some(Stored::Int(n)),
    SqlValue::Real(x) => Some(Stored::Real(x)),
    SqlValue::Text(text) => Some(Stored::Text(text)),
    SqlValue::Blob(bytes) => Some(Stored::Text(String::from_utf8_lossy(&bytes).into_owned())),
  }
}

pub fn id_to_sql(id: ItemId) -> i64 { i64::try_from(id.get()).unwrap_or(i64::MAX) }

pub fn id_from_sql(n: i64) -> u64 { u64::try_from(n).unwrap_or_default() }

// ─── Journal rows ────────────────────────────────────────────────────────────

/// Raw columns of one `<class>__journal` row.
pub struct RawJournal {
  pub nodeid: i64,
  pub date:   String,
  pub tag:    Option<i64>,
  pub action: String,
  pub params: String,
}

impl RawJournal {
  pub fn into_entry(self, class: &str) -> Result<StoredEntry> {
    let id = id_from_sql(self.nodeid);
    let corrupt = |detail: String| CoreError::corruption(class, Some(ItemId::new(id)), detail);
    let action: Action = self
      .action
      .parse()
      .map_err(|e: CoreError| corrupt(e.to_string()))?;
    let params: StoredParams =
      serde_json::from_str(&self.params).map_err(|e| corrupt(format!("journal params: {e}")))?;
    Ok(StoredEntry {
      id,
      timestamp: self.date,
      actor: self.tag.map(id_from_sql),
      action,
      params,
    })
  }
}
