//! Auditors and reactors.
//!
//! Auditors run before a mutation is written and may edit the incoming
//! values or veto the mutation with [`Error::Reject`](crate::Error::Reject).
//! Reactors run after the write and see the item as it was before.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{Result, database::Database, item::Item, types::ItemId, value::Changes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Event {
  Create,
  Set,
  Retire,
  Restore,
}

impl fmt::Display for Event {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Event::Create => "create",
      Event::Set => "set",
      Event::Retire => "retire",
      Event::Restore => "restore",
    })
  }
}

/// What an auditor is asked to approve.
#[derive(Debug, Clone, Copy)]
pub struct Audit<'a> {
  pub class: &'a str,
  pub event: Event,
  /// `None` on create.
  pub id:    Option<ItemId>,
}

/// What a reactor is told about.
#[derive(Debug, Clone, Copy)]
pub struct Reaction<'a> {
  pub class: &'a str,
  pub event: Event,
  pub id:    ItemId,
  /// The item before the mutation; `None` on create.
  pub old:   Option<&'a Item>,
}

pub type Auditor = Arc<dyn Fn(&mut Database, &Audit<'_>, &mut Changes) -> Result<()> + Send + Sync>;

pub type Reactor = Arc<dyn Fn(&mut Database, &Reaction<'_>) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Triggers {
  auditors: BTreeMap<(String, Event), Vec<Auditor>>,
  reactors: BTreeMap<(String, Event), Vec<Reactor>>,
}

impl fmt::Debug for Triggers {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Triggers")
      .field("auditors", &self.auditors.iter().map(|(k, v)| (k, v.len())).collect::<Vec<_>>())
      .field("reactors", &self.reactors.iter().map(|(k, v)| (k, v.len())).collect::<Vec<_>>())
      .finish()
  }
}

impl Triggers {
  pub fn audit(&mut self, class: &str, event: Event, auditor: Auditor) {
    self.auditors.entry((class.to_owned(), event)).or_default().push(auditor);
  }

  pub fn react(&mut self, class: &str, event: Event, reactor: Reactor) {
    self.reactors.entry((class.to_owned(), event)).or_default().push(reactor);
  }

  /// Auditors for `(class, event)` in registration order.
  pub fn auditors(&self, class: &str, event: Event) -> Vec<Auditor> {
    self.auditors.get(&(class.to_owned(), event)).cloned().unwrap_or_default()
  }

  /// Reactors for `(class, event)` in registration order.
  pub fn reactors(&self, class: &str, event: Event) -> Vec<Reactor> {
    self.reactors.get(&(class.to_owned(), event)).cloned().unwrap_or_default()
  }
}
