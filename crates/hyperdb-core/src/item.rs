//! Decoded items.

use std::collections::BTreeMap;

use crate::{
  date::Date,
  types::ItemId,
  value::Value,
};

/// One item of a class, decoded against the live schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
  pub id:       ItemId,
  /// Set properties only; unset properties are absent.
  pub values:   BTreeMap<String, Value>,
  pub retired:  bool,
  pub creation: Date,
  pub activity: Date,
  pub creator:  Option<ItemId>,
  pub actor:    Option<ItemId>,
}

impl Item {
  pub(crate) fn new(id: ItemId, at: Date, actor: Option<ItemId>) -> Self {
    Item {
      id,
      values: BTreeMap::new(),
      retired: false,
      creation: at,
      activity: at,
      creator: actor,
      actor,
    }
  }

  /// Value of an implicit property, or `None` if `prop` is not implicit.
  pub fn implicit(&self, prop: &str) -> Option<Option<Value>> {
    Some(match prop {
      "id" => Some(Value::String(self.id.to_string())),
      "creation" => Some(Value::Date(self.creation)),
      "activity" => Some(Value::Date(self.activity)),
      "creator" => self.creator.map(Value::Link),
      "actor" => self.actor.map(Value::Link),
      _ => return None,
    })
  }

  /// Value of a declared or implicit property.
  pub fn value(&self, prop: &str) -> Option<Value> {
    match self.implicit(prop) {
      Some(value) => value,
      None => self.values.get(prop).cloned(),
    }
  }

  pub(crate) fn touch(&mut self, at: Date, actor: Option<ItemId>) {
    self.activity = at;
    self.actor = actor;
  }
}
