//! The per-item journal: what was done to an item, when, and by whom.
//!
//! Backends persist [`StoredEntry`] values; the database decodes them against
//! the live schema into [`JournalEntry`] for callers.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::{
  Error, Result,
  codec::{self, Stored},
  date::Date,
  schema::ClassDef,
  types::ItemId,
  value::{Number, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  Create,
  Set,
  Link,
  Unlink,
  Retire,
  Restore,
}

impl Action {
  pub fn as_str(self) -> &'static str {
    match self {
      Action::Create => "create",
      Action::Set => "set",
      Action::Link => "link",
      Action::Unlink => "unlink",
      Action::Retire => "retire",
      Action::Restore => "restore",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Action {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Ok(match s {
      "create" => Action::Create,
      "set" => Action::Set,
      "link" => Action::Link,
      "unlink" => Action::Unlink,
      "retire" => Action::Retire,
      "restore" => Action::Restore,
      other => return Err(Error::InvalidValue(format!("unknown journal action {other:?}"))),
    })
  }
}

// ─── Stored form ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredParams {
  Empty,
  /// Previous values of the properties a `set` changed.
  Set(BTreeMap<String, Option<Stored>>),
  /// The item on the other end of a `link`/`unlink`.
  Link { class: String, id: u64, prop: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
  pub id:        u64,
  pub timestamp: String,
  pub actor:     Option<u64>,
  pub action:    Action,
  pub params:    StoredParams,
}

// ─── Decoded form ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Params {
  Empty,
  Set(BTreeMap<String, Option<Value>>),
  Link {
    class: String,
    id:    ItemId,
    prop:  String,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
  pub id:        ItemId,
  pub timestamp: Date,
  pub actor:     Option<ItemId>,
  pub action:    Action,
  pub params:    Params,
}

impl JournalEntry {
  pub fn new(id: ItemId, actor: Option<ItemId>, action: Action, params: Params) -> Self {
    JournalEntry {
      id,
      timestamp: Date::now(),
      actor,
      action,
      params,
    }
  }
}

pub fn encode_entry(class: &ClassDef, entry: &JournalEntry) -> Result<StoredEntry> {
  let params = match &entry.params {
    Params::Empty => StoredParams::Empty,
    Params::Set(old) => {
      let mut stored = BTreeMap::new();
      for (prop, value) in old {
        let encoded = match (value, class.prop_type(prop)) {
          (None, _) => None,
          (Some(value), Some(ty)) => {
            Some(codec::serialise(ty, value).map_err(|e| e.in_prop(class.name(), prop))?)
          }
          (Some(value), None) => Some(untyped_stored(value)),
        };
        stored.insert(prop.clone(), encoded);
      }
      StoredParams::Set(stored)
    }
    Params::Link { class, id, prop } => StoredParams::Link {
      class: class.clone(),
      id:    id.get(),
      prop:  prop.clone(),
    },
  };
  Ok(StoredEntry {
    id: entry.id.get(),
    timestamp: entry.timestamp.serialise(),
    actor: entry.actor.map(ItemId::get),
    action: entry.action,
    params,
  })
}

/// Decode against the live class. Values of properties that no longer exist
/// are decoded without a type.
pub fn decode_entry(class: &ClassDef, entry: StoredEntry) -> Result<JournalEntry> {
  let id = ItemId::new(entry.id);
  let corrupt = |detail: String| Error::corruption(class.name(), Some(id), detail);
  let params = match entry.params {
    StoredParams::Empty => Params::Empty,
    StoredParams::Set(old) => {
      let mut values = BTreeMap::new();
      for (prop, stored) in old {
        let value = match (stored, class.prop_type(&prop)) {
          (None, _) => None,
          // Values journalled before a retype keep their old shape.
          (Some(stored), Some(ty)) => {
            Some(codec::deserialise(ty, &stored).unwrap_or_else(|_| untyped_value(stored)))
          }
          (Some(stored), None) => Some(untyped_value(stored)),
        };
        values.insert(prop, value);
      }
      Params::Set(values)
    }
    StoredParams::Link { class, id, prop } => Params::Link {
      class,
      id: ItemId::new(id),
      prop,
    },
  };
  Ok(JournalEntry {
    id,
    timestamp: Date::parse(&entry.timestamp).map_err(|e| corrupt(format!("journal timestamp: {e}")))?,
    actor: entry.actor.map(ItemId::new),
    action: entry.action,
    params,
  })
}

fn untyped_stored(value: &Value) -> Stored {
  match value {
    Value::Link(id) => Stored::Int(i64::try_from(id.get()).unwrap_or(i64::MAX)),
    Value::Multilink(ids) => Stored::Ids(ids.iter().map(|id| id.get()).collect()),
    Value::Boolean(b) => Stored::Int(i64::from(*b)),
    Value::Number(Number::Int(n)) => Stored::Int(*n),
    Value::Number(Number::Float(x)) => Stored::Real(*x),
    other => Stored::Text(codec::to_text(other)),
  }
}

fn untyped_value(stored: Stored) -> Value {
  match stored {
    Stored::Text(s) => Value::String(s),
    Stored::Int(n) => Value::Number(Number::Int(n)),
    Stored::Real(x) => Value::Number(Number::Float(x)),
    Stored::Ids(ids) => Value::from(ids.into_iter().map(ItemId::new).collect::<Vec<_>>()),
  }
}

// ─── Text form ───────────────────────────────────────────────────────────────

/// Canonical textual params for export: a JSON object, `{}` for empty params.
pub fn params_to_text(params: &StoredParams) -> String {
  let json = match params {
    StoredParams::Empty => Json::Object(Map::new()),
    StoredParams::Set(old) => Json::Object(
      old
        .iter()
        .map(|(prop, value)| (prop.clone(), value.as_ref().map_or(Json::Null, stored_to_json)))
        .collect(),
    ),
    StoredParams::Link { class, id, prop } => serde_json::json!({
      "class": class,
      "id": id.to_string(),
      "prop": prop,
    }),
  };
  json.to_string()
}

/// Inverse of [`params_to_text`]. `action` picks the params shape.
pub fn params_from_text(class: &ClassDef, action: Action, text: &str) -> Result<StoredParams> {
  let invalid = |detail: &str| Error::InvalidValue(format!("journal params {text:?}: {detail}"));
  let json: Json = serde_json::from_str(text).map_err(|e| invalid(&e.to_string()))?;
  let Json::Object(map) = json else {
    return Err(invalid("not an object"));
  };
  match action {
    Action::Create | Action::Retire | Action::Restore => Ok(StoredParams::Empty),
    Action::Link | Action::Unlink => {
      let field = |name: &str| {
        map
          .get(name)
          .and_then(Json::as_str)
          .map(str::to_owned)
          .ok_or_else(|| invalid(&format!("missing {name}")))
      };
      let id: ItemId = field("id")?.parse()?;
      Ok(StoredParams::Link {
        class: field("class")?,
        id:    id.get(),
        prop:  field("prop")?,
      })
    }
    Action::Set => {
      let mut old = BTreeMap::new();
      for (prop, value) in map {
        let stored = match value {
          Json::Null => None,
          Json::String(text) => Some(match class.prop_type(&prop) {
            Some(ty) => codec::serialise(ty, &codec::from_text(ty, &text)?)?,
            None => Stored::Text(text),
          }),
          other => return Err(invalid(&format!("unexpected value {other}"))),
        };
        old.insert(prop, stored);
      }
      Ok(StoredParams::Set(old))
    }
  }
}

fn stored_to_json(stored: &Stored) -> Json {
  Json::String(match stored {
    Stored::Text(s) => s.clone(),
    Stored::Int(n) => n.to_string(),
    Stored::Real(x) => format!("{x:?}"),
    Stored::Ids(ids) => ids.iter().map(u64::to_string).collect::<Vec<_>>().join(","),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::PropertyType;

  fn issue() -> ClassDef {
    ClassDef::new("issue")
      .prop("title", PropertyType::string())
      .prop("nosy", PropertyType::multilink("user"))
      .prop("priority", PropertyType::integer())
  }

  #[test]
  fn set_entries_keep_old_values_through_storage() {
    let mut old = BTreeMap::new();
    old.insert("title".to_owned(), Some(Value::from("before")));
    old.insert("nosy".to_owned(), Some(Value::from(vec![ItemId::new(3), ItemId::new(1)])));
    old.insert("priority".to_owned(), None);
    let entry = JournalEntry::new(ItemId::new(7), Some(ItemId::new(1)), Action::Set, Params::Set(old));

    let stored = encode_entry(&issue(), &entry).unwrap();
    let back = decode_entry(&issue(), stored).unwrap();
    assert_eq!(back, entry);
  }

  #[test]
  fn entries_for_dropped_properties_decode_untyped() {
    let mut old = BTreeMap::new();
    old.insert("gone".to_owned(), Some(Stored::Int(4)));
    let stored = StoredEntry {
      id:        1,
      timestamp: "2003-02-16.10:11:12.000000".into(),
      actor:     None,
      action:    Action::Set,
      params:    StoredParams::Set(old),
    };
    let entry = decode_entry(&issue(), stored).unwrap();
    let Params::Set(values) = entry.params else { panic!("expected set params") };
    assert_eq!(values["gone"], Some(Value::from(4i64)));
  }

  #[test]
  fn bad_timestamps_are_corruption() {
    let stored = StoredEntry {
      id:        5,
      timestamp: "soon".into(),
      actor:     None,
      action:    Action::Create,
      params:    StoredParams::Empty,
    };
    let err = decode_entry(&issue(), stored).unwrap_err();
    assert!(matches!(err, Error::Corruption { id: Some(id), .. } if id == ItemId::new(5)));
  }

  #[test]
  fn params_text_form() {
    let link = StoredParams::Link {
      class: "issue".into(),
      id:    4,
      prop:  "nosy".into(),
    };
    let text = params_to_text(&link);
    assert_eq!(params_from_text(&issue(), Action::Link, &text).unwrap(), link);

    let mut old = BTreeMap::new();
    old.insert("nosy".to_owned(), Some(Stored::Ids(vec![1, 3])));
    old.insert("title".to_owned(), None);
    let set = StoredParams::Set(old);
    let text = params_to_text(&set);
    assert_eq!(text, r#"{"nosy":"1,3","title":null}"#);
    assert_eq!(params_from_text(&issue(), Action::Set, &text).unwrap(), set);

    assert_eq!(params_to_text(&StoredParams::Empty), "{}");
    assert!(params_from_text(&issue(), Action::Set, "[1]").is_err());
  }

  #[test]
  fn actions_parse_from_their_tags() {
    for action in [Action::Create, Action::Set, Action::Link, Action::Unlink, Action::Retire, Action::Restore] {
      assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
    }
    assert!("explode".parse::<Action>().is_err());
  }
}
