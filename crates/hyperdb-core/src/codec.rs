//! Conversion between [`Value`]s and the storage-ready [`Stored`] scalars
//! every backend persists, plus the canonical text form used by export,
//! import and schema retyping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  date::{Date, Interval},
  item::Item,
  password::Password,
  schema::ClassDef,
  types::{ItemId, NumberKind, PropertyType},
  value::{Number, Value},
};

/// A storage-ready scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stored {
  Text(String),
  Int(i64),
  Real(f64),
  /// Multilink ids, ascending.
  Ids(Vec<u64>),
}

/// The primary record of one item as persisted by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
  pub values:   BTreeMap<String, Stored>,
  pub retired:  bool,
  pub creation: String,
  pub activity: String,
  pub creator:  Option<u64>,
  pub actor:    Option<u64>,
}

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn serialise(ty: &PropertyType, value: &Value) -> Result<Stored> {
  let mismatch = || {
    Error::InvalidValue(format!(
      "{} value given for a {} property",
      value.type_name(),
      ty.name()
    ))
  };
  Ok(match (ty, value) {
    (PropertyType::String { .. }, Value::String(s)) => Stored::Text(s.clone()),
    (PropertyType::Password, Value::Password(p)) => Stored::Text(p.encode()),
    (PropertyType::Date, Value::Date(d)) => Stored::Text(d.serialise()),
    (PropertyType::Interval, Value::Interval(i)) => Stored::Text(i.serialise()),
    (PropertyType::Link { .. }, Value::Link(id)) => Stored::Int(id_to_i64(*id)),
    (PropertyType::Multilink { .. }, Value::Multilink(ids)) => {
      let mut raw: Vec<u64> = ids.iter().map(|id| id.get()).collect();
      raw.sort_unstable();
      raw.dedup();
      Stored::Ids(raw)
    }
    (PropertyType::Boolean, Value::Boolean(b)) => Stored::Int(i64::from(*b)),
    (
      PropertyType::Number {
        kind: NumberKind::Integer,
      },
      Value::Number(n),
    ) => Stored::Int(integral(*n).ok_or_else(mismatch)?),
    (
      PropertyType::Number {
        kind: NumberKind::Float,
      },
      Value::Number(n),
    ) => Stored::Real(n.as_f64()),
    _ => return Err(mismatch()),
  })
}

pub fn deserialise(ty: &PropertyType, stored: &Stored) -> Result<Value> {
  let mismatch = || {
    Error::InvalidValue(format!("stored {stored:?} does not fit a {} property", ty.name()))
  };
  Ok(match (ty, stored) {
    (_, Stored::Text(text)) => from_text(ty, text)?,
    (PropertyType::String { .. }, Stored::Int(n)) => Value::String(n.to_string()),
    (PropertyType::String { .. }, Stored::Real(x)) => Value::String(x.to_string()),
    (PropertyType::Link { .. }, Stored::Int(n)) => Value::Link(id_from_i64(*n).ok_or_else(mismatch)?),
    (PropertyType::Multilink { .. }, Stored::Ids(ids)) => {
      Value::from(ids.iter().copied().map(ItemId::new).collect::<Vec<_>>())
    }
    (PropertyType::Multilink { .. }, Stored::Int(n)) => {
      Value::Multilink(vec![id_from_i64(*n).ok_or_else(mismatch)?])
    }
    (PropertyType::Boolean, Stored::Int(n)) => Value::Boolean(*n != 0),
    (PropertyType::Number { kind }, Stored::Int(n)) => Value::Number(match kind {
      NumberKind::Integer => Number::Int(*n),
      NumberKind::Float => Number::Float(*n as f64),
    }),
    (PropertyType::Number { kind }, Stored::Real(x)) => Value::Number(match kind {
      NumberKind::Integer => Number::Int(integral(Number::Float(*x)).ok_or_else(mismatch)?),
      NumberKind::Float => Number::Float(*x),
    }),
    _ => return Err(mismatch()),
  })
}

fn id_to_i64(id: ItemId) -> i64 { i64::try_from(id.get()).unwrap_or(i64::MAX) }

fn id_from_i64(n: i64) -> Option<ItemId> { u64::try_from(n).ok().filter(|n| *n > 0).map(ItemId::new) }

/// Whole floats inside the `i64` range; `i64::MAX as f64` is 2^63 and is out.
fn integral(n: Number) -> Option<i64> {
  const LIMIT: f64 = 9_223_372_036_854_775_808.0;
  match n {
    Number::Int(i) => Some(i),
    Number::Float(x) if x.is_finite() && x.fract() == 0.0 && (-LIMIT..LIMIT).contains(&x) => Some(x as i64),
    Number::Float(_) => None,
  }
}

// ─── Canonical text ──────────────────────────────────────────────────────────

/// Canonical text of a value; [`from_text`] is its inverse.
pub fn to_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Password(p) => p.encode(),
    Value::Date(d) => d.serialise(),
    Value::Interval(i) => i.serialise(),
    Value::Link(id) => id.to_string(),
    Value::Multilink(ids) => ids.iter().map(ItemId::to_string).collect::<Vec<_>>().join(","),
    Value::Boolean(b) => if *b { "1" } else { "0" }.to_owned(),
    Value::Number(Number::Int(n)) => n.to_string(),
    Value::Number(Number::Float(x)) => format!("{x:?}"),
  }
}

pub fn from_text(ty: &PropertyType, text: &str) -> Result<Value> {
  Ok(match ty {
    PropertyType::String { .. } => Value::String(text.to_owned()),
    PropertyType::Password => Value::Password(Password::decode(text)?),
    PropertyType::Date => Value::Date(Date::parse(text)?),
    PropertyType::Interval => Value::Interval(Interval::parse(text)?),
    PropertyType::Link { .. } => Value::Link(text.parse()?),
    PropertyType::Multilink { .. } => {
      let inner = text.trim().trim_start_matches('[').trim_end_matches(']');
      let ids = inner
        .split(',')
        .map(|s| s.trim().trim_matches(['\'', '"']))
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<ItemId>>>()?;
      Value::from(ids)
    }
    PropertyType::Boolean => Value::Boolean(
      parse_bool(text).ok_or_else(|| Error::InvalidValue(format!("not a boolean: {text:?}")))?,
    ),
    PropertyType::Number { kind } => Value::Number(parse_number(*kind, text)?),
  })
}

/// `yes`/`true`/`on`/`1`/`checked` and their negatives, case-insensitive.
pub fn parse_bool(text: &str) -> Option<bool> {
  match text.trim().to_ascii_lowercase().as_str() {
    "yes" | "true" | "on" | "1" | "checked" => Some(true),
    "no" | "false" | "off" | "0" | "" => Some(false),
    _ => None,
  }
}

pub fn parse_number(kind: NumberKind, text: &str) -> Result<Number> {
  let text = text.trim();
  let invalid = || Error::InvalidValue(format!("not a number: {text:?}"));
  match kind {
    NumberKind::Integer => match text.parse::<i64>() {
      Ok(n) => Ok(Number::Int(n)),
      Err(_) => {
        let x: f64 = text.parse().map_err(|_| invalid())?;
        integral(Number::Float(x)).map(Number::Int).ok_or_else(invalid)
      }
    },
    NumberKind::Float => text
      .parse::<f64>()
      .ok()
      .filter(|x| x.is_finite())
      .map(Number::Float)
      .ok_or_else(invalid),
  }
}

/// Convert a stored value between property types via its canonical text.
/// `None` when the value has no meaning under the new type.
pub fn convert(old: &PropertyType, new: &PropertyType, stored: &Stored) -> Option<Stored> {
  let value = deserialise(old, stored).ok()?;
  let text = match (&value, new) {
    (Value::Multilink(ids), PropertyType::Link { .. }) => ids.first()?.to_string(),
    _ => to_text(&value),
  };
  let converted = from_text(new, &text).ok()?;
  serialise(new, &converted).ok()
}

// ─── Records ─────────────────────────────────────────────────────────────────

pub fn encode_item(class: &ClassDef, item: &Item) -> Result<StoredRecord> {
  let mut values = BTreeMap::new();
  for (name, ty) in class.stored_props() {
    if let Some(value) = item.values.get(name) {
      let stored = serialise(ty, value).map_err(|e| e.in_prop(class.name(), name))?;
      values.insert(name.to_owned(), stored);
    }
  }
  Ok(StoredRecord {
    values,
    retired: item.retired,
    creation: item.creation.serialise(),
    activity: item.activity.serialise(),
    creator: item.creator.map(ItemId::get),
    actor: item.actor.map(ItemId::get),
  })
}

/// Decode a record against the live class. Values of properties the class no
/// longer declares are ignored.
pub fn decode_item(class: &ClassDef, id: ItemId, record: StoredRecord) -> Result<Item> {
  let corrupt = |detail: String| Error::corruption(class.name(), Some(id), detail);
  let mut values = BTreeMap::new();
  for (name, stored) in record.values {
    let Some(ty) = class.prop_type(&name) else { continue };
    let value = deserialise(ty, &stored).map_err(|e| corrupt(format!("{name}: {e}")))?;
    values.insert(name, value);
  }
  Ok(Item {
    id,
    values,
    retired: record.retired,
    creation: Date::parse(&record.creation).map_err(|e| corrupt(format!("creation: {e}")))?,
    activity: Date::parse(&record.activity).map_err(|e| corrupt(format!("activity: {e}")))?,
    creator: record.creator.map(ItemId::new),
    actor: record.actor.map(ItemId::new),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn values_serialise_to_the_documented_scalars() {
    let date = Date::parse("2003-02-16.10:11:12").unwrap();
    let cases = [
      (PropertyType::string(), Value::from("x"), Stored::Text("x".into())),
      (
        PropertyType::date(),
        Value::Date(date),
        Stored::Text("2003-02-16.10:11:12.000000".into()),
      ),
      (
        PropertyType::interval(),
        Value::Interval(Interval::parse("-2d").unwrap()),
        Stored::Text("-00000002000000".into()),
      ),
      (PropertyType::link("user"), Value::Link(ItemId::new(4)), Stored::Int(4)),
      (
        PropertyType::multilink("user"),
        Value::Multilink(vec![ItemId::new(2), ItemId::new(10)]),
        Stored::Ids(vec![2, 10]),
      ),
      (PropertyType::boolean(), Value::Boolean(true), Stored::Int(1)),
      (PropertyType::integer(), Value::from(7i64), Stored::Int(7)),
      (PropertyType::number(), Value::from(7i64), Stored::Real(7.0)),
    ];
    for (ty, value, stored) in cases {
      assert_eq!(serialise(&ty, &value).unwrap(), stored, "{ty}");
      let back = deserialise(&ty, &stored).unwrap();
      if ty == PropertyType::number() {
        assert_eq!(back, Value::from(7.0));
      } else {
        assert_eq!(back, value, "{ty}");
      }
    }
  }

  #[test]
  fn mismatched_values_are_rejected() {
    assert!(serialise(&PropertyType::date(), &Value::from("x")).is_err());
    assert!(serialise(&PropertyType::integer(), &Value::from(1.5)).is_err());
  }

  #[test]
  fn integers_outside_i64_are_rejected() {
    for x in [1e19, -1e19, 9_223_372_036_854_775_808.0, f64::INFINITY, f64::NAN] {
      let err = serialise(&PropertyType::integer(), &Value::from(x)).unwrap_err();
      assert!(matches!(err, Error::InvalidValue(_)), "{x}: {err}");
      assert!(deserialise(&PropertyType::integer(), &Stored::Real(x)).is_err(), "{x}");
    }
    for text in ["1e19", "-9.3e18", "inf"] {
      assert!(matches!(parse_number(NumberKind::Integer, text), Err(Error::InvalidValue(_))), "{text}");
    }

    let lowest = serialise(&PropertyType::integer(), &Value::from(-9_223_372_036_854_775_808.0)).unwrap();
    assert_eq!(lowest, Stored::Int(i64::MIN));
    assert_eq!(parse_number(NumberKind::Integer, "4e3").unwrap(), Number::Int(4000));
  }

  #[test]
  fn legacy_text_encodings_decode() {
    let link = deserialise(&PropertyType::link("user"), &Stored::Text("3".into())).unwrap();
    assert_eq!(link, Value::Link(ItemId::new(3)));

    let ml = deserialise(
      &PropertyType::multilink("user"),
      &Stored::Text("['3', '1']".into()),
    )
    .unwrap();
    assert_eq!(ml, Value::Multilink(vec![ItemId::new(1), ItemId::new(3)]));

    let date = deserialise(&PropertyType::date(), &Stored::Text("20030216101112.000".into())).unwrap();
    assert_eq!(date, Value::Date(Date::parse("2003-02-16.10:11:12").unwrap()));

    let pw = deserialise(&PropertyType::password(), &Stored::Text("{plaintext}x".into())).unwrap();
    assert_eq!(to_text(&pw), "plaintext:x");
  }

  #[test]
  fn booleans_accept_common_spellings() {
    for yes in ["yes", "TRUE", "on", "1", "checked"] {
      assert_eq!(parse_bool(yes), Some(true), "{yes}");
    }
    for no in ["no", "False", "off", "0", ""] {
      assert_eq!(parse_bool(no), Some(false), "{no}");
    }
    assert_eq!(parse_bool("maybe"), None);
  }

  #[test]
  fn conversion_between_types_goes_through_text() {
    let converted = convert(&PropertyType::integer(), &PropertyType::string(), &Stored::Int(42));
    assert_eq!(converted, Some(Stored::Text("42".into())));

    let converted = convert(&PropertyType::string(), &PropertyType::integer(), &Stored::Text("x".into()));
    assert_eq!(converted, None);

    let converted = convert(&PropertyType::link("u"), &PropertyType::multilink("u"), &Stored::Int(5));
    assert_eq!(converted, Some(Stored::Ids(vec![5])));

    let converted = convert(&PropertyType::multilink("u"), &PropertyType::link("u"), &Stored::Ids(vec![2, 9]));
    assert_eq!(converted, Some(Stored::Int(2)));
  }

  #[test]
  fn decoding_skips_dropped_properties_and_reports_corruption() {
    let class = ClassDef::new("issue").prop("title", PropertyType::string());
    let mut values = BTreeMap::new();
    values.insert("title".to_owned(), Stored::Text("t".into()));
    values.insert("gone".to_owned(), Stored::Int(1));
    let record = StoredRecord {
      values,
      retired: false,
      creation: "2003-02-16.10:11:12.000000".into(),
      activity: "2003-02-16.10:11:12.000000".into(),
      creator: Some(1),
      actor: Some(1),
    };
    let item = decode_item(&class, ItemId::new(1), record.clone()).unwrap();
    assert_eq!(item.values.len(), 1);
    assert_eq!(encode_item(&class, &item).unwrap().values.len(), 1);

    let broken = StoredRecord {
      creation: "yesterday-ish".into(),
      ..record
    };
    let err = decode_item(&class, ItemId::new(1), broken).unwrap_err();
    assert!(matches!(err, Error::Corruption { id: Some(_), .. }), "{err}");
  }
}
