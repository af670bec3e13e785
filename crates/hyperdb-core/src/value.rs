//! In-memory property values and the loosely-typed input accepted by
//! `create`/`set`.

use std::{collections::BTreeMap, fmt};

use crate::{date::Date, date::Interval, password::Password, types::ItemId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
  Int(i64),
  Float(f64),
}

impl Number {
  pub fn as_f64(self) -> f64 {
    match self {
      Number::Int(n) => n as f64,
      Number::Float(f) => f,
    }
  }
}

impl fmt::Display for Number {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Number::Int(n) => write!(f, "{n}"),
      Number::Float(x) => write!(f, "{x}"),
    }
  }
}

/// A canonical property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  String(String),
  Password(Password),
  Date(Date),
  Interval(Interval),
  Link(ItemId),
  /// Sorted, duplicate-free.
  Multilink(Vec<ItemId>),
  Boolean(bool),
  Number(Number),
}

impl Value {
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::String(_) => "string",
      Value::Password(_) => "password",
      Value::Date(_) => "date",
      Value::Interval(_) => "interval",
      Value::Link(_) => "link",
      Value::Multilink(_) => "multilink",
      Value::Boolean(_) => "boolean",
      Value::Number(_) => "number",
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_link(&self) -> Option<ItemId> {
    match self {
      Value::Link(id) => Some(*id),
      _ => None,
    }
  }

  pub fn as_multilink(&self) -> Option<&[ItemId]> {
    match self {
      Value::Multilink(ids) => Some(ids),
      _ => None,
    }
  }

  pub fn as_date(&self) -> Option<Date> {
    match self {
      Value::Date(d) => Some(*d),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Boolean(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_number(&self) -> Option<Number> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::String(s) => f.write_str(s),
      Value::Password(p) => write!(f, "{p}"),
      Value::Date(d) => write!(f, "{d}"),
      Value::Interval(i) => write!(f, "{i}"),
      Value::Link(id) => write!(f, "{id}"),
      Value::Multilink(ids) => {
        let ids: Vec<String> = ids.iter().map(ItemId::to_string).collect();
        f.write_str(&ids.join(","))
      }
      Value::Boolean(b) => f.write_str(if *b { "yes" } else { "no" }),
      Value::Number(n) => write!(f, "{n}"),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Value::String(s.to_owned()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Value::String(s) }
}

impl From<ItemId> for Value {
  fn from(id: ItemId) -> Self { Value::Link(id) }
}

impl From<Vec<ItemId>> for Value {
  fn from(mut ids: Vec<ItemId>) -> Self {
    ids.sort_unstable();
    ids.dedup();
    Value::Multilink(ids)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self { Value::Boolean(b) }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self { Value::Number(Number::Int(n)) }
}

impl From<f64> for Value {
  fn from(x: f64) -> Self { Value::Number(Number::Float(x)) }
}

impl From<Date> for Value {
  fn from(d: Date) -> Self { Value::Date(d) }
}

impl From<Interval> for Value {
  fn from(i: Interval) -> Self { Value::Interval(i) }
}

impl From<Password> for Value {
  fn from(p: Password) -> Self { Value::Password(p) }
}

// ─── Input ───────────────────────────────────────────────────────────────────

/// A value as supplied by a caller, before normalisation against the
/// property's type.
///
/// Text is parsed per type: link and multilink text may name target items by
/// key, booleans accept `yes`/`no` and friends, dates accept any date spec,
/// and password text is hashed under the configured scheme.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
  Null,
  Text(String),
  List(Vec<String>),
  Value(Value),
}

impl From<&str> for Input {
  fn from(s: &str) -> Self { Input::Text(s.to_owned()) }
}

impl From<String> for Input {
  fn from(s: String) -> Self { Input::Text(s) }
}

impl From<&String> for Input {
  fn from(s: &String) -> Self { Input::Text(s.clone()) }
}

impl From<Vec<&str>> for Input {
  fn from(items: Vec<&str>) -> Self { Input::List(items.into_iter().map(str::to_owned).collect()) }
}

impl From<Vec<String>> for Input {
  fn from(items: Vec<String>) -> Self { Input::List(items) }
}

impl<const N: usize> From<[&str; N]> for Input {
  fn from(items: [&str; N]) -> Self { Input::List(items.iter().map(|s| (*s).to_owned()).collect()) }
}

impl From<Value> for Input {
  fn from(v: Value) -> Self { Input::Value(v) }
}

impl From<ItemId> for Input {
  fn from(id: ItemId) -> Self { Input::Value(Value::Link(id)) }
}

impl From<Vec<ItemId>> for Input {
  fn from(ids: Vec<ItemId>) -> Self { Input::Value(Value::from(ids)) }
}

impl From<bool> for Input {
  fn from(b: bool) -> Self { Input::Value(Value::Boolean(b)) }
}

impl From<i64> for Input {
  fn from(n: i64) -> Self { Input::Value(Value::from(n)) }
}

impl From<i32> for Input {
  fn from(n: i32) -> Self { Input::Value(Value::from(i64::from(n))) }
}

impl From<f64> for Input {
  fn from(x: f64) -> Self { Input::Value(Value::from(x)) }
}

impl From<Date> for Input {
  fn from(d: Date) -> Self { Input::Value(Value::Date(d)) }
}

impl From<Interval> for Input {
  fn from(i: Interval) -> Self { Input::Value(Value::Interval(i)) }
}

impl From<Password> for Input {
  fn from(p: Password) -> Self { Input::Value(Value::Password(p)) }
}

impl<T: Into<Input>> From<Option<T>> for Input {
  fn from(v: Option<T>) -> Self { v.map_or(Input::Null, Into::into) }
}

/// Caller-supplied property values, keyed by property name.
pub type PropValues = BTreeMap<String, Input>;

/// Normalised property values; `None` unsets the property.
pub type Changes = BTreeMap<String, Option<Value>>;

/// Build a [`PropValues`] map.
///
/// ```
/// use hyperdb_core::props;
/// let values = props! { "title" => "t", "nosy" => ["ada"] };
/// assert_eq!(values.len(), 2);
/// ```
#[macro_export]
macro_rules! props {
  () => { $crate::value::PropValues::new() };
  ($($name:expr => $value:expr),+ $(,)?) => {{
    let mut values = $crate::value::PropValues::new();
    $( values.insert(::std::string::String::from($name), $crate::value::Input::from($value)); )+
    values
  }};
}
