//! Class declarations, the persisted schema descriptor, and schema diffing.
//!
//! A [`Schema`] is declared in code and handed to `Database::open`, which
//! compares its [`SchemaDescriptor`] against the one persisted by the backend
//! and applies the resulting [`SchemaChange`]s.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, types::PropertyType};

/// Properties every item carries implicitly. They cannot be declared or set.
pub const IMPLICIT_PROPS: [&str; 5] = ["id", "creation", "activity", "creator", "actor"];

/// Class that `creator` and `actor` link to.
pub const USER_CLASS: &str = "user";

pub fn is_reserved(prop: &str) -> bool { IMPLICIT_PROPS.contains(&prop) }

// ─── ClassDef ────────────────────────────────────────────────────────────────

/// Declaration of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
  name:    String,
  props:   Vec<(String, PropertyType)>,
  key:     Option<String>,
  journal: bool,
  file:    bool,
}

impl ClassDef {
  pub fn new(name: impl Into<String>) -> Self {
    ClassDef {
      name:    name.into(),
      props:   Vec::new(),
      key:     None,
      journal: true,
      file:    false,
    }
  }

  /// A class whose `content` lives in the blob store. `content` and `type`
  /// are declared automatically unless declared explicitly later.
  pub fn file(name: impl Into<String>) -> Self {
    let mut class = ClassDef::new(name);
    class.file = true;
    class
      .prop("content", PropertyType::string())
      .prop("type", PropertyType::string())
  }

  /// Declare (or redeclare) a property.
  pub fn prop(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
    let name = name.into();
    match self.props.iter_mut().find(|(n, _)| *n == name) {
      Some(slot) => slot.1 = ty,
      None => self.props.push((name, ty)),
    }
    self
  }

  pub fn key(mut self, prop: impl Into<String>) -> Self {
    self.key = Some(prop.into());
    self
  }

  /// Disable journalling for this class.
  pub fn without_journal(mut self) -> Self {
    self.journal = false;
    self
  }

  pub fn name(&self) -> &str { &self.name }

  pub fn key_prop(&self) -> Option<&str> { self.key.as_deref() }

  pub fn journals(&self) -> bool { self.journal }

  pub fn is_file(&self) -> bool { self.file }

  pub fn prop_type(&self, name: &str) -> Option<&PropertyType> {
    self.props.iter().find(|(n, _)| n == name).map(|(_, ty)| ty)
  }

  /// Declared properties in declaration order.
  pub fn props(&self) -> impl Iterator<Item = (&str, &PropertyType)> {
    self.props.iter().map(|(n, ty)| (n.as_str(), ty))
  }

  /// Declared properties held in the primary record. A file class keeps
  /// `content` in the blob store instead.
  pub fn stored_props(&self) -> impl Iterator<Item = (&str, &PropertyType)> {
    self.props().filter(|(n, _)| !(self.file && *n == "content"))
  }

  /// Declared properties, plus the implicit ones when `protected` is set.
  pub fn getprops(&self, protected: bool) -> BTreeMap<String, PropertyType> {
    let mut all: BTreeMap<String, PropertyType> = self
      .props
      .iter()
      .map(|(n, ty)| (n.clone(), ty.clone()))
      .collect();
    if protected {
      all.insert("id".into(), PropertyType::string());
      all.insert("creation".into(), PropertyType::date());
      all.insert("activity".into(), PropertyType::date());
      all.insert("creator".into(), PropertyType::link(USER_CLASS));
      all.insert("actor".into(), PropertyType::link(USER_CLASS));
    }
    all
  }

  /// Property used to label items for display: the key, else `name`, else
  /// `title`, else the alphabetically first property. `id` when the class
  /// has no properties and `default_to_id` is set.
  pub fn labelprop(&self, default_to_id: bool) -> Option<&str> {
    if let Some(key) = self.key.as_deref() {
      return Some(key);
    }
    for candidate in ["name", "title"] {
      if let Some((name, _)) = self.props.iter().find(|(n, _)| n == candidate) {
        return Some(name);
      }
    }
    if let Some(first) = self.props.iter().map(|(n, _)| n.as_str()).min() {
      return Some(first);
    }
    default_to_id.then_some("id")
  }

  /// Property used to sort items of this class when linked from elsewhere.
  pub fn orderprop(&self) -> &str {
    if self.prop_type("order").is_some() {
      return "order";
    }
    self.labelprop(true).unwrap_or("id")
  }

  pub fn descriptor(&self) -> ClassDescriptor {
    let mut props: Vec<(String, String)> = self
      .stored_props()
      .map(|(n, ty)| (n.to_owned(), ty.repr()))
      .collect();
    props.sort();
    ClassDescriptor {
      key: self.key.clone(),
      props,
    }
  }

  fn validate(&self, classes: &BTreeMap<String, ClassDef>) -> Result<()> {
    let invalid = |msg: String| Err(Error::Schema(format!("class {}: {msg}", self.name)));
    if self.name.is_empty()
      || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
      || self.name.starts_with(|c: char| c.is_ascii_digit())
    {
      return invalid("class names must be alphanumeric identifiers".into());
    }
    let mut seen = BTreeSet::new();
    for (name, ty) in &self.props {
      if is_reserved(name) {
        return invalid(format!("{name:?} is a reserved property name"));
      }
      if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return invalid(format!("{name:?} is not a valid property name"));
      }
      if !seen.insert(name) {
        return invalid(format!("property {name:?} declared twice"));
      }
      if let Some(target) = ty.target()
        && !classes.contains_key(target)
      {
        return invalid(format!("{name} links to undeclared class {target:?}"));
      }
    }
    if let Some(key) = &self.key {
      match self.prop_type(key) {
        Some(PropertyType::String { .. }) if !(self.file && key == "content") => {}
        Some(_) => return invalid(format!("key property {key:?} must be a string")),
        None => return invalid(format!("key property {key:?} is not declared")),
      }
    }
    Ok(())
  }
}

// ─── Schema ──────────────────────────────────────────────────────────────────

/// The set of classes a tracker declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
  classes: BTreeMap<String, ClassDef>,
}

impl Schema {
  pub fn new() -> Self { Schema::default() }

  /// Add a class, replacing any earlier class of the same name.
  pub fn class(mut self, class: ClassDef) -> Self {
    self.classes.insert(class.name.clone(), class);
    self
  }

  pub fn get(&self, name: &str) -> Option<&ClassDef> { self.classes.get(name) }

  pub fn require(&self, name: &str) -> Result<&ClassDef> {
    self
      .classes
      .get(name)
      .ok_or_else(|| Error::NoSuchClass(name.to_owned()))
  }

  pub fn classes(&self) -> impl Iterator<Item = &ClassDef> { self.classes.values() }

  pub fn class_names(&self) -> impl Iterator<Item = &str> { self.classes.keys().map(String::as_str) }

  /// Check names, key declarations and link targets.
  pub fn validate(&self) -> Result<()> {
    self
      .classes
      .values()
      .try_for_each(|class| class.validate(&self.classes))
  }

  /// Classes with a Link/Multilink property targeting `target`, as
  /// `(class, prop)` pairs.
  pub fn referrers<'a>(&'a self, target: &'a str) -> impl Iterator<Item = (&'a ClassDef, &'a str)> {
    self.classes.values().flat_map(move |class| {
      class
        .props()
        .filter(move |(_, ty)| ty.target() == Some(target))
        .map(move |(name, _)| (class, name))
    })
  }

  pub fn descriptor(&self, version: u32) -> SchemaDescriptor {
    SchemaDescriptor {
      version,
      tables: self
        .classes
        .iter()
        .map(|(name, class)| (name.clone(), class.descriptor()))
        .collect(),
    }
  }
}

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// Persisted form of one class: key property and `(name, type-repr)` pairs
/// sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClassDescriptor {
  pub key:   Option<String>,
  pub props: Vec<(String, String)>,
}

impl ClassDescriptor {
  pub fn prop_type(&self, name: &str) -> Option<PropertyType> {
    self
      .props
      .iter()
      .find(|(n, _)| n == name)
      .and_then(|(_, repr)| PropertyType::from_repr(repr))
  }

  /// Properties with their decoded types; unknown reprs are skipped.
  pub fn typed_props(&self) -> impl Iterator<Item = (&str, PropertyType)> {
    self
      .props
      .iter()
      .filter_map(|(n, repr)| PropertyType::from_repr(repr).map(|ty| (n.as_str(), ty)))
  }
}

/// `{version, tables: {class: (key, [(prop, repr)])}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SchemaDescriptor {
  pub version: u32,
  pub tables:  BTreeMap<String, ClassDescriptor>,
}

/// Difference between the persisted and declared shape of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassChange {
  pub name:        String,
  pub old:         ClassDescriptor,
  pub new:         ClassDescriptor,
  pub added:       Vec<String>,
  pub removed:     Vec<String>,
  /// Properties present in both whose type representation changed.
  pub retyped:     Vec<String>,
  pub key_changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
  AddClass {
    name:  String,
    class: ClassDescriptor,
  },
  DropClass {
    name:  String,
    class: ClassDescriptor,
  },
  UpdateClass(ClassChange),
}

impl SchemaDescriptor {
  pub fn class(&self, name: &str) -> Option<&ClassDescriptor> { self.tables.get(name) }

  /// Changes that turn `self` (persisted) into `live` (declared). Drops come
  /// first, then updates, then additions.
  pub fn diff(&self, live: &SchemaDescriptor) -> Vec<SchemaChange> {
    let mut changes = Vec::new();
    for (name, class) in &self.tables {
      if !live.tables.contains_key(name) {
        changes.push(SchemaChange::DropClass {
          name:  name.clone(),
          class: class.clone(),
        });
      }
    }
    for (name, new) in &live.tables {
      let Some(old) = self.tables.get(name) else { continue };
      if old == new {
        continue;
      }
      let old_props: BTreeMap<&str, &str> =
        old.props.iter().map(|(n, r)| (n.as_str(), r.as_str())).collect();
      let new_props: BTreeMap<&str, &str> =
        new.props.iter().map(|(n, r)| (n.as_str(), r.as_str())).collect();
      let added = new_props
        .keys()
        .filter(|n| !old_props.contains_key(*n))
        .map(|n| (*n).to_owned())
        .collect();
      let removed = old_props
        .keys()
        .filter(|n| !new_props.contains_key(*n))
        .map(|n| (*n).to_owned())
        .collect();
      let retyped = new_props
        .iter()
        .filter(|(n, repr)| old_props.get(*n).is_some_and(|old| old != *repr))
        .map(|(n, _)| (*n).to_owned())
        .collect();
      changes.push(SchemaChange::UpdateClass(ClassChange {
        name: name.clone(),
        old: old.clone(),
        new: new.clone(),
        added,
        removed,
        retyped,
        key_changed: old.key != new.key,
      }));
    }
    for (name, class) in &live.tables {
      if !self.tables.contains_key(name) {
        changes.push(SchemaChange::AddClass {
          name:  name.clone(),
          class: class.clone(),
        });
      }
    }
    changes
  }
}
