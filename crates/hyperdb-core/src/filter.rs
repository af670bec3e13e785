//! Query model shared by `filter`, `find` and `stringFind`.
//!
//! A [`Filter`] carries raw textual conditions. The database resolves them
//! against the schema into typed [`Predicate`]s, which backends may use to
//! narrow candidates and which the database always re-checks per item.

use std::{
  cmp::Ordering,
  collections::{BTreeMap, BTreeSet},
};

use regex::Regex;

use crate::{
  Error, Result,
  date::{Date, Interval, Range},
  item::Item,
  types::ItemId,
  value::Value,
};

// ─── Request ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
  #[default]
  Ascending,
  Descending,
  /// The key takes no part in ordering.
  None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
  pub direction: Direction,
  pub prop:      Option<String>,
}

impl SortKey {
  pub fn asc(prop: impl Into<String>) -> Self {
    SortKey {
      direction: Direction::Ascending,
      prop:      Some(prop.into()),
    }
  }

  pub fn desc(prop: impl Into<String>) -> Self {
    SortKey {
      direction: Direction::Descending,
      prop:      Some(prop.into()),
    }
  }

  /// The property this key orders by, if it orders at all.
  pub fn active(&self) -> Option<(&str, Direction)> {
    match (&self.prop, self.direction) {
      (Some(prop), Direction::Ascending | Direction::Descending) => Some((prop, self.direction)),
      _ => None,
    }
  }
}

/// Which items a query admits by their retired flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retired {
  #[default]
  Exclude,
  Only,
  Include,
}

impl Retired {
  pub fn admits(self, retired: bool) -> bool {
    match self {
      Retired::Exclude => !retired,
      Retired::Only => retired,
      Retired::Include => true,
    }
  }
}

/// A general query over one class.
///
/// Condition keys are property paths: `status` tests the item itself,
/// `messages.author` tests the items its `messages` link to. Conditions
/// sharing a first hop are tested against the same linked item.
#[derive(Debug, Clone, Default)]
pub struct Filter {
  /// Intersect results with these ids, typically full-text search hits.
  pub restrict:   Option<BTreeSet<ItemId>>,
  /// Property path → accepted values; AND across paths.
  pub conditions: BTreeMap<String, Vec<String>>,
  /// As `conditions`, except that strings must equal one of the values.
  pub exact:      BTreeMap<String, Vec<String>>,
  pub sort:       Vec<SortKey>,
  /// Ordered before `sort`.
  pub group:      Vec<SortKey>,
  pub retired:    Retired,
  /// Matches skipped before the first one returned.
  pub offset:     usize,
  pub limit:      Option<usize>,
}

impl Filter {
  pub fn new() -> Self { Filter::default() }

  pub fn restrict(mut self, ids: impl IntoIterator<Item = ItemId>) -> Self {
    self.restrict = Some(ids.into_iter().collect());
    self
  }

  pub fn condition<S: Into<String>>(mut self, path: &str, values: impl IntoIterator<Item = S>) -> Self {
    self
      .conditions
      .entry(path.to_owned())
      .or_default()
      .extend(values.into_iter().map(Into::into));
    self
  }

  pub fn exact<S: Into<String>>(mut self, path: &str, values: impl IntoIterator<Item = S>) -> Self {
    self
      .exact
      .entry(path.to_owned())
      .or_default()
      .extend(values.into_iter().map(Into::into));
    self
  }

  pub fn sort(mut self, key: SortKey) -> Self {
    self.sort.push(key);
    self
  }

  pub fn group(mut self, key: SortKey) -> Self {
    self.group.push(key);
    self
  }

  pub fn include_retired(mut self) -> Self {
    self.retired = Retired::Include;
    self
  }

  pub fn only_retired(mut self) -> Self {
    self.retired = Retired::Only;
    self
  }

  pub fn offset(mut self, offset: usize) -> Self {
    self.offset = offset;
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  /// Group keys then sort keys, skipping inert ones.
  pub fn ordering(&self) -> Vec<(&str, Direction)> {
    self.group.iter().chain(&self.sort).filter_map(SortKey::active).collect()
  }

  /// The window of `ids` selected by `offset` and `limit`.
  pub fn page(&self, ids: Vec<ItemId>) -> Vec<ItemId> {
    ids.into_iter().skip(self.offset).take(self.limit.unwrap_or(usize::MAX)).collect()
  }
}

// ─── Link expressions ────────────────────────────────────────────────────────

/// One step of a postfix expression over the ids a link property holds.
/// Values are written as ids and the negative operators `-1` (empty),
/// `-2` (not), `-3` (and) and `-4` (or).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOp {
  Has(ItemId),
  Empty,
  Not,
  And,
  Or,
}

impl LinkOp {
  /// The operator a negative value stands for.
  pub fn from_code(code: i64) -> Result<Self> {
    Ok(match code {
      -1 => LinkOp::Empty,
      -2 => LinkOp::Not,
      -3 => LinkOp::And,
      -4 => LinkOp::Or,
      other => return Err(Error::InvalidValue(format!("unknown link operator {other}"))),
    })
  }

  fn arity(self) -> usize {
    match self {
      LinkOp::Has(_) | LinkOp::Empty => 0,
      LinkOp::Not => 1,
      LinkOp::And | LinkOp::Or => 2,
    }
  }
}

/// A postfix link expression whose stack discipline has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkExpr(Vec<LinkOp>);

impl LinkExpr {
  /// Whether `values` use operators at all. Without them a list of ids
  /// keeps the property's plain semantics.
  pub fn is_expression(values: &[String]) -> bool {
    values.iter().any(|v| v.trim().parse::<i64>().is_ok_and(|n| n < -1))
  }

  pub fn new(ops: Vec<LinkOp>) -> Result<Self> {
    let mut depth = 0_usize;
    for (position, op) in ops.iter().enumerate() {
      if depth < op.arity() {
        return Err(Error::InvalidValue(format!(
          "link operator {op:?} at position {} has too few arguments",
          position + 1
        )));
      }
      depth = depth - op.arity() + 1;
    }
    if depth != 1 {
      return Err(Error::InvalidValue(format!(
        "link expression leaves {depth} values instead of one"
      )));
    }
    Ok(LinkExpr(ops))
  }

  pub fn evaluate(&self, linked: &[ItemId]) -> bool {
    let mut stack: Vec<bool> = Vec::with_capacity(self.0.len());
    for op in &self.0 {
      let value = match op {
        LinkOp::Has(id) => linked.contains(id),
        LinkOp::Empty => linked.is_empty(),
        LinkOp::Not => !stack.pop().unwrap_or_default(),
        LinkOp::And => {
          let (y, x) = (stack.pop().unwrap_or_default(), stack.pop().unwrap_or_default());
          x && y
        }
        LinkOp::Or => {
          let (y, x) = (stack.pop().unwrap_or_default(), stack.pop().unwrap_or_default());
          x || y
        }
      };
      stack.push(value);
    }
    stack.pop().unwrap_or_default()
  }
}

// ─── Predicates ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Predicate {
  /// Item id is one of these.
  Id(BTreeSet<ItemId>),
  /// Link equals any of `ids`, or is unset when `unset`.
  Link {
    prop:  String,
    ids:   BTreeSet<ItemId>,
    unset: bool,
  },
  /// Multilink contains every one of `all`, or is empty when `empty`.
  Multilink {
    prop:  String,
    all:   BTreeSet<ItemId>,
    empty: bool,
  },
  /// Case-insensitive substring match of any glob.
  Text {
    prop:  String,
    globs: Vec<String>,
    regex: Regex,
  },
  /// Case-insensitive equality with any of `values` (already lower-cased).
  TextEq { prop: String, values: Vec<String> },
  /// Exact string equality; used for key lookups.
  Exact { prop: String, value: String },
  /// Exact equality with any of `values`; unset reads as the empty string.
  Equals { prop: String, values: Vec<String> },
  Date {
    prop:   String,
    ranges: Vec<Range<Date>>,
    unset:  bool,
  },
  Interval {
    prop:   String,
    ranges: Vec<Range<Interval>>,
    unset:  bool,
  },
  Boolean { prop: String, values: Vec<bool> },
  Number { prop: String, values: Vec<f64> },
  /// Link or multilink references any of `ids`.
  LinksAny { prop: String, ids: BTreeSet<ItemId> },
  /// Link or multilink satisfies a postfix expression.
  Expression { prop: String, expr: LinkExpr },
}

impl Predicate {
  pub fn prop(&self) -> Option<&str> {
    match self {
      Predicate::Id(_) => None,
      Predicate::Link { prop, .. }
      | Predicate::Multilink { prop, .. }
      | Predicate::Text { prop, .. }
      | Predicate::TextEq { prop, .. }
      | Predicate::Exact { prop, .. }
      | Predicate::Equals { prop, .. }
      | Predicate::Date { prop, .. }
      | Predicate::Interval { prop, .. }
      | Predicate::Boolean { prop, .. }
      | Predicate::Number { prop, .. }
      | Predicate::LinksAny { prop, .. }
      | Predicate::Expression { prop, .. } => Some(prop),
    }
  }

  pub fn text(prop: impl Into<String>, globs: Vec<String>) -> Result<Self> {
    let regex = globs_to_regex(&globs)?;
    Ok(Predicate::Text {
      prop: prop.into(),
      globs,
      regex,
    })
  }

  pub fn matches(&self, item: &Item) -> bool {
    let value = |prop: &str| item.value(prop);
    match self {
      Predicate::Id(ids) => ids.contains(&item.id),
      Predicate::Link { prop, ids, unset } => match value(prop) {
        Some(Value::Link(id)) => ids.contains(&id),
        None => *unset,
        Some(_) => false,
      },
      Predicate::Multilink { prop, all, empty } => {
        let linked: BTreeSet<ItemId> = match value(prop) {
          Some(Value::Multilink(ids)) => ids.into_iter().collect(),
          _ => BTreeSet::new(),
        };
        (*empty && linked.is_empty()) || (!all.is_empty() && all.is_subset(&linked))
      }
      Predicate::Text { prop, regex, .. } => {
        value(prop).is_some_and(|v| v.as_str().is_some_and(|s| regex.is_match(s)))
      }
      Predicate::TextEq { prop, values } => value(prop)
        .is_some_and(|v| v.as_str().is_some_and(|s| values.contains(&s.to_lowercase()))),
      Predicate::Exact { prop, value: wanted } => {
        value(prop).is_some_and(|v| v.as_str() == Some(wanted.as_str()))
      }
      Predicate::Equals { prop, values } => {
        let held = value(prop);
        let held = held.as_ref().and_then(Value::as_str).unwrap_or_default();
        values.iter().any(|v| v == held)
      }
      Predicate::Date { prop, ranges, unset } => match value(prop) {
        Some(Value::Date(d)) => ranges.iter().any(|r| r.contains(&d)),
        None => *unset,
        Some(_) => false,
      },
      Predicate::Interval { prop, ranges, unset } => match value(prop) {
        Some(Value::Interval(i)) => ranges.iter().any(|r| r.contains(&i)),
        None => *unset,
        Some(_) => false,
      },
      Predicate::Boolean { prop, values } => {
        value(prop).and_then(|v| v.as_bool()).is_some_and(|b| values.contains(&b))
      }
      Predicate::Number { prop, values } => value(prop)
        .and_then(|v| v.as_number())
        .is_some_and(|n| values.iter().any(|x| *x == n.as_f64())),
      Predicate::LinksAny { prop, ids } => match value(prop) {
        Some(Value::Link(id)) => ids.contains(&id),
        Some(Value::Multilink(linked)) => linked.iter().any(|id| ids.contains(id)),
        _ => false,
      },
      Predicate::Expression { prop, expr } => match value(prop) {
        Some(Value::Link(id)) => expr.evaluate(&[id]),
        Some(Value::Multilink(linked)) => expr.evaluate(&linked),
        _ => expr.evaluate(&[]),
      },
    }
  }
}

/// Translate a glob (`*` any run, `?` one character) into an unanchored
/// regex fragment.
pub fn glob_to_regex(glob: &str) -> String {
  let mut out = String::with_capacity(glob.len() + 8);
  for ch in glob.chars() {
    match ch {
      '*' => out.push_str(".*"),
      '?' => out.push('.'),
      other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
    }
  }
  out
}

fn globs_to_regex(globs: &[String]) -> Result<Regex> {
  let alternatives: Vec<String> = globs.iter().map(|g| glob_to_regex(g)).collect();
  Regex::new(&format!("(?is)(?:{})", alternatives.join("|")))
    .map_err(|e| Error::InvalidValue(format!("bad string filter {globs:?}: {e}")))
}

// ─── Ordering ────────────────────────────────────────────────────────────────

/// One comparable sort value. Unset values order first.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
  Null,
  Number(f64),
  Text(String),
  Date(Date),
  Interval(i64),
  Many(Vec<SortValue>),
}

impl SortValue {
  fn rank(&self) -> u8 {
    match self {
      SortValue::Null => 0,
      SortValue::Number(_) => 1,
      SortValue::Text(_) => 2,
      SortValue::Date(_) => 3,
      SortValue::Interval(_) => 4,
      SortValue::Many(_) => 5,
    }
  }

  pub fn compare(&self, other: &SortValue) -> Ordering {
    match (self, other) {
      (SortValue::Number(a), SortValue::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
      (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
      (SortValue::Date(a), SortValue::Date(b)) => a.cmp(b),
      (SortValue::Interval(a), SortValue::Interval(b)) => a.cmp(b),
      (SortValue::Many(a), SortValue::Many(b)) => {
        for (x, y) in a.iter().zip(b) {
          let ord = x.compare(y);
          if ord != Ordering::Equal {
            return ord;
          }
        }
        a.len().cmp(&b.len())
      }
      _ => self.rank().cmp(&other.rank()),
    }
  }
}

/// Compare two rows of sort values under per-column directions.
pub fn compare_rows(a: &[SortValue], b: &[SortValue], directions: &[Direction]) -> Ordering {
  for ((x, y), direction) in a.iter().zip(b).zip(directions) {
    let ord = x.compare(y);
    let ord = match direction {
      Direction::Descending => ord.reverse(),
      _ => ord,
    };
    if ord != Ordering::Equal {
      return ord;
    }
  }
  Ordering::Equal
}
