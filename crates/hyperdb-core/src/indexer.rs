//! Full-text indexing contract, the tokeniser shared by every backend, and
//! the word map the in-memory and file indexers are built on.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, types::ItemId};

/// Words never indexed and ignored in queries.
pub const STOPWORDS: &[&str] = &[
  "A", "AND", "ARE", "AS", "AT", "BE", "BUT", "BY", "FOR", "IF", "IN", "INTO", "IS", "IT", "NO",
  "NOT", "OF", "ON", "OR", "SUCH", "THAT", "THE", "THEIR", "THEN", "THERE", "THESE", "THEY",
  "THIS", "TO", "WAS", "WILL", "WITH",
];

pub const TEXT_PLAIN: &str = "text/plain";

/// What an index hit points at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextId {
  pub class: String,
  pub id:    ItemId,
  pub prop:  String,
}

impl TextId {
  pub fn new(class: impl Into<String>, id: ItemId, prop: impl Into<String>) -> Self {
    TextId {
      class: class.into(),
      id,
      prop: prop.into(),
    }
  }
}

// ─── Tokeniser ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Tokeniser {
  min:       usize,
  max:       usize,
  stopwords: BTreeSet<String>,
  word:      Regex,
}

impl Tokeniser {
  pub fn new(min: usize, max: usize, extra_stopwords: &[String]) -> Result<Self> {
    if min == 0 || min > max {
      return Err(Error::InvalidValue(format!("bad indexer word length bounds {min}..={max}")));
    }
    let word = Regex::new(&format!(r"\b\w{{{min},{max}}}\b"))
      .map_err(|e| Error::InvalidValue(format!("indexer word pattern: {e}")))?;
    let stopwords = STOPWORDS
      .iter()
      .map(|w| (*w).to_owned())
      .chain(extra_stopwords.iter().map(|w| w.to_uppercase()))
      .collect();
    Ok(Tokeniser {
      min,
      max,
      stopwords,
      word,
    })
  }

  /// Distinct upper-cased words of `text` worth indexing.
  pub fn words(&self, text: &str) -> BTreeSet<String> {
    self
      .word
      .find_iter(text)
      .map(|m| m.as_str().to_uppercase())
      .filter(|w| !self.stopwords.contains(w))
      .collect()
  }

  /// Normalise query words, dropping those that could never be indexed.
  pub fn query_words(&self, words: &[String]) -> Vec<String> {
    words
      .iter()
      .map(|w| w.trim().to_uppercase())
      .filter(|w| (self.min..=self.max).contains(&w.chars().count()))
      .filter(|w| !self.stopwords.contains(w))
      .collect()
  }
}

impl Default for Tokeniser {
  fn default() -> Self {
    Tokeniser {
      min:       2,
      max:       25,
      stopwords: STOPWORDS.iter().map(|w| (*w).to_owned()).collect(),
      word:      Regex::new(r"\b\w{2,25}\b").expect("default word pattern must compile"),
    }
  }
}

// ─── Contract ────────────────────────────────────────────────────────────────

/// A transactional full-text index.
///
/// Changes are visible to `find` immediately and become durable on
/// [`save_index`](Indexer::save_index); [`rollback`](Indexer::rollback)
/// returns to the last saved state.
pub trait Indexer: Send {
  fn tokeniser(&self) -> &Tokeniser;

  /// Replace the words recorded for `id`.
  fn set_words(&mut self, id: &TextId, words: BTreeSet<String>) -> Result<()>;

  /// Words must already be normalised by [`Tokeniser::query_words`].
  fn lookup(&mut self, words: &[String]) -> Result<BTreeMap<u64, TextId>>;

  fn purge(&mut self, id: &TextId) -> Result<()>;

  fn save_index(&mut self) -> Result<()>;

  fn rollback(&mut self) -> Result<()>;

  /// Drop every entry; the caller re-walks the indexed properties.
  fn force_reindex(&mut self) -> Result<()>;

  fn should_reindex(&self) -> bool;

  /// Index `text` under `id`, replacing prior tokens. Only `text/plain` is
  /// indexed; other types are skipped.
  fn add_text(&mut self, id: &TextId, text: &str, mime: &str) -> Result<()> {
    if !mime.trim().to_ascii_lowercase().starts_with(TEXT_PLAIN) {
      return Ok(());
    }
    let words = self.tokeniser().words(text);
    self.set_words(id, words)
  }

  /// Entries containing every one of `words`.
  fn find(&mut self, words: &[String]) -> Result<BTreeMap<u64, TextId>> {
    let words = self.tokeniser().query_words(words);
    if words.is_empty() {
      return Ok(BTreeMap::new());
    }
    self.lookup(&words)
  }
}

// ─── Word map ────────────────────────────────────────────────────────────────

/// Word → hit-id sets plus the hit-id registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordMap {
  pub words: BTreeMap<String, BTreeSet<u64>>,
  pub files: BTreeMap<u64, TextId>,
  pub ids:   BTreeMap<TextId, u64>,
  pub next:  u64,
}

impl WordMap {
  pub fn is_empty(&self) -> bool { self.files.is_empty() }

  pub fn set_words(&mut self, id: &TextId, words: BTreeSet<String>) {
    self.purge(id);
    if words.is_empty() {
      return;
    }
    self.next += 1;
    let hit = self.next;
    self.files.insert(hit, id.clone());
    self.ids.insert(id.clone(), hit);
    for word in words {
      self.words.entry(word).or_default().insert(hit);
    }
  }

  pub fn purge(&mut self, id: &TextId) {
    let Some(hit) = self.ids.remove(id) else { return };
    self.files.remove(&hit);
    self.words.retain(|_, hits| {
      hits.remove(&hit);
      !hits.is_empty()
    });
  }

  pub fn lookup(&self, words: &[String]) -> BTreeMap<u64, TextId> {
    let mut hits: Option<BTreeSet<u64>> = None;
    for word in words {
      let Some(found) = self.words.get(word) else {
        return BTreeMap::new();
      };
      hits = Some(match hits {
        None => found.clone(),
        Some(acc) => acc.intersection(found).copied().collect(),
      });
    }
    hits
      .unwrap_or_default()
      .into_iter()
      .filter_map(|hit| self.files.get(&hit).map(|id| (hit, id.clone())))
      .collect()
  }
}

// ─── In-memory indexer ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryIndexer {
  tokeniser: Tokeniser,
  saved:     WordMap,
  current:   WordMap,
}

impl MemoryIndexer {
  pub fn new(tokeniser: Tokeniser) -> Self {
    MemoryIndexer {
      tokeniser,
      ..Default::default()
    }
  }
}

impl Indexer for MemoryIndexer {
  fn tokeniser(&self) -> &Tokeniser { &self.tokeniser }

  fn set_words(&mut self, id: &TextId, words: BTreeSet<String>) -> Result<()> {
    self.current.set_words(id, words);
    Ok(())
  }

  fn lookup(&mut self, words: &[String]) -> Result<BTreeMap<u64, TextId>> {
    Ok(self.current.lookup(words))
  }

  fn purge(&mut self, id: &TextId) -> Result<()> {
    self.current.purge(id);
    Ok(())
  }

  fn save_index(&mut self) -> Result<()> {
    self.saved = self.current.clone();
    Ok(())
  }

  fn rollback(&mut self) -> Result<()> {
    self.current = self.saved.clone();
    Ok(())
  }

  fn force_reindex(&mut self) -> Result<()> {
    self.current = WordMap::default();
    Ok(())
  }

  fn should_reindex(&self) -> bool { false }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tid(id: u64) -> TextId { TextId::new("msg", ItemId::new(id), "content") }

  fn words(list: &[&str]) -> Vec<String> { list.iter().map(|w| (*w).to_owned()).collect() }

  #[test]
  fn tokeniser_uppercases_and_drops_stopwords_and_odd_lengths() {
    let tok = Tokeniser::default();
    let found = tok.words("The quick fox is in a flebble-ish mood x");
    let expected: BTreeSet<String> =
      ["QUICK", "FOX", "FLEBBLE", "ISH", "MOOD"].iter().map(|w| (*w).to_owned()).collect();
    assert_eq!(found, expected);

    let long = "a".repeat(30);
    assert!(tok.words(&long).is_empty());
  }

  #[test]
  fn extra_stopwords_and_bounds_are_configurable() {
    let tok = Tokeniser::new(3, 5, &["fox".to_owned()]).unwrap();
    let found = tok.words("an fox quick elephant owl");
    assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["OWL", "QUICK"]);
    assert!(Tokeniser::new(4, 2, &[]).is_err());
  }

  #[test]
  fn find_is_an_and_of_words() {
    let mut idx = MemoryIndexer::default();
    idx.add_text(&tid(1), "alpha beta", TEXT_PLAIN).unwrap();
    idx.add_text(&tid(2), "beta gamma", TEXT_PLAIN).unwrap();

    let hits = idx.find(&words(&["beta"])).unwrap();
    assert_eq!(hits.len(), 2);
    let hits = idx.find(&words(&["Beta", "gamma"])).unwrap();
    assert_eq!(hits.into_values().collect::<Vec<_>>(), vec![tid(2)]);
    assert!(idx.find(&words(&["beta", "delta"])).unwrap().is_empty());
  }

  #[test]
  fn out_of_bounds_query_words_are_ignored() {
    let mut idx = MemoryIndexer::default();
    idx.add_text(&tid(1), "alpha", TEXT_PLAIN).unwrap();
    let hits = idx.find(&words(&["alpha", "x", "the"])).unwrap();
    assert_eq!(hits.len(), 1);
  }

  #[test]
  fn re_adding_replaces_and_other_mime_types_are_skipped() {
    let mut idx = MemoryIndexer::default();
    idx.add_text(&tid(1), "alpha", TEXT_PLAIN).unwrap();
    idx.add_text(&tid(1), "beta", "text/plain; charset=utf-8").unwrap();
    assert!(idx.find(&words(&["alpha"])).unwrap().is_empty());
    assert_eq!(idx.find(&words(&["beta"])).unwrap().len(), 1);

    idx.add_text(&tid(2), "gamma", "image/png").unwrap();
    assert!(idx.find(&words(&["gamma"])).unwrap().is_empty());
  }

  #[test]
  fn rollback_returns_to_the_saved_index() {
    let mut idx = MemoryIndexer::default();
    idx.add_text(&tid(1), "alpha", TEXT_PLAIN).unwrap();
    idx.save_index().unwrap();
    idx.add_text(&tid(2), "alpha", TEXT_PLAIN).unwrap();
    idx.purge(&tid(1)).unwrap();
    idx.rollback().unwrap();
    let hits = idx.find(&words(&["alpha"])).unwrap();
    assert_eq!(hits.into_values().collect::<Vec<_>>(), vec![tid(1)]);
  }
}
