//! Full-text index split into per-letter segments under `<db>/indexes`.
//!
//! Each segment holds the words starting with one character, bincode-encoded
//! and zstd-compressed. Segments load lazily for the letters a query or an
//! edit touches. The registry (`indexes/files`) maps hit ids to text ids and
//! records which letters each hit appears under, so a purge only loads those.

use std::{
  collections::{BTreeMap, BTreeSet},
  fs,
  path::{Path, PathBuf},
};

use hyperdb_core::indexer::{Indexer, TextId, Tokeniser};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use crate::{
  Error, Result,
  file::{read_optional, remove_optional, write_atomic},
};

pub const INDEX_VERSION: &str = "1";
const REGISTRY: &str = "files";
const VERSION: &str = "version";
const COMPRESSION_LEVEL: i32 = 3;

type Segment = BTreeMap<String, BTreeSet<u64>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Registry {
  files:   BTreeMap<u64, TextId>,
  ids:     BTreeMap<TextId, u64>,
  letters: BTreeMap<u64, BTreeSet<char>>,
  next:    u64,
}

fn letter(word: &str) -> char {
  match word.chars().next() {
    Some(c) if c.is_ascii_alphanumeric() => c,
    _ => '_',
  }
}

/// Compress `value` for writing to `path`.
fn encode<T: Serialize>(value: &T, path: &Path) -> Result<Vec<u8>> {
  let raw = bincode::serialize(value)?;
  zstd::encode_all(raw.as_slice(), COMPRESSION_LEVEL).map_err(Error::io(path))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, String> {
  let raw = zstd::decode_all(bytes).map_err(|e| e.to_string())?;
  bincode::deserialize(&raw).map_err(|e| e.to_string())
}

#[derive(Debug)]
pub struct DbmIndexer {
  dir:       PathBuf,
  tokeniser: Tokeniser,
  saved:     Registry,
  current:   Registry,
  segments:  BTreeMap<char, Segment>,
  dirty:     BTreeSet<char>,
  /// Every segment on disk is obsolete; set by `force_reindex`.
  cleared:   bool,
  versioned: bool,
  stale:     bool,
}

impl DbmIndexer {
  /// Open the index in `dir`. `existing` says whether the tracker already
  /// holds data; a missing or outdated index then needs rebuilding.
  pub fn open(dir: PathBuf, tokeniser: Tokeniser, existing: bool) -> Result<Self> {
    let version = read_optional(&dir.join(VERSION))?.map(|v| String::from_utf8_lossy(&v).trim().to_owned());
    let mut versioned = version.as_deref() == Some(INDEX_VERSION);
    let mut stale = existing && !versioned;
    if stale {
      info!(found = ?version, expected = INDEX_VERSION, "index version mismatch");
    }

    let mut registry = Registry::default();
    if versioned && let Some(bytes) = read_optional(&dir.join(REGISTRY))? {
      match decode(&bytes) {
        Ok(loaded) => registry = loaded,
        Err(detail) => {
          warn!(%detail, "index registry is corrupt, scheduling a reindex");
          remove_optional(&dir.join(VERSION))?;
          versioned = false;
          stale = true;
        }
      }
    }

    Ok(DbmIndexer {
      dir,
      tokeniser,
      saved: registry.clone(),
      current: registry,
      segments: BTreeMap::new(),
      dirty: BTreeSet::new(),
      cleared: false,
      versioned,
      stale,
    })
  }

  fn segment_path(&self, letter: char) -> PathBuf { self.dir.join(letter.to_string()) }

  fn segment(&mut self, letter: char) -> Result<&mut Segment> {
    if !self.segments.contains_key(&letter) {
      let loaded = if self.cleared {
        Segment::new()
      } else {
        self.read_segment(letter)?
      };
      self.segments.insert(letter, loaded);
    }
    Ok(self.segments.entry(letter).or_default())
  }

  fn read_segment(&mut self, letter: char) -> Result<Segment> {
    let path = self.segment_path(letter);
    let Some(bytes) = read_optional(&path)? else {
      return Ok(Segment::new());
    };
    match decode(&bytes) {
      Ok(segment) => Ok(segment),
      Err(detail) => {
        warn!(segment = %path.display(), %detail, "index segment is corrupt, scheduling a reindex");
        remove_optional(&self.dir.join(VERSION))?;
        self.versioned = false;
        self.stale = true;
        Ok(Segment::new())
      }
    }
  }

  fn segment_mut(&mut self, letter: char) -> Result<&mut Segment> {
    self.dirty.insert(letter);
    self.segment(letter)
  }

  fn purge_hit(&mut self, id: &TextId) -> Result<()> {
    let Some(hit) = self.current.ids.remove(id) else {
      return Ok(());
    };
    self.current.files.remove(&hit);
    for letter in self.current.letters.remove(&hit).unwrap_or_default() {
      self.segment_mut(letter)?.retain(|_, hits| {
        hits.remove(&hit);
        !hits.is_empty()
      });
    }
    Ok(())
  }

  fn save(&mut self) -> Result<()> {
    if self.cleared {
      if self.dir.exists() {
        fs::remove_dir_all(&self.dir).map_err(Error::io(&self.dir))?;
      }
      self.versioned = false;
    }
    let dirty = std::mem::take(&mut self.dirty);
    let changed = self.cleared || !dirty.is_empty();
    for letter in dirty {
      if let Some(segment) = self.segments.get(&letter) {
        let path = self.segment_path(letter);
        if segment.is_empty() {
          remove_optional(&path)?;
        } else {
          write_atomic(&path, &encode(segment, &path)?)?;
        }
      }
    }
    if changed || !self.versioned {
      let path = self.dir.join(REGISTRY);
      write_atomic(&path, &encode(&self.current, &path)?)?;
    }
    // A stale index stays unversioned until `force_reindex` rebuilds it.
    if !self.versioned && !self.stale {
      write_atomic(&self.dir.join(VERSION), INDEX_VERSION.as_bytes())?;
      self.versioned = true;
    }
    self.cleared = false;
    self.saved = self.current.clone();
    Ok(())
  }
}

impl Indexer for DbmIndexer {
  fn tokeniser(&self) -> &Tokeniser { &self.tokeniser }

  fn set_words(&mut self, id: &TextId, words: BTreeSet<String>) -> hyperdb_core::Result<()> {
    self.purge_hit(id)?;
    if words.is_empty() {
      return Ok(());
    }
    self.current.next += 1;
    let hit = self.current.next;
    self.current.files.insert(hit, id.clone());
    self.current.ids.insert(id.clone(), hit);
    let letters: BTreeSet<char> = words.iter().map(|w| letter(w)).collect();
    for word in words {
      self.segment_mut(letter(&word))?.entry(word).or_default().insert(hit);
    }
    self.current.letters.insert(hit, letters);
    Ok(())
  }

  fn lookup(&mut self, words: &[String]) -> hyperdb_core::Result<BTreeMap<u64, TextId>> {
    let mut hits: Option<BTreeSet<u64>> = None;
    for word in words {
      let Some(found) = self.segment(letter(word))?.get(word).cloned() else {
        return Ok(BTreeMap::new());
      };
      hits = Some(match hits {
        None => found,
        Some(acc) => acc.intersection(&found).copied().collect(),
      });
    }
    Ok(
      hits
        .unwrap_or_default()
        .into_iter()
        .filter_map(|hit| self.current.files.get(&hit).map(|id| (hit, id.clone())))
        .collect(),
    )
  }

  fn purge(&mut self, id: &TextId) -> hyperdb_core::Result<()> { Ok(self.purge_hit(id)?) }

  fn save_index(&mut self) -> hyperdb_core::Result<()> { Ok(self.save()?) }

  fn rollback(&mut self) -> hyperdb_core::Result<()> {
    for letter in std::mem::take(&mut self.dirty) {
      self.segments.remove(&letter);
    }
    if self.cleared {
      self.segments.clear();
      self.cleared = false;
    }
    self.current = self.saved.clone();
    Ok(())
  }

  fn force_reindex(&mut self) -> hyperdb_core::Result<()> {
    self.current = Registry::default();
    self.segments.clear();
    self.dirty.clear();
    self.cleared = true;
    self.stale = false;
    Ok(())
  }

  fn should_reindex(&self) -> bool { self.stale }
}

#[cfg(test)]
mod tests {
  use hyperdb_core::ItemId;

  use super::*;

  fn tid(id: u64) -> TextId { TextId::new("msg", ItemId::new(id), "content") }

  fn words(list: &[&str]) -> Vec<String> { list.iter().map(|w| (*w).to_owned()).collect() }

  fn indexer(dir: &Path, existing: bool) -> DbmIndexer {
    DbmIndexer::open(dir.join("indexes"), Tokeniser::default(), existing).unwrap()
  }

  #[test]
  fn saved_segments_are_split_by_first_letter() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = indexer(dir.path(), false);
    index.add_text(&tid(1), "apple banana 42things", "text/plain").unwrap();
    index.save_index().unwrap();

    let root = dir.path().join("indexes");
    for name in ["A", "B", "4", "files", "version"] {
      assert!(root.join(name).exists(), "missing {name}");
    }
    assert!(!root.join("C").exists());

    let mut reopened = indexer(dir.path(), true);
    assert!(!reopened.should_reindex());
    assert_eq!(reopened.find(&words(&["banana"])).unwrap().into_values().collect::<Vec<_>>(), vec![tid(1)]);
  }

  #[test]
  fn unsaved_words_roll_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = indexer(dir.path(), false);
    index.add_text(&tid(1), "kept", "text/plain").unwrap();
    index.save_index().unwrap();
    index.add_text(&tid(2), "kept dropped", "text/plain").unwrap();
    index.purge(&tid(1)).unwrap();
    index.rollback().unwrap();

    let hits: Vec<TextId> = index.find(&words(&["kept"])).unwrap().into_values().collect();
    assert_eq!(hits, vec![tid(1)]);
    assert!(index.find(&words(&["dropped"])).unwrap().is_empty());
  }

  #[test]
  fn purge_removes_the_hit_from_every_segment() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = indexer(dir.path(), false);
    index.add_text(&tid(1), "alpha beta", "text/plain").unwrap();
    index.add_text(&tid(2), "alpha", "text/plain").unwrap();
    index.save_index().unwrap();
    index.purge(&tid(1)).unwrap();
    index.save_index().unwrap();

    let mut reopened = indexer(dir.path(), true);
    assert!(reopened.find(&words(&["beta"])).unwrap().is_empty());
    assert_eq!(reopened.find(&words(&["alpha"])).unwrap().len(), 1);
    assert!(!dir.path().join("indexes").join("B").exists());
  }

  #[test]
  fn missing_or_outdated_versions_request_a_reindex() {
    let dir = tempfile::tempdir().unwrap();
    assert!(!indexer(dir.path(), false).should_reindex());
    assert!(indexer(dir.path(), true).should_reindex());

    let mut index = indexer(dir.path(), true);
    index.force_reindex().unwrap();
    index.save_index().unwrap();
    assert!(!indexer(dir.path(), true).should_reindex());

    fs::write(dir.path().join("indexes").join(VERSION), "0").unwrap();
    assert!(indexer(dir.path(), true).should_reindex());
  }

  #[test]
  fn corrupt_segments_are_treated_as_empty_and_flag_a_reindex() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = indexer(dir.path(), false);
    index.add_text(&tid(1), "zebra", "text/plain").unwrap();
    index.save_index().unwrap();
    fs::write(dir.path().join("indexes").join("Z"), b"not zstd").unwrap();

    let mut reopened = indexer(dir.path(), true);
    assert!(reopened.find(&words(&["zebra"])).unwrap().is_empty());
    assert!(reopened.should_reindex());
    assert!(indexer(dir.path(), true).should_reindex());
  }

  #[test]
  fn detected_corruption_survives_later_saves() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = indexer(dir.path(), false);
    index.add_text(&tid(1), "zebra", "text/plain").unwrap();
    index.save_index().unwrap();
    fs::write(dir.path().join("indexes").join("Z"), b"not zstd").unwrap();

    let mut reopened = indexer(dir.path(), true);
    assert!(reopened.find(&words(&["zebra"])).unwrap().is_empty());
    reopened.add_text(&tid(2), "walrus", "text/plain").unwrap();
    reopened.save_index().unwrap();
    assert!(!dir.path().join("indexes").join(VERSION).exists());
    assert!(indexer(dir.path(), true).should_reindex());

    reopened.force_reindex().unwrap();
    reopened.add_text(&tid(1), "zebra", "text/plain").unwrap();
    reopened.save_index().unwrap();
    let mut rebuilt = indexer(dir.path(), true);
    assert!(!rebuilt.should_reindex());
    assert_eq!(rebuilt.find(&words(&["zebra"])).unwrap().len(), 1);
  }

  #[test]
  fn force_reindex_replaces_every_segment_on_save() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = indexer(dir.path(), false);
    index.add_text(&tid(1), "old words", "text/plain").unwrap();
    index.save_index().unwrap();

    index.force_reindex().unwrap();
    index.add_text(&tid(2), "new words", "text/plain").unwrap();
    index.save_index().unwrap();

    let mut reopened = indexer(dir.path(), true);
    assert!(reopened.find(&words(&["old"])).unwrap().is_empty());
    let hits: Vec<TextId> = reopened.find(&words(&["words"])).unwrap().into_values().collect();
    assert_eq!(hits, vec![tid(2)]);
    assert!(!dir.path().join("indexes").join("O").exists());
  }
}
