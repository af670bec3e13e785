//! Byte payloads kept outside the primary store.
//!
//! Writes are staged under a per-transaction name next to their final path
//! and promoted by rename when the transaction commits. Removals are staged
//! too. Discarding a staged write deletes the staged file; committed
//! payloads are never touched by a rollback.

use std::{
  collections::BTreeMap,
  fs::{self, File},
  io::{self, Write},
  path::{Path, PathBuf},
  sync::OnceLock,
  time::SystemTime,
};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Result, types::ItemId};

const BUCKET: u64 = 1000;
const STAGED_SUFFIX: &str = "tmp";

/// Address of one payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobKey {
  pub class: String,
  pub id:    ItemId,
  pub prop:  Option<String>,
}

impl BlobKey {
  pub fn new(class: impl Into<String>, id: ItemId, prop: Option<&str>) -> Self {
    BlobKey {
      class: class.into(),
      id,
      prop: prop.map(str::to_owned),
    }
  }

  /// `<class>/<id / 1000>/<class><id>[.<prop>]`
  pub fn relative_path(&self) -> PathBuf {
    let mut name = format!("{}{}", self.class, self.id);
    if let Some(prop) = &self.prop {
      name.push('.');
      name.push_str(prop);
    }
    PathBuf::from(&self.class)
      .join((self.id.get() / BUCKET).to_string())
      .join(name)
  }
}

#[derive(Debug, Clone)]
pub enum BlobRoot {
  Disk(PathBuf),
  Memory,
}

#[derive(Debug)]
pub struct BlobStore {
  root:      BlobRoot,
  txn:       Uuid,
  /// Staged payloads by key; on disk only the staged path is kept.
  staged:    BTreeMap<BlobKey, Staged>,
  committed: BTreeMap<BlobKey, Vec<u8>>,
}

#[derive(Debug)]
enum Staged {
  File(PathBuf),
  Bytes(Vec<u8>),
  Removed,
}

fn process_start() -> SystemTime {
  static START: OnceLock<SystemTime> = OnceLock::new();
  *START.get_or_init(SystemTime::now)
}

impl BlobStore {
  pub fn new(root: BlobRoot) -> Self {
    process_start();
    BlobStore {
      root,
      txn: Uuid::new_v4(),
      staged: BTreeMap::new(),
      committed: BTreeMap::new(),
    }
  }

  pub fn disk(dir: impl Into<PathBuf>) -> Self { BlobStore::new(BlobRoot::Disk(dir.into())) }

  pub fn memory() -> Self { BlobStore::new(BlobRoot::Memory) }

  fn final_path(dir: &Path, key: &BlobKey) -> PathBuf { dir.join(key.relative_path()) }

  fn staged_path(&self, dir: &Path, key: &BlobKey) -> PathBuf {
    let mut path = Self::final_path(dir, key).into_os_string();
    path.push(format!(".{}.{STAGED_SUFFIX}", self.txn));
    PathBuf::from(path)
  }

  // ── Staging ──

  /// Stage `bytes` for `key`; visible to [`get`](Self::get) at once.
  pub fn stage(&mut self, key: &BlobKey, bytes: &[u8]) -> Result<()> {
    let staged = match &self.root {
      BlobRoot::Memory => Staged::Bytes(bytes.to_vec()),
      BlobRoot::Disk(dir) => {
        let path = self.staged_path(dir, key);
        if let Some(parent) = path.parent() {
          fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Staged::File(path)
      }
    };
    debug!(class = %key.class, id = %key.id, "staged blob");
    self.staged.insert(key.clone(), staged);
    Ok(())
  }

  /// Stage the removal of `key`; [`get`](Self::get) reports it gone at once.
  pub fn stage_removal(&mut self, key: &BlobKey) -> Result<()> {
    self.discard(key)?;
    debug!(class = %key.class, id = %key.id, "staged blob removal");
    self.staged.insert(key.clone(), Staged::Removed);
    Ok(())
  }

  /// Staged bytes if present, else committed bytes, else `None`.
  pub fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
    match self.staged.get(key) {
      Some(Staged::Bytes(bytes)) => return Ok(Some(bytes.clone())),
      Some(Staged::File(path)) => return Ok(Some(fs::read(path)?)),
      Some(Staged::Removed) => return Ok(None),
      None => {}
    }
    match &self.root {
      BlobRoot::Memory => Ok(self.committed.get(key).cloned()),
      BlobRoot::Disk(dir) => match fs::read(Self::final_path(dir, key)) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
      },
    }
  }

  pub fn is_staged(&self, key: &BlobKey) -> bool { self.staged.contains_key(key) }

  // ── Transaction boundaries ──

  /// Apply the staged write or removal for `key` to permanent storage.
  pub fn promote(&mut self, key: &BlobKey) -> Result<()> {
    let Some(staged) = self.staged.remove(key) else {
      return Ok(());
    };
    match staged {
      Staged::Removed => self.remove_committed(key)?,
      Staged::Bytes(bytes) => {
        if let BlobRoot::Memory = self.root {
          self.committed.insert(key.clone(), bytes);
        }
      }
      Staged::File(path) => match &self.root {
        BlobRoot::Disk(dir) => fs::rename(&path, Self::final_path(dir, key))?,
        BlobRoot::Memory => fs::remove_file(path)?,
      },
    }
    Ok(())
  }

  fn remove_committed(&mut self, key: &BlobKey) -> Result<()> {
    match &self.root {
      BlobRoot::Memory => {
        self.committed.remove(key);
      }
      BlobRoot::Disk(dir) => match fs::remove_file(Self::final_path(dir, key)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
      },
    }
    Ok(())
  }

  /// Forget the staged payload for `key`.
  pub fn discard(&mut self, key: &BlobKey) -> Result<()> {
    if let Some(Staged::File(path)) = self.staged.remove(key) {
      match fs::remove_file(&path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
      }
    }
    Ok(())
  }

  /// Discard every staged payload and start a new staging generation.
  pub fn rollback(&mut self) -> Result<()> {
    let keys: Vec<BlobKey> = self.staged.keys().cloned().collect();
    for key in &keys {
      self.discard(key)?;
    }
    self.txn = Uuid::new_v4();
    Ok(())
  }

  /// Start a new staging generation after a commit.
  pub fn begin(&mut self) { self.txn = Uuid::new_v4(); }

  /// Delete staged files left behind by writers that crashed before this
  /// process started. Returns how many were removed.
  pub fn recover(&self) -> Result<usize> {
    let BlobRoot::Disk(dir) = &self.root else {
      return Ok(0);
    };
    if !dir.exists() {
      return Ok(0);
    }
    let cutoff = process_start();
    let mut removed = 0;
    let mut pending = vec![dir.clone()];
    while let Some(current) = pending.pop() {
      for entry in fs::read_dir(&current)? {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if meta.is_dir() {
          pending.push(path);
          continue;
        }
        let stale = path.extension().is_some_and(|ext| ext == STAGED_SUFFIX)
          && meta.modified().map(|m| m < cutoff).unwrap_or(false);
        if stale {
          warn!(path = %path.display(), "removing stale staged blob");
          fs::remove_file(&path)?;
          removed += 1;
        }
      }
    }
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(id: u64) -> BlobKey { BlobKey::new("file", ItemId::new(id), None) }

  #[test]
  fn paths_are_bucketed_by_thousands() {
    assert_eq!(key(7).relative_path(), PathBuf::from("file/0/file7"));
    let with_prop = BlobKey::new("msg", ItemId::new(2345), Some("content"));
    assert_eq!(with_prop.relative_path(), PathBuf::from("msg/2/msg2345.content"));
  }

  #[test]
  fn staged_bytes_are_visible_then_promoted_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::disk(dir.path());
    store.stage(&key(1), b"hello").unwrap();
    assert_eq!(store.get(&key(1)).unwrap().as_deref(), Some(&b"hello"[..]));
    assert!(!dir.path().join("file/0/file1").exists());

    store.promote(&key(1)).unwrap();
    store.begin();
    assert_eq!(fs::read(dir.path().join("file/0/file1")).unwrap(), b"hello");
    assert_eq!(store.get(&key(1)).unwrap().as_deref(), Some(&b"hello"[..]));
  }

  #[test]
  fn rollback_discards_staged_bytes_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::disk(dir.path());
    store.stage(&key(1), b"one").unwrap();
    store.promote(&key(1)).unwrap();

    store.stage(&key(1), b"two").unwrap();
    store.stage(&key(2), b"new").unwrap();
    store.rollback().unwrap();

    assert_eq!(store.get(&key(1)).unwrap().as_deref(), Some(&b"one"[..]));
    assert_eq!(store.get(&key(2)).unwrap(), None);
    let leftovers: Vec<_> = fs::read_dir(dir.path().join("file/0")).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
  }

  #[test]
  fn memory_root_behaves_like_disk() {
    let mut store = BlobStore::memory();
    store.stage(&key(3), b"x").unwrap();
    store.promote(&key(3)).unwrap();
    assert_eq!(store.get(&key(3)).unwrap().as_deref(), Some(&b"x"[..]));
    store.stage_removal(&key(3)).unwrap();
    store.promote(&key(3)).unwrap();
    assert_eq!(store.get(&key(3)).unwrap(), None);
  }

  #[test]
  fn staged_removals_hide_committed_bytes_until_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::disk(dir.path());
    store.stage(&key(1), b"old").unwrap();
    store.promote(&key(1)).unwrap();
    store.begin();

    store.stage_removal(&key(1)).unwrap();
    assert_eq!(store.get(&key(1)).unwrap(), None);
    assert!(dir.path().join("file/0/file1").exists());
    store.rollback().unwrap();
    assert_eq!(store.get(&key(1)).unwrap().as_deref(), Some(&b"old"[..]));

    store.stage_removal(&key(1)).unwrap();
    store.stage(&key(1), b"new").unwrap();
    store.promote(&key(1)).unwrap();
    assert_eq!(fs::read(dir.path().join("file/0/file1")).unwrap(), b"new");

    store.stage_removal(&key(1)).unwrap();
    store.promote(&key(1)).unwrap();
    assert!(!dir.path().join("file/0/file1").exists());
  }

  #[test]
  fn recover_ignores_fresh_staged_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::disk(dir.path());
    store.stage(&key(1), b"live").unwrap();
    assert_eq!(store.recover().unwrap(), 0);
    assert!(store.is_staged(&key(1)));
  }
}
