//! Whole-file tables, atomic replacement and the tracker lock.

use std::{
  fs::{self, File, OpenOptions},
  io::Write as _,
  path::{Path, PathBuf},
};

use fs2::FileExt;
use serde::{Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{Error, Result};

// ─── Atomic writes ───────────────────────────────────────────────────────────

/// Replace `path` with `bytes` through a synced temporary file in the same
/// directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  let dir = path.parent().unwrap_or(Path::new("."));
  fs::create_dir_all(dir).map_err(Error::io(dir))?;
  let mut tmp = NamedTempFile::new_in(dir).map_err(Error::io(dir))?;
  tmp.write_all(bytes).map_err(Error::io(tmp.path()))?;
  tmp.as_file().sync_all().map_err(Error::io(tmp.path()))?;
  tmp.persist(path).map_err(|e| Error::Io {
    path:   path.to_owned(),
    source: e.error,
  })?;
  Ok(())
}

/// The bytes of `path`, or `None` when it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
  match fs::read(path) {
    Ok(bytes) => Ok(Some(bytes)),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(Error::Io {
      path:   path.to_owned(),
      source: e,
    }),
  }
}

pub fn remove_optional(path: &Path) -> Result<()> {
  match fs::remove_file(path) {
    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io {
      path:   path.to_owned(),
      source: e,
    }),
    _ => Ok(()),
  }
}

// ─── Table ───────────────────────────────────────────────────────────────────

/// One bincode file, loaded on first use and written back on
/// [`flush`](Table::flush) when changed.
#[derive(Debug)]
pub struct Table<T> {
  label:  String,
  path:   PathBuf,
  data:   Option<T>,
  dirty:  bool,
  /// The flushed contents, taken at the first change after a flush.
  backup: Option<T>,
}

impl<T: Serialize + DeserializeOwned + Default + Clone> Table<T> {
  pub fn new(label: impl Into<String>, path: PathBuf) -> Self {
    Table {
      label: label.into(),
      path,
      data: None,
      dirty: false,
      backup: None,
    }
  }

  /// A table that replaces whatever is on disk at the next flush.
  pub fn fresh(label: impl Into<String>, path: PathBuf) -> Self {
    Table {
      data: Some(T::default()),
      dirty: true,
      ..Table::new(label, path)
    }
  }

  pub fn path(&self) -> &Path { &self.path }

  fn load(&mut self) -> Result<&mut T> {
    if self.data.is_none() {
      let data = match read_optional(&self.path)? {
        Some(bytes) => bincode::deserialize(&bytes).map_err(|e| Error::Corrupt {
          label:  self.label.clone(),
          detail: e.to_string(),
        })?,
        None => T::default(),
      };
      self.data = Some(data);
    }
    Ok(self.data.get_or_insert_with(T::default))
  }

  pub fn get(&mut self) -> Result<&T> { Ok(self.load()?) }

  pub fn get_mut(&mut self) -> Result<&mut T> {
    if !self.dirty {
      let snapshot = self.load()?.clone();
      self.backup = Some(snapshot);
      self.dirty = true;
    }
    self.load()
  }

  /// Write unflushed changes. On failure the changes stay pending.
  pub fn flush(&mut self) -> Result<()> {
    if let (true, Some(data)) = (self.dirty, &self.data) {
      write_atomic(&self.path, &bincode::serialize(data)?)?;
      debug!(table = %self.label, path = %self.path.display(), "wrote table");
    }
    self.dirty = false;
    self.backup = None;
    Ok(())
  }

  /// Return to the flushed contents without touching the file; a table
  /// created since the last flush is reread on next access.
  pub fn discard(&mut self) {
    if self.dirty {
      self.data = self.backup.take();
      self.dirty = false;
    }
  }
}

// ─── Lock ────────────────────────────────────────────────────────────────────

/// An exclusive advisory lock on `<db>/lockfile`, held until dropped.
#[derive(Debug)]
pub struct Lockfile {
  file: File,
  path: PathBuf,
}

impl Lockfile {
  /// Take the lock, waiting for any other holder to release it.
  pub fn acquire(path: PathBuf) -> Result<Self> {
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(Error::io(&path))?;
    if file.try_lock_exclusive().is_err() {
      info!(path = %path.display(), "tracker is locked, waiting");
      file.lock_exclusive().map_err(Error::io(&path))?;
    }
    Ok(Lockfile { file, path })
  }

  pub fn release(self) -> Result<()> { FileExt::unlock(&self.file).map_err(Error::io(&self.path)) }
}
