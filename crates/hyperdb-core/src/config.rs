//! Tracker configuration.
//!
//! Values come from an optional TOML file overlaid with `HYPERDB_*`
//! environment variables (`HYPERDB_BACKEND=sqlite`, `HYPERDB_CACHE_SIZE=500`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{
  Result,
  indexer::Tokeniser,
  password::{PBKDF2_DEFAULT_ROUNDS, Scheme},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  #[default]
  Dbm,
  Sqlite,
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
  pub home:                  PathBuf,
  pub backend:               BackendKind,
  /// Overrides `<home>/db/tracker.sqlite3`.
  pub sqlite_path:           Option<PathBuf>,
  pub cache_size:            usize,
  pub indexer_stopwords:     Vec<String>,
  pub indexer_min_length:    usize,
  pub indexer_max_length:    usize,
  pub password_scheme:       Scheme,
  /// Rounds for new PBKDF2 hashes; at least 1000.
  pub pbkdf2_rounds:         u32,
  pub session_lifetime_secs: i64,
  pub sqlite_busy_retries:   u32,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    TrackerConfig {
      home:                  PathBuf::from("."),
      backend:               BackendKind::default(),
      sqlite_path:           None,
      cache_size:            100,
      indexer_stopwords:     Vec::new(),
      indexer_min_length:    2,
      indexer_max_length:    25,
      password_scheme:       Scheme::default(),
      pbkdf2_rounds:         PBKDF2_DEFAULT_ROUNDS,
      session_lifetime_secs: 7 * 24 * 60 * 60,
      sqlite_busy_retries:   5,
    }
  }
}

impl TrackerConfig {
  /// Layer `path` (if it exists) under `HYPERDB_*` environment variables.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path.as_ref()).required(false))
      .add_source(config::Environment::with_prefix("HYPERDB"))
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  /// A config rooted at `home` with every other value defaulted.
  pub fn at(home: impl Into<PathBuf>, backend: BackendKind) -> Self {
    TrackerConfig {
      home: home.into(),
      backend,
      ..Default::default()
    }
  }

  /// `<home>/db`, where every on-disk backend keeps its files.
  pub fn db_dir(&self) -> PathBuf { self.home.join("db") }

  pub fn sqlite_file(&self) -> PathBuf {
    self.sqlite_path.clone().unwrap_or_else(|| self.db_dir().join("tracker.sqlite3"))
  }

  /// `<home>/db/files`, the blob store root.
  pub fn files_dir(&self) -> PathBuf { self.db_dir().join("files") }

  pub fn tokeniser(&self) -> Result<Tokeniser> {
    Tokeniser::new(self.indexer_min_length, self.indexer_max_length, &self.indexer_stopwords)
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn defaults_apply_when_the_file_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackerConfig::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.cache_size, 100);
    assert_eq!(config.indexer_min_length, 2);
    assert_eq!(config.password_scheme, Scheme::Argon2);
    assert_eq!(config.pbkdf2_rounds, PBKDF2_DEFAULT_ROUNDS);
  }

  #[test]
  fn file_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracker.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
      file,
      "home = \"/srv/tracker\"\nbackend = \"sqlite\"\ncache_size = 7\npassword_scheme = \"PBKDF2S5\"\npbkdf2_rounds = 5000\nindexer_stopwords = [\"foo\"]"
    )
    .unwrap();

    let config = TrackerConfig::load(&path).unwrap();
    assert_eq!(config.backend, BackendKind::Sqlite);
    assert_eq!(config.cache_size, 7);
    assert_eq!(config.password_scheme, Scheme::Pbkdf2S5);
    assert_eq!(config.pbkdf2_rounds, 5000);
    assert_eq!(config.sqlite_file(), PathBuf::from("/srv/tracker/db/tracker.sqlite3"));
    assert!(config.tokeniser().unwrap().words("foo bar").contains("BAR"));
    assert!(!config.tokeniser().unwrap().words("foo bar").contains("FOO"));
  }
}
