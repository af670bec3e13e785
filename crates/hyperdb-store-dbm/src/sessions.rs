//! Sessions and one-time keys in `<db>/sessions` and `<db>/otks`.
//!
//! Each store is one JSON object rewritten on every change. Writes take
//! effect at once and ignore item transactions.

use std::{collections::BTreeMap, path::PathBuf};

use hyperdb_core::sessions::{SessionRecord, SessionStore};

use crate::{
  Error, Result,
  file::{read_optional, write_atomic},
};

type Records = BTreeMap<String, SessionRecord>;

#[derive(Debug)]
pub struct DbmSessions {
  name: &'static str,
  path: PathBuf,
}

impl DbmSessions {
  pub fn new(name: &'static str, path: PathBuf) -> Self { DbmSessions { name, path } }

  fn read(&self) -> Result<Records> {
    match read_optional(&self.path)? {
      Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::Corrupt {
        label:  self.name.to_owned(),
        detail: e.to_string(),
      }),
      None => Ok(Records::new()),
    }
  }

  fn write(&self, records: &Records) -> Result<()> { write_atomic(&self.path, &serde_json::to_vec(records)?) }
}

impl SessionStore for DbmSessions {
  fn name(&self) -> &str { self.name }

  fn load(&mut self, key: &str) -> hyperdb_core::Result<Option<SessionRecord>> {
    Ok(self.read()?.remove(key))
  }

  fn store(&mut self, key: &str, record: &SessionRecord) -> hyperdb_core::Result<()> {
    let mut records = self.read()?;
    records.insert(key.to_owned(), record.clone());
    Ok(self.write(&records)?)
  }

  fn destroy(&mut self, key: &str) -> hyperdb_core::Result<()> {
    let mut records = self.read()?;
    if records.remove(key).is_some() {
      self.write(&records)?;
    }
    Ok(())
  }

  fn expire(&mut self, cutoff: f64) -> hyperdb_core::Result<usize> {
    let mut records = self.read()?;
    let before = records.len();
    records.retain(|_, record| record.timestamp >= cutoff);
    let removed = before - records.len();
    if removed > 0 {
      self.write(&records)?;
    }
    Ok(removed)
  }
}
