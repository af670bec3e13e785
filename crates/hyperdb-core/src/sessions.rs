//! Key → record stores for web sessions and one-time keys.
//!
//! Backends implement the four primitive operations of [`SessionStore`];
//! the merging, throttling and expiry rules live in the provided methods so
//! every backend behaves the same.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::{Error, Result};

const KEY_BYTES: usize = 40;
/// Minimum age before `update_timestamp` rewrites a record.
const TOUCH_INTERVAL_SECS: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
  pub fields:    Map<String, Json>,
  /// Seconds since the Unix epoch.
  pub timestamp: f64,
}

pub fn now_secs() -> f64 { Utc::now().timestamp_micros() as f64 / 1_000_000.0 }

/// Timestamp that makes an entry expire `item_lifetime` seconds from now
/// under a store cleaned with `store_lifetime`.
pub fn lifetime(store_lifetime: i64, item_lifetime: i64) -> f64 {
  now_secs() - store_lifetime as f64 + item_lifetime as f64
}

pub trait SessionStore: Send {
  /// `"sessions"` or `"otks"`.
  fn name(&self) -> &str;

  fn load(&mut self, key: &str) -> Result<Option<SessionRecord>>;

  fn store(&mut self, key: &str, record: &SessionRecord) -> Result<()>;

  fn destroy(&mut self, key: &str) -> Result<()>;

  /// Remove records last touched before `cutoff`; returns how many.
  fn expire(&mut self, cutoff: f64) -> Result<usize>;

  fn exists(&mut self, key: &str) -> Result<bool> { Ok(self.load(key)?.is_some()) }

  fn getall(&mut self, key: &str) -> Result<Map<String, Json>> {
    match self.load(key)? {
      Some(record) => Ok(record.fields),
      None => Err(Error::NoSuchKey {
        class: self.name().to_owned(),
        key:   key.to_owned(),
      }),
    }
  }

  fn get(&mut self, key: &str, field: &str) -> Result<Option<Json>> {
    Ok(self.getall(key)?.get(field).cloned())
  }

  /// Merge `fields` into the record for `key`, creating it if needed, and
  /// mark it as touched now.
  fn set(&mut self, key: &str, fields: Map<String, Json>) -> Result<()> {
    self.set_with_timestamp(key, fields, now_secs())
  }

  fn set_with_timestamp(&mut self, key: &str, fields: Map<String, Json>, timestamp: f64) -> Result<()> {
    let mut record = self.load(key)?.unwrap_or(SessionRecord {
      fields: Map::new(),
      timestamp,
    });
    record.fields.extend(fields);
    record.timestamp = timestamp;
    self.store(key, &record)
  }

  /// Mark `key` as touched, at most once a minute.
  fn update_timestamp(&mut self, key: &str) -> Result<()> {
    let Some(mut record) = self.load(key)? else {
      return Ok(());
    };
    let now = now_secs();
    if now - record.timestamp > TOUCH_INTERVAL_SECS {
      record.timestamp = now;
      self.store(key, &record)?;
    }
    Ok(())
  }

  /// Expire everything older than `lifetime_secs`.
  fn clean(&mut self, lifetime_secs: i64) -> Result<usize> {
    self.expire(now_secs() - lifetime_secs as f64)
  }

  /// A fresh key not present in the store.
  fn get_unique_key(&mut self) -> Result<String> {
    loop {
      let mut bytes = [0u8; KEY_BYTES];
      OsRng.fill_bytes(&mut bytes);
      let key = URL_SAFE_NO_PAD.encode(bytes);
      if !self.exists(&key)? {
        return Ok(key);
      }
    }
  }
}

/// A [`SessionStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemorySessions {
  name:    String,
  records: BTreeMap<String, SessionRecord>,
}

impl MemorySessions {
  pub fn new(name: impl Into<String>) -> Self {
    MemorySessions {
      name:    name.into(),
      records: BTreeMap::new(),
    }
  }
}

impl SessionStore for MemorySessions {
  fn name(&self) -> &str { &self.name }

  fn load(&mut self, key: &str) -> Result<Option<SessionRecord>> { Ok(self.records.get(key).cloned()) }

  fn store(&mut self, key: &str, record: &SessionRecord) -> Result<()> {
    self.records.insert(key.to_owned(), record.clone());
    Ok(())
  }

  fn destroy(&mut self, key: &str) -> Result<()> {
    self.records.remove(key);
    Ok(())
  }

  fn expire(&mut self, cutoff: f64) -> Result<usize> {
    let before = self.records.len();
    self.records.retain(|_, record| record.timestamp >= cutoff);
    Ok(before - self.records.len())
  }
}
