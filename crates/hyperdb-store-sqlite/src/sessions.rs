//! Sessions and one-time keys in the `sessions` and `otks` tables.
//!
//! Each store owns its own connection and writes in autocommit mode, so
//! session traffic never waits on an open item transaction.

use std::{thread, time::Duration};

use hyperdb_core::sessions::{SessionRecord, SessionStore};
use rusqlite::{Connection, ErrorCode, OptionalExtension as _, params};
use tracing::warn;

use crate::Result;

const BACKOFF: Duration = Duration::from_millis(50);

pub struct SqliteSessions {
  conn:    Connection,
  table:   &'static str,
  retries: u32,
}

fn is_busy(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(failure, _)
      if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
  )
}

impl SqliteSessions {
  /// Wrap a connection to a database that already carries `table`.
  pub(crate) fn new(conn: Connection, table: &'static str, retries: u32) -> Result<Self> {
    conn.busy_timeout(Duration::from_secs(1))?;
    Ok(SqliteSessions { conn, table, retries })
  }

  /// A store on its own in-memory database.
  pub(crate) fn in_memory(table: &'static str, retries: u32) -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(&format!(
      "CREATE TABLE {table} (
         key   TEXT PRIMARY KEY,
         value TEXT NOT NULL,
         time  REAL NOT NULL
       );"
    ))?;
    Ok(SqliteSessions { conn, table, retries })
  }

  /// Run `f`, retrying while another writer holds the database.
  fn with_retry<T>(&self, mut f: impl FnMut(&Connection) -> rusqlite::Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
      match f(&self.conn) {
        Err(err) if is_busy(&err) && attempt < self.retries => {
          attempt += 1;
          warn!(table = self.table, attempt, "database busy, retrying");
          thread::sleep(BACKOFF * attempt);
        }
        result => return Ok(result?),
      }
    }
  }
}

impl SessionStore for SqliteSessions {
  fn name(&self) -> &str { self.table }

  fn load(&mut self, key: &str) -> hyperdb_core::Result<Option<SessionRecord>> {
    let sql = format!("SELECT value, time FROM {} WHERE key = ?1", self.table);
    let row: Option<(String, f64)> = self.with_retry(|conn| {
      conn
        .query_row(&sql, [key], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
    })?;
    let Some((value, timestamp)) = row else {
      return Ok(None);
    };
    let fields = serde_json::from_str(&value).map_err(crate::Error::from)?;
    Ok(Some(SessionRecord { fields, timestamp }))
  }

  fn store(&mut self, key: &str, record: &SessionRecord) -> hyperdb_core::Result<()> {
    let value = serde_json::to_string(&record.fields).map_err(crate::Error::from)?;
    let sql = format!(
      "INSERT INTO {} (key, value, time) VALUES (?1, ?2, ?3)
       ON CONFLICT(key) DO UPDATE SET value = excluded.value, time = excluded.time",
      self.table
    );
    self.with_retry(|conn| conn.execute(&sql, params![key, value, record.timestamp]))?;
    Ok(())
  }

  fn destroy(&mut self, key: &str) -> hyperdb_core::Result<()> {
    let sql = format!("DELETE FROM {} WHERE key = ?1", self.table);
    self.with_retry(|conn| conn.execute(&sql, [key]))?;
    Ok(())
  }

  fn expire(&mut self, cutoff: f64) -> hyperdb_core::Result<usize> {
    let sql = format!("DELETE FROM {} WHERE time < ?1", self.table);
    Ok(self.with_retry(|conn| conn.execute(&sql, [cutoff]))?)
  }
}
