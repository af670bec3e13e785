//! The connection shared by the backend and its indexer.
//!
//! A transaction is opened lazily by the first call after a commit or
//! rollback, so index writes land in the same transaction as the items they
//! describe.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::{Error, Result};

struct Handle {
  conn:   Connection,
  in_txn: bool,
}

/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub(crate) struct Shared(Arc<Mutex<Handle>>);

impl Shared {
  pub fn new(conn: Connection) -> Self { Shared(Arc::new(Mutex::new(Handle { conn, in_txn: false }))) }

  fn lock(&self) -> Result<MutexGuard<'_, Handle>> { self.0.lock().map_err(|_| Error::Poisoned) }

  /// Run `f` inside the open transaction.
  pub fn call<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let mut handle = self.lock()?;
    if !handle.in_txn {
      handle.conn.execute_batch("BEGIN")?;
      handle.in_txn = true;
    }
    f(&handle.conn)
  }

  pub fn commit(&self) -> Result<()> { self.finish("COMMIT") }

  pub fn rollback(&self) -> Result<()> { self.finish("ROLLBACK") }

  /// End the open transaction. A failed `COMMIT` leaves it open, so a
  /// following rollback still reaches SQLite.
  fn finish(&self, statement: &str) -> Result<()> {
    let mut handle = self.lock()?;
    if !handle.in_txn {
      return Ok(());
    }
    // SQLite ends the transaction itself on some errors.
    if !handle.conn.is_autocommit() {
      handle.conn.execute_batch(statement)?;
    }
    handle.in_txn = false;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn shared() -> Shared {
    let conn = Connection::open_in_memory().unwrap();
    conn
      .execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (
           parent INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
         );",
      )
      .unwrap();
    Shared::new(conn)
  }

  fn children(shared: &Shared) -> i64 {
    shared
      .call(|conn| Ok(conn.query_row("SELECT count(*) FROM child", [], |row| row.get(0))?))
      .unwrap()
  }

  #[test]
  fn calls_share_one_transaction_until_commit() {
    let shared = shared();
    shared.call(|conn| Ok(conn.execute("INSERT INTO parent (id) VALUES (1)", [])?)).unwrap();
    shared.call(|conn| Ok(conn.execute("INSERT INTO child (parent) VALUES (1)", [])?)).unwrap();
    shared.rollback().unwrap();
    assert_eq!(children(&shared), 0);
  }

  #[test]
  fn a_refused_commit_can_still_be_rolled_back() {
    let shared = shared();
    shared.call(|conn| Ok(conn.execute("INSERT INTO child (parent) VALUES (7)", [])?)).unwrap();
    assert!(shared.commit().is_err());

    shared.rollback().unwrap();
    assert_eq!(children(&shared), 0);
    shared.call(|conn| Ok(conn.execute("INSERT INTO parent (id) VALUES (7)", [])?)).unwrap();
    shared.call(|conn| Ok(conn.execute("INSERT INTO child (parent) VALUES (7)", [])?)).unwrap();
    shared.commit().unwrap();
    assert_eq!(children(&shared), 1);
  }
}
