//! Full-text index kept in the `__textids` and `__words` tables.
//!
//! Writes go through the backend's [`Shared`] connection, so they commit and
//! roll back with the items they index.

use std::collections::{BTreeMap, BTreeSet};

use hyperdb_core::{
  ItemId,
  indexer::{Indexer, TextId, Tokeniser},
};
use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter};

use crate::{Result, conn::Shared, encode::{id_from_sql, id_to_sql}};

pub struct SqliteIndexer {
  shared:    Shared,
  tokeniser: Tokeniser,
  /// Set when the tables were created under existing data.
  stale:     bool,
}

impl SqliteIndexer {
  pub(crate) fn new(shared: Shared, tokeniser: Tokeniser, stale: bool) -> Self {
    SqliteIndexer {
      shared,
      tokeniser,
      stale,
    }
  }
}

fn textid(conn: &Connection, id: &TextId) -> Result<Option<i64>> {
  Ok(
    conn
      .query_row(
        "SELECT _textid FROM __textids WHERE _class = ?1 AND _itemid = ?2 AND _prop = ?3",
        params![id.class, id_to_sql(id.id), id.prop],
        |row| row.get(0),
      )
      .optional()?,
  )
}

fn purge(conn: &Connection, id: &TextId) -> Result<()> {
  if let Some(textid) = textid(conn, id)? {
    conn.execute("DELETE FROM __words WHERE _textid = ?1", [textid])?;
    conn.execute("DELETE FROM __textids WHERE _textid = ?1", [textid])?;
  }
  Ok(())
}

impl Indexer for SqliteIndexer {
  fn tokeniser(&self) -> &Tokeniser { &self.tokeniser }

  fn set_words(&mut self, id: &TextId, words: BTreeSet<String>) -> hyperdb_core::Result<()> {
    self.shared.call(|conn| {
      purge(conn, id)?;
      if words.is_empty() {
        return Ok(());
      }
      conn.execute(
        "INSERT INTO __textids (_class, _itemid, _prop) VALUES (?1, ?2, ?3)",
        params![id.class, id_to_sql(id.id), id.prop],
      )?;
      let textid = conn.last_insert_rowid();
      let mut stmt = conn.prepare_cached("INSERT INTO __words (_word, _textid) VALUES (?1, ?2)")?;
      for word in &words {
        stmt.execute(params![word, textid])?;
      }
      Ok(())
    })?;
    Ok(())
  }

  fn lookup(&mut self, words: &[String]) -> hyperdb_core::Result<BTreeMap<u64, TextId>> {
    if words.is_empty() {
      return Ok(BTreeMap::new());
    }
    let clauses = (1..=words.len())
      .map(|i| format!("_textid IN (SELECT _textid FROM __words WHERE _word = ?{i})"))
      .collect::<Vec<_>>()
      .join(" AND ");
    let sql = format!("SELECT _textid, _class, _itemid, _prop FROM __textids WHERE {clauses}");
    let hits = self.shared.call(|conn| {
      let mut stmt = conn.prepare(&sql)?;
      let rows = stmt
        .query_map(params_from_iter(words), |row| {
          Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
          ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(rows)
    })?;
    Ok(
      hits
        .into_iter()
        .map(|(textid, class, item, prop)| {
          (id_from_sql(textid), TextId::new(class, ItemId::new(id_from_sql(item)), prop))
        })
        .collect(),
    )
  }

  fn purge(&mut self, id: &TextId) -> hyperdb_core::Result<()> {
    self.shared.call(|conn| purge(conn, id))?;
    Ok(())
  }

  fn save_index(&mut self) -> hyperdb_core::Result<()> { Ok(()) }

  fn rollback(&mut self) -> hyperdb_core::Result<()> { Ok(()) }

  fn force_reindex(&mut self) -> hyperdb_core::Result<()> {
    self.shared.call(|conn| {
      conn.execute_batch("DELETE FROM __words; DELETE FROM __textids;")?;
      Ok(())
    })?;
    self.stale = false;
    Ok(())
  }

  fn should_reindex(&self) -> bool { self.stale }
}
