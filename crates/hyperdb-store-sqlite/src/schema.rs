//! SQL layout and the format migration chain.
//!
//! The format version lives in `PRAGMA user_version`:
//!
//! 1. `schema` and `ids` tables, class tables without `_actor`
//! 2. `_actor` column on every class table
//! 3. `sessions` and `otks`
//! 4. `__textids` and `__words`; existing trackers need a reindex
//! 5. unique `(key, __retired__)` index per keyed class, retired rows
//!    marked with their own id
//! 6. `__retired__` index per class
//!
//! A fresh database runs the whole chain.

use hyperdb_core::{PropertyType, schema::{ClassDescriptor, SchemaDescriptor}};
use rusqlite::{Connection, OptionalExtension as _};
use tracing::info;

use crate::{
  Error, Result,
  encode::{
    column, journal_table, key_index, multilink_props, multilink_table, retired_index, sql_type, table,
  },
};

pub const FORMAT_VERSION: i64 = 6;

const BASE: &str = "
CREATE TABLE IF NOT EXISTS schema (
    schema TEXT NOT NULL    -- JSON {version, tables}
);

CREATE TABLE IF NOT EXISTS ids (
    name TEXT PRIMARY KEY,
    num  INTEGER NOT NULL
);
";

const SESSIONS: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL,    -- JSON object
    time  REAL NOT NULL     -- seconds since the epoch
);
CREATE INDEX IF NOT EXISTS sessions_time_idx ON sessions(time);

CREATE TABLE IF NOT EXISTS otks (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    time  REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS otks_time_idx ON otks(time);
";

const WORDS: &str = "
CREATE TABLE IF NOT EXISTS __textids (
    _textid INTEGER PRIMARY KEY,
    _class  TEXT NOT NULL,
    _itemid INTEGER NOT NULL,
    _prop   TEXT NOT NULL,
    UNIQUE (_class, _itemid, _prop)
);

CREATE TABLE IF NOT EXISTS __words (
    _word   TEXT NOT NULL,
    _textid INTEGER NOT NULL REFERENCES __textids(_textid)
);
CREATE INDEX IF NOT EXISTS words_word_idx   ON __words(_word);
CREATE INDEX IF NOT EXISTS words_textid_idx ON __words(_textid);
";

/// Outcome of [`migrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
  pub from:    i64,
  /// The word index was created under existing data.
  pub reindex: bool,
}

/// Bring the file up to [`FORMAT_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<Migration> {
  let found: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
  if found > FORMAT_VERSION {
    return Err(Error::TooNew {
      found,
      supported: FORMAT_VERSION,
    });
  }
  let mut migration = Migration {
    from:    found,
    reindex: false,
  };
  if found == FORMAT_VERSION {
    return Ok(migration);
  }

  let tx = conn.transaction()?;
  for version in found + 1..=FORMAT_VERSION {
    match version {
      1 => tx.execute_batch(BASE)?,
      2 => add_actor_columns(&tx)?,
      3 => tx.execute_batch(SESSIONS)?,
      4 => {
        tx.execute_batch(WORDS)?;
        migration.reindex = found > 0;
      }
      5 => add_key_indexes(&tx)?,
      _ => add_retired_indexes(&tx)?,
    }
    if found > 0 {
      info!(version, "upgraded database format");
    }
  }
  if let Some(descriptor) = load_descriptor(&tx)? {
    save_descriptor(&tx, &descriptor)?;
  }
  tx.pragma_update(None, "user_version", FORMAT_VERSION)?;
  tx.commit()?;
  Ok(migration)
}

fn add_actor_columns(conn: &Connection) -> Result<()> {
  let Some(descriptor) = load_descriptor(conn)? else {
    return Ok(());
  };
  for name in descriptor.tables.keys() {
    let table = table(name);
    conn.execute_batch(&format!(
      "ALTER TABLE {table} ADD COLUMN _actor INTEGER;
       UPDATE {table} SET _actor = _creator;"
    ))?;
  }
  Ok(())
}

fn add_key_indexes(conn: &Connection) -> Result<()> {
  let Some(descriptor) = load_descriptor(conn)? else {
    return Ok(());
  };
  for (name, class) in &descriptor.tables {
    conn.execute(
      &format!("UPDATE {} SET __retired__ = id WHERE __retired__ <> 0", table(name)),
      [],
    )?;
    if let Some(key) = &class.key {
      create_key_index(conn, name, key)?;
    }
  }
  Ok(())
}

fn add_retired_indexes(conn: &Connection) -> Result<()> {
  let Some(descriptor) = load_descriptor(conn)? else {
    return Ok(());
  };
  for name in descriptor.tables.keys() {
    create_retired_index(conn, name)?;
  }
  Ok(())
}

// ─── Descriptor ──────────────────────────────────────────────────────────────

pub fn load_descriptor(conn: &Connection) -> Result<Option<SchemaDescriptor>> {
  let text: Option<String> = conn
    .query_row("SELECT schema FROM schema LIMIT 1", [], |row| row.get(0))
    .optional()?;
  Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
}

pub fn save_descriptor(conn: &Connection, descriptor: &SchemaDescriptor) -> Result<()> {
  let text = serde_json::to_string(descriptor)?;
  conn.execute("DELETE FROM schema", [])?;
  conn.execute("INSERT INTO schema (schema) VALUES (?1)", [text])?;
  Ok(())
}

// ─── Class DDL ───────────────────────────────────────────────────────────────

pub fn create_class(conn: &Connection, name: &str, class: &ClassDescriptor) -> Result<()> {
  let mut columns = vec![
    "id          INTEGER PRIMARY KEY".to_owned(),
    "__retired__ INTEGER NOT NULL DEFAULT 0".to_owned(),
    "_creation   TEXT".to_owned(),
    "_activity   TEXT".to_owned(),
    "_creator    INTEGER".to_owned(),
    "_actor      INTEGER".to_owned(),
  ];
  for (prop, ty) in class.typed_props().filter(|(_, ty)| !ty.is_multilink()) {
    columns.push(format!("{} {}", column(prop), sql_type(&ty)));
  }
  let journal = journal_table(name);
  conn.execute_batch(&format!(
    "CREATE TABLE {} (
       {}
     );
     CREATE TABLE {journal} (
       nodeid INTEGER NOT NULL,
       date   TEXT NOT NULL,
       tag    INTEGER,
       action TEXT NOT NULL,
       params TEXT NOT NULL
     );
     CREATE INDEX \"{name}_journ_idx\" ON {journal}(nodeid);",
    table(name),
    columns.join(",\n       "),
  ))?;
  for prop in multilink_props(class) {
    create_multilink(conn, name, &prop)?;
  }
  create_retired_index(conn, name)?;
  if let Some(key) = &class.key {
    create_key_index(conn, name, key)?;
  }
  conn.execute("INSERT OR IGNORE INTO ids (name, num) VALUES (?1, 0)", [name])?;
  Ok(())
}

pub fn drop_class(conn: &Connection, name: &str, class: &ClassDescriptor) -> Result<()> {
  for prop in multilink_props(class) {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", multilink_table(name, &prop)))?;
  }
  conn.execute_batch(&format!(
    "DROP TABLE IF EXISTS {};
     DROP TABLE IF EXISTS {};",
    table(name),
    journal_table(name)
  ))?;
  conn.execute("DELETE FROM ids WHERE name = ?1", [name])?;
  conn.execute(
    "DELETE FROM __words WHERE _textid IN (SELECT _textid FROM __textids WHERE _class = ?1)",
    [name],
  )?;
  conn.execute("DELETE FROM __textids WHERE _class = ?1", [name])?;
  Ok(())
}

fn create_multilink(conn: &Connection, class: &str, prop: &str) -> Result<()> {
  let join = multilink_table(class, prop);
  conn.execute_batch(&format!(
    "CREATE TABLE {join} (
       linkid INTEGER NOT NULL,
       nodeid INTEGER NOT NULL
     );
     CREATE INDEX \"{class}_{prop}_l_idx\" ON {join}(linkid);
     CREATE INDEX \"{class}_{prop}_n_idx\" ON {join}(nodeid);"
  ))?;
  Ok(())
}

pub fn add_prop(conn: &Connection, class: &str, prop: &str, ty: &PropertyType) -> Result<()> {
  if ty.is_multilink() {
    return create_multilink(conn, class, prop);
  }
  conn.execute_batch(&format!(
    "ALTER TABLE {} ADD COLUMN {} {}",
    table(class),
    column(prop),
    sql_type(ty)
  ))?;
  Ok(())
}

pub fn drop_prop(conn: &Connection, class: &str, prop: &str, ty: &PropertyType) -> Result<()> {
  let sql = if ty.is_multilink() {
    format!("DROP TABLE IF EXISTS {}", multilink_table(class, prop))
  } else {
    format!("ALTER TABLE {} DROP COLUMN {}", table(class), column(prop))
  };
  conn.execute_batch(&sql)?;
  Ok(())
}

pub fn create_key_index(conn: &Connection, class: &str, key: &str) -> Result<()> {
  conn.execute_batch(&format!(
    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}({}, __retired__)",
    key_index(class),
    table(class),
    column(key)
  ))?;
  Ok(())
}

fn create_retired_index(conn: &Connection, class: &str) -> Result<()> {
  conn.execute_batch(&format!(
    "CREATE INDEX IF NOT EXISTS {} ON {}(__retired__)",
    retired_index(class),
    table(class)
  ))?;
  Ok(())
}

pub fn drop_key_index(conn: &Connection, class: &str) -> Result<()> {
  conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", key_index(class)))?;
  Ok(())
}
