//! [`SqliteBackend`]: the SQLite implementation of [`Backend`].

use std::{collections::BTreeMap, collections::BTreeSet, path::PathBuf, time::Duration};

use hyperdb_core::{
  Backend, ItemId, PropertyType, TrackerConfig,
  codec::{self, Stored, StoredRecord},
  filter::Predicate,
  indexer::{Indexer, Tokeniser},
  journal::StoredEntry,
  schema::{ClassChange, ClassDescriptor, SchemaDescriptor},
  sessions::SessionStore,
};
use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter, types::Value as SqlValue};
use tracing::{debug, info};

use crate::{
  Error, Result,
  conn::Shared,
  encode::{
    RawJournal, column, from_sql, id_from_sql, id_to_sql, journal_table, multilink_props, multilink_table,
    placeholders, scalar_props, table, to_sql,
  },
  indexer::SqliteIndexer,
  schema::{self, Migration},
  sessions::SqliteSessions,
};

const IMPLICIT_COLUMNS: &str = "id, __retired__, _creation, _activity, _creator, _actor";

// ─── Backend ─────────────────────────────────────────────────────────────────

/// A hyperdb backend over a single SQLite file.
pub struct SqliteBackend {
  shared:   Shared,
  tables:   BTreeMap<String, ClassDescriptor>,
  indexer:  SqliteIndexer,
  sessions: SqliteSessions,
  otks:     SqliteSessions,
  files:    Option<PathBuf>,
}

impl std::fmt::Debug for SqliteBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SqliteBackend")
      .field("classes", &self.tables.keys().collect::<Vec<_>>())
      .field("files", &self.files)
      .finish_non_exhaustive()
  }
}

impl SqliteBackend {
  /// Open (or create) the database named by `config` and bring its format
  /// up to date.
  pub fn open(config: &TrackerConfig) -> Result<Self> {
    let path = config.sqlite_file();
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir)?;
    }
    let mut conn = Connection::open(&path)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let migration = schema::migrate(&mut conn)?;
    let retries = config.sqlite_busy_retries;
    let sessions = SqliteSessions::new(Connection::open(&path)?, "sessions", retries)?;
    let otks = SqliteSessions::new(Connection::open(&path)?, "otks", retries)?;
    info!(path = %path.display(), format = schema::FORMAT_VERSION, "opened sqlite database");
    Ok(Self::assemble(conn, migration, config.tokeniser()?, sessions, otks, Some(config.files_dir())))
  }

  /// A private in-memory database; blobs are kept in memory too.
  pub fn open_in_memory(config: &TrackerConfig) -> Result<Self> {
    let mut conn = Connection::open_in_memory()?;
    let migration = schema::migrate(&mut conn)?;
    let retries = config.sqlite_busy_retries;
    let sessions = SqliteSessions::in_memory("sessions", retries)?;
    let otks = SqliteSessions::in_memory("otks", retries)?;
    Ok(Self::assemble(conn, migration, config.tokeniser()?, sessions, otks, None))
  }

  fn assemble(
    conn: Connection,
    migration: Migration,
    tokeniser: Tokeniser,
    sessions: SqliteSessions,
    otks: SqliteSessions,
    files: Option<PathBuf>,
  ) -> Self {
    let shared = Shared::new(conn);
    SqliteBackend {
      indexer: SqliteIndexer::new(shared.clone(), tokeniser, migration.reindex),
      shared,
      tables: BTreeMap::new(),
      sessions,
      otks,
      files,
    }
  }

  fn bound(&self, class: &str) -> Result<&ClassDescriptor> {
    self.tables.get(class).ok_or_else(|| Error::Unbound(class.to_owned()))
  }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────

fn retired_marker(id: ItemId, retired: bool) -> i64 { if retired { id_to_sql(id) } else { 0 } }

fn implicit_params(id: ItemId, record: &StoredRecord) -> Vec<SqlValue> {
  vec![
    SqlValue::Integer(id_to_sql(id)),
    SqlValue::Integer(retired_marker(id, record.retired)),
    SqlValue::Text(record.creation.clone()),
    SqlValue::Text(record.activity.clone()),
    record.creator.map_or(SqlValue::Null, |a| SqlValue::Integer(a as i64)),
    record.actor.map_or(SqlValue::Null, |a| SqlValue::Integer(a as i64)),
  ]
}

fn write_multilinks(conn: &Connection, class: &str, desc: &ClassDescriptor, id: ItemId, record: &StoredRecord) -> Result<()> {
  for prop in multilink_props(desc) {
    let join = multilink_table(class, &prop);
    conn.execute(&format!("DELETE FROM {join} WHERE nodeid = ?1"), [id_to_sql(id)])?;
    if let Some(Stored::Ids(ids)) = record.values.get(&prop) {
      let mut stmt = conn.prepare_cached(&format!("INSERT INTO {join} (linkid, nodeid) VALUES (?1, ?2)"))?;
      for link in ids {
        stmt.execute(params![*link as i64, id_to_sql(id)])?;
      }
    }
  }
  Ok(())
}

fn read_multilink(conn: &Connection, class: &str, prop: &str, id: i64) -> Result<Vec<u64>> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT linkid FROM {} WHERE nodeid = ?1 ORDER BY linkid",
    multilink_table(class, prop)
  ))?;
  let ids = stmt
    .query_map([id], |row| row.get::<_, i64>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(ids.into_iter().map(id_from_sql).collect())
}

/// Every stored value of one property, keyed by item id.
fn read_prop(conn: &Connection, class: &str, prop: &str, multilink: bool) -> Result<BTreeMap<i64, Stored>> {
  let mut values = BTreeMap::new();
  if multilink {
    let mut stmt = conn.prepare(&format!(
      "SELECT nodeid, linkid FROM {} ORDER BY nodeid, linkid",
      multilink_table(class, prop)
    ))?;
    let rows = stmt
      .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    for (node, link) in rows {
      if let Stored::Ids(ids) = values.entry(node).or_insert_with(|| Stored::Ids(Vec::new())) {
        ids.push(id_from_sql(link));
      }
    }
  } else {
    let mut stmt = conn.prepare(&format!(
      "SELECT id, {} FROM {} WHERE {0} IS NOT NULL",
      column(prop),
      table(class)
    ))?;
    let rows = stmt
      .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, SqlValue>(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    for (id, value) in rows {
      if let Some(stored) = from_sql(value) {
        values.insert(id, stored);
      }
    }
  }
  Ok(values)
}

fn write_prop(conn: &Connection, class: &str, prop: &str, id: i64, value: &Stored) -> Result<()> {
  match value {
    Stored::Ids(ids) => {
      let join = multilink_table(class, prop);
      for link in ids {
        conn.execute(
          &format!("INSERT INTO {join} (linkid, nodeid) VALUES (?1, ?2)"),
          params![*link as i64, id],
        )?;
      }
    }
    scalar => {
      conn.execute(
        &format!("UPDATE {} SET {} = ?1 WHERE id = ?2", table(class), column(prop)),
        params![to_sql(Some(scalar)), id],
      )?;
    }
  }
  Ok(())
}

fn update_class(conn: &Connection, change: &ClassChange) -> Result<()> {
  let class = change.name.as_str();
  schema::drop_key_index(conn, class)?;
  for prop in &change.removed {
    if let Some(ty) = change.old.prop_type(prop) {
      schema::drop_prop(conn, class, prop, &ty)?;
    }
  }
  for prop in &change.retyped {
    let (Some(old), Some(new)) = (change.old.prop_type(prop), change.new.prop_type(prop)) else {
      continue;
    };
    let values = read_prop(conn, class, prop, old.is_multilink())?;
    schema::drop_prop(conn, class, prop, &old)?;
    schema::add_prop(conn, class, prop, &new)?;
    for (id, value) in values {
      if let Some(converted) = codec::convert(&old, &new, &value) {
        write_prop(conn, class, prop, id, &converted)?;
      }
    }
  }
  for prop in &change.added {
    if let Some(ty) = change.new.prop_type(prop) {
      schema::add_prop(conn, class, prop, &ty)?;
    }
  }
  if let Some(key) = &change.new.key {
    schema::create_key_index(conn, class, key)?;
  }
  Ok(())
}

/// Ids satisfying one predicate, or `None` when it cannot be answered in SQL.
fn pushdown(conn: &Connection, class: &str, desc: &ClassDescriptor, predicate: &Predicate) -> Result<Option<BTreeSet<u64>>> {
  let ids_sql = |ids: &BTreeSet<ItemId>| ids.iter().map(|id| id_to_sql(*id).to_string()).collect::<Vec<_>>().join(", ");
  let multilink = |prop: &str| desc.prop_type(prop).is_some_and(|ty| ty.is_multilink());
  let declared = |prop: &str| desc.prop_type(prop).is_some();
  let (sql, param): (String, Option<SqlValue>) = match predicate {
    Predicate::Id(ids) => (
      format!("SELECT id FROM {} WHERE id IN ({})", table(class), ids_sql(ids)),
      None,
    ),
    Predicate::Exact { prop, value } if matches!(desc.prop_type(prop), Some(PropertyType::String { .. })) => (
      format!("SELECT id FROM {} WHERE {} = ?1", table(class), column(prop)),
      Some(SqlValue::Text(value.clone())),
    ),
    Predicate::Link { prop, ids, unset } if declared(prop) && !multilink(prop) => {
      let mut clauses = vec![format!("{} IN ({})", column(prop), ids_sql(ids))];
      if *unset {
        clauses.push(format!("{} IS NULL", column(prop)));
      }
      (
        format!("SELECT id FROM {} WHERE {}", table(class), clauses.join(" OR ")),
        None,
      )
    }
    Predicate::LinksAny { prop, ids } if declared(prop) => {
      if multilink(prop) {
        (
          format!(
            "SELECT DISTINCT nodeid FROM {} WHERE linkid IN ({})",
            multilink_table(class, prop),
            ids_sql(ids)
          ),
          None,
        )
      } else {
        (
          format!("SELECT id FROM {} WHERE {} IN ({})", table(class), column(prop), ids_sql(ids)),
          None,
        )
      }
    }
    _ => return Ok(None),
  };
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map(params_from_iter(param), |row| row.get::<_, i64>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(Some(rows.into_iter().map(id_from_sql).collect()))
}

// ─── Backend impl ────────────────────────────────────────────────────────────

impl Backend for SqliteBackend {
  fn name(&self) -> &'static str { "sqlite" }

  // ── Schema ──

  fn load_schema(&mut self) -> hyperdb_core::Result<Option<SchemaDescriptor>> {
    Ok(self.shared.call(|conn| schema::load_descriptor(conn))?)
  }

  fn save_schema(&mut self, descriptor: &SchemaDescriptor) -> hyperdb_core::Result<()> {
    Ok(self.shared.call(|conn| schema::save_descriptor(conn, descriptor))?)
  }

  fn bind_schema(&mut self, descriptor: &SchemaDescriptor) -> hyperdb_core::Result<()> {
    self.tables = descriptor.tables.clone();
    Ok(())
  }

  fn create_class(&mut self, name: &str, class: &ClassDescriptor) -> hyperdb_core::Result<()> {
    self.shared.call(|conn| schema::create_class(conn, name, class))?;
    self.tables.insert(name.to_owned(), class.clone());
    Ok(())
  }

  fn drop_class(&mut self, name: &str) -> hyperdb_core::Result<()> {
    let class = self.tables.remove(name).unwrap_or_default();
    self.shared.call(|conn| schema::drop_class(conn, name, &class))?;
    Ok(())
  }

  fn update_class(&mut self, change: &ClassChange) -> hyperdb_core::Result<()> {
    self.shared.call(|conn| update_class(conn, change))?;
    self.tables.insert(change.name.clone(), change.new.clone());
    Ok(())
  }

  // ── Items ──

  fn new_id(&mut self, class: &str) -> hyperdb_core::Result<ItemId> {
    let next: i64 = self.shared.call(|conn| {
      conn.execute(
        "INSERT INTO ids (name, num) VALUES (?1, 1)
         ON CONFLICT(name) DO UPDATE SET num = num + 1",
        [class],
      )?;
      Ok(conn.query_row("SELECT num FROM ids WHERE name = ?1", [class], |row| row.get(0))?)
    })?;
    Ok(ItemId::new(id_from_sql(next)))
  }

  fn max_id(&mut self, class: &str) -> hyperdb_core::Result<u64> {
    let num: Option<i64> = self.shared.call(|conn| {
      Ok(
        conn
          .query_row("SELECT num FROM ids WHERE name = ?1", [class], |row| row.get(0))
          .optional()?,
      )
    })?;
    Ok(num.map_or(0, id_from_sql))
  }

  fn set_max_id(&mut self, class: &str, id: u64) -> hyperdb_core::Result<()> {
    self.shared.call(|conn| {
      conn.execute(
        "INSERT INTO ids (name, num) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET num = max(num, excluded.num)",
        params![class, id as i64],
      )?;
      Ok(())
    })?;
    Ok(())
  }

  fn add_node(&mut self, class: &str, id: ItemId, record: &StoredRecord) -> hyperdb_core::Result<()> {
    let desc = self.bound(class)?;
    let props = scalar_props(desc);
    let mut columns = vec![IMPLICIT_COLUMNS.to_owned()];
    columns.extend(props.iter().map(|p| column(p)));
    let mut values = implicit_params(id, record);
    values.extend(props.iter().map(|p| to_sql(record.values.get(p))));
    let sql = format!(
      "INSERT INTO {} ({}) VALUES ({})",
      table(class),
      columns.join(", "),
      placeholders(values.len())
    );
    self.shared.call(|conn| {
      conn.execute(&sql, params_from_iter(values))?;
      write_multilinks(conn, class, desc, id, record)
    })?;
    debug!(class, id = %id, "inserted row");
    Ok(())
  }

  fn set_node(&mut self, class: &str, id: ItemId, record: &StoredRecord) -> hyperdb_core::Result<()> {
    let desc = self.bound(class)?;
    let props = scalar_props(desc);
    let mut assignments = vec![
      "__retired__ = ?1".to_owned(),
      "_creation = ?2".to_owned(),
      "_activity = ?3".to_owned(),
      "_creator = ?4".to_owned(),
      "_actor = ?5".to_owned(),
    ];
    let mut values = implicit_params(id, record).split_off(1);
    for prop in &props {
      values.push(to_sql(record.values.get(prop)));
      assignments.push(format!("{} = ?{}", column(prop), values.len()));
    }
    values.push(SqlValue::Integer(id_to_sql(id)));
    let sql = format!(
      "UPDATE {} SET {} WHERE id = ?{}",
      table(class),
      assignments.join(", "),
      values.len()
    );
    let changed = self.shared.call(|conn| {
      let changed = conn.execute(&sql, params_from_iter(values))?;
      write_multilinks(conn, class, desc, id, record)?;
      Ok(changed)
    })?;
    if changed == 0 {
      return Err(hyperdb_core::Error::NoSuchItem {
        class: class.to_owned(),
        id,
      });
    }
    Ok(())
  }

  fn get_node(&mut self, class: &str, id: ItemId) -> hyperdb_core::Result<Option<StoredRecord>> {
    let desc = self.bound(class)?;
    let props = scalar_props(desc);
    let multilinks = multilink_props(desc);
    let mut columns = vec![IMPLICIT_COLUMNS.to_owned()];
    columns.extend(props.iter().map(|p| column(p)));
    let sql = format!("SELECT {} FROM {} WHERE id = ?1", columns.join(", "), table(class));
    let record = self.shared.call(|conn| {
      let row = conn
        .query_row(&sql, [id_to_sql(id)], |row| {
          let mut values = BTreeMap::new();
          for (i, prop) in props.iter().enumerate() {
            if let Some(stored) = from_sql(row.get::<_, SqlValue>(6 + i)?) {
              values.insert(prop.clone(), stored);
            }
          }
          Ok(StoredRecord {
            values,
            retired: row.get::<_, i64>(1)? != 0,
            creation: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            activity: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            creator: row.get::<_, Option<i64>>(4)?.map(id_from_sql),
            actor: row.get::<_, Option<i64>>(5)?.map(id_from_sql),
          })
        })
        .optional()?;
      let Some(mut record) = row else {
        return Ok(None);
      };
      for prop in &multilinks {
        let ids = read_multilink(conn, class, prop, id_to_sql(id))?;
        if !ids.is_empty() {
          record.values.insert(prop.clone(), Stored::Ids(ids));
        }
      }
      Ok(Some(record))
    })?;
    Ok(record)
  }

  fn destroy_node(&mut self, class: &str, id: ItemId) -> hyperdb_core::Result<()> {
    let desc = self.bound(class)?;
    self.shared.call(|conn| {
      let node = id_to_sql(id);
      for prop in multilink_props(desc) {
        conn.execute(&format!("DELETE FROM {} WHERE nodeid = ?1", multilink_table(class, &prop)), [node])?;
      }
      conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table(class)), [node])?;
      conn.execute(&format!("DELETE FROM {} WHERE nodeid = ?1", journal_table(class)), [node])?;
      Ok(())
    })?;
    Ok(())
  }

  fn node_ids(&mut self, class: &str, include_retired: bool) -> hyperdb_core::Result<Vec<ItemId>> {
    self.bound(class)?;
    let filter = if include_retired { "" } else { " WHERE __retired__ = 0" };
    let sql = format!("SELECT id FROM {}{filter} ORDER BY id", table(class));
    let ids = self.shared.call(|conn| {
      let mut stmt = conn.prepare_cached(&sql)?;
      let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(ids)
    })?;
    Ok(ids.into_iter().map(|n| ItemId::new(id_from_sql(n))).collect())
  }

  fn candidates(&mut self, class: &str, predicates: &[Predicate]) -> hyperdb_core::Result<Option<Vec<ItemId>>> {
    let desc = self.bound(class)?;
    let narrowed = self.shared.call(|conn| {
      let mut narrowed: Option<BTreeSet<u64>> = None;
      for predicate in predicates {
        if let Some(ids) = pushdown(conn, class, desc, predicate)? {
          narrowed = Some(match narrowed {
            Some(earlier) => earlier.intersection(&ids).copied().collect(),
            None => ids,
          });
        }
      }
      Ok(narrowed)
    })?;
    Ok(narrowed.map(|ids| ids.into_iter().map(ItemId::new).collect()))
  }

  // ── Journal ──

  fn add_journal(&mut self, class: &str, entry: &StoredEntry) -> hyperdb_core::Result<()> {
    self.bound(class)?;
    let params_text = serde_json::to_string(&entry.params).map_err(Error::from)?;
    let sql = format!(
      "INSERT INTO {} (nodeid, date, tag, action, params) VALUES (?1, ?2, ?3, ?4, ?5)",
      journal_table(class)
    );
    self.shared.call(|conn| {
      conn.execute(
        &sql,
        params![
          entry.id as i64,
          entry.timestamp,
          entry.actor.map(|a| a as i64),
          entry.action.as_str(),
          params_text,
        ],
      )?;
      Ok(())
    })?;
    Ok(())
  }

  fn get_journal(&mut self, class: &str, id: ItemId) -> hyperdb_core::Result<Vec<StoredEntry>> {
    self.bound(class)?;
    let sql = format!(
      "SELECT nodeid, date, tag, action, params FROM {} WHERE nodeid = ?1 ORDER BY rowid",
      journal_table(class)
    );
    let raws = self.shared.call(|conn| {
      let mut stmt = conn.prepare_cached(&sql)?;
      let raws = stmt
        .query_map([id_to_sql(id)], |row| {
          Ok(RawJournal {
            nodeid: row.get(0)?,
            date:   row.get(1)?,
            tag:    row.get(2)?,
            action: row.get(3)?,
            params: row.get(4)?,
          })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(raws)
    })?;
    Ok(raws.into_iter().map(|raw| raw.into_entry(class)).collect::<Result<Vec<_>>>()?)
  }

  fn set_journal(&mut self, class: &str, id: ItemId, entries: &[StoredEntry]) -> hyperdb_core::Result<()> {
    self.bound(class)?;
    self.shared.call(|conn| {
      conn.execute(
        &format!("DELETE FROM {} WHERE nodeid = ?1", journal_table(class)),
        [id_to_sql(id)],
      )?;
      Ok(())
    })?;
    for entry in entries {
      self.add_journal(class, entry)?;
    }
    Ok(())
  }

  fn pack(&mut self, class: &str, before: &str) -> hyperdb_core::Result<usize> {
    self.bound(class)?;
    let sql = format!(
      "DELETE FROM {} WHERE date < ?1 AND action <> 'create'",
      journal_table(class)
    );
    Ok(self.shared.call(|conn| Ok(conn.execute(&sql, [before])?))?)
  }

  // ── Secondary stores ──

  fn indexer(&mut self) -> &mut dyn Indexer { &mut self.indexer }

  fn sessions(&mut self) -> &mut dyn SessionStore { &mut self.sessions }

  fn otks(&mut self) -> &mut dyn SessionStore { &mut self.otks }

  fn blob_dir(&self) -> Option<PathBuf> { self.files.clone() }

  // ── Lifecycle ──

  fn commit(&mut self) -> hyperdb_core::Result<()> {
    self.shared.commit()?;
    Ok(())
  }

  fn rollback(&mut self) -> hyperdb_core::Result<()> {
    self.shared.rollback()?;
    Ok(())
  }

  fn close(&mut self) -> hyperdb_core::Result<()> {
    self.shared.rollback()?;
    debug!("closed sqlite database");
    Ok(())
  }
}
