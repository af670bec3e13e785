//! Core of the hyperdb item database: typed classes of items with links,
//! per-item journals, blobs, full-text search and auditor/reactor triggers.
//!
//! Storage is pluggable through [`backend::Backend`]. This crate carries an
//! in-memory backend; the file and SQLite profiles live in their own crates.

pub mod backend;
pub mod blob;
pub mod cache;
pub mod codec;
pub mod config;
pub mod database;
pub mod date;
pub mod error;
pub mod filter;
pub mod indexer;
pub mod item;
pub mod journal;
pub mod memory;
pub mod password;
pub mod schema;
pub mod sessions;
pub mod transfer;
pub mod trigger;
pub mod txn;
pub mod types;
pub mod value;

mod ops;
mod query;

pub use backend::Backend;
pub use config::{BackendKind, TrackerConfig};
pub use database::Database;
pub use date::{Date, Interval, Range};
pub use error::{Error, ErrorKind, Result};
pub use filter::{Direction, Filter, LinkExpr, LinkOp, Retired, SortKey};
pub use item::Item;
pub use journal::{Action, JournalEntry, Params};
pub use memory::MemoryBackend;
pub use password::{Password, Scheme};
pub use query::SearchHits;
pub use schema::{ClassDef, Schema};
pub use trigger::{Audit, Event, Reaction};
pub use types::{ItemId, NumberKind, PropertyType};
pub use value::{Changes, Input, Number, PropValues, Value};

#[cfg(test)]
mod tests;
