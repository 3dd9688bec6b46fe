//! # Memory Storage - SQLite
//!
//! libSQL/SQLite storage backend for the persistent knowledge memory engine.
//!
//! Provides schema creation, additive migration, FTS5 integrity repair and
//! the concrete [`memory_core::StorageBackend`] implementation over a local
//! database file.

mod migrate;
mod schema;
mod storage;

pub use storage::SqliteStorage;
