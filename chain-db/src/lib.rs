//! Node database layer
//!
//! This crate provides the key-value storage the node persists local state
//! into, with a RocksDB backend and an in-memory backend sharing one trait.

pub mod column_families;
pub mod error;
pub mod kv;
pub mod traits;

pub use column_families::ColumnFamily;
pub use error::{DbError, DbResult};
pub use kv::{Database, DatabaseConfig, MemoryDatabase};
pub use traits::{KeyValueDB, SharedDatabase};
