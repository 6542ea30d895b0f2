//! Key-value store backends
//!
//! [`Database`] is the durable RocksDB store a node runs on; every column
//! family in [`ColumnFamily::all`] is opened with its tuned options.
//! [`MemoryDatabase`] keeps the same column family layout in memory and
//! backs tests and ephemeral nodes.

use crate::column_families::{
    get_column_family_configs, ColumnFamily, ColumnFamilyConfig, CompressionType,
};
use crate::{DbError, DbResult, KeyValueDB};
use parking_lot::RwLock;
use rocksdb::{BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, Options, WriteOptions, DB};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory holding the RocksDB files
    pub path: PathBuf,
    /// Create the database if it does not exist
    pub create_if_missing: bool,
    /// Per column family tuning
    pub column_families: HashMap<ColumnFamily, ColumnFamilyConfig>,
}

impl DatabaseConfig {
    /// Default configuration rooted at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            create_if_missing: true,
            column_families: get_column_family_configs(),
        }
    }
}

fn compression(kind: CompressionType) -> DBCompressionType {
    match kind {
        CompressionType::None => DBCompressionType::None,
        CompressionType::Lz4 => DBCompressionType::Lz4,
        CompressionType::Zstd => DBCompressionType::Zstd,
    }
}

fn column_family_options(config: &ColumnFamilyConfig) -> Options {
    let mut opts = Options::default();
    let mut table = BlockBasedOptions::default();
    let cache = Cache::new_lru_cache(config.block_cache_size);
    table.set_block_cache(&cache);
    opts.set_block_based_table_factory(&table);
    opts.set_write_buffer_size(config.write_buffer_size);
    opts.set_max_write_buffer_number(config.max_write_buffer_number);
    opts.set_compression_type(compression(config.compression_type));
    opts
}

/// RocksDB-backed database
pub struct Database {
    db: DB,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database described by `config`
    pub fn open(config: &DatabaseConfig) -> DbResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.create_missing_column_families(true);

        let descriptors = ColumnFamily::all()
            .iter()
            .map(|cf| {
                let cf_config = config.column_families.get(cf).cloned().unwrap_or_default();
                ColumnFamilyDescriptor::new(cf.name(), column_family_options(&cf_config))
            })
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, &config.path, descriptors)?;
        info!("Opened database at {}", config.path.display());
        Ok(Self {
            db,
            path: config.path.clone(),
        })
    }

    /// Open with default tuning at `path`
    pub fn open_default(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::open(&DatabaseConfig::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self, cf: &str) -> DbResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf)
            .ok_or_else(|| DbError::ColumnFamilyNotFound(cf.to_string()))
    }
}

impl KeyValueDB for Database {
    fn get(&self, cf: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.handle(cf)?, key)?)
    }

    fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        Ok(self.db.put_cf(self.handle(cf)?, key, value)?)
    }

    fn put_sync(&self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db.put_cf_opt(self.handle(cf)?, key, value, &write_opts)?;
        debug!("Synced {} bytes into {}", value.len(), cf);
        Ok(())
    }

    fn delete(&self, cf: &str, key: &[u8]) -> DbResult<()> {
        Ok(self.db.delete_cf(self.handle(cf)?, key)?)
    }

    fn flush(&self) -> DbResult<()> {
        for cf in ColumnFamily::all() {
            self.db.flush_cf(self.handle(cf.name())?)?;
        }
        Ok(())
    }
}

/// In-memory database with the same column family layout
#[derive(Debug)]
pub struct MemoryDatabase {
    families: RwLock<HashMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        let families = ColumnFamily::all()
            .iter()
            .map(|cf| (cf.name(), BTreeMap::new()))
            .collect();
        Self {
            families: RwLock::new(families),
        }
    }

    /// Number of keys stored in a column family
    pub fn len(&self, cf: &str) -> usize {
        self.families.read().get(cf).map_or(0, BTreeMap::len)
    }

    fn with_family<T>(
        &self,
        cf: &str,
        f: impl FnOnce(&mut BTreeMap<Vec<u8>, Vec<u8>>) -> T,
    ) -> DbResult<T> {
        let mut families = self.families.write();
        let family = families
            .get_mut(cf)
            .ok_or_else(|| DbError::ColumnFamilyNotFound(cf.to_string()))?;
        Ok(f(family))
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueDB for MemoryDatabase {
    fn get(&self, cf: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let families = self.families.read();
        let family = families
            .get(cf)
            .ok_or_else(|| DbError::ColumnFamilyNotFound(cf.to_string()))?;
        Ok(family.get(key).cloned())
    }

    fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.with_family(cf, |family| {
            family.insert(key.to_vec(), value.to_vec());
        })
    }

    fn put_sync(&self, cf: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.put(cf, key, value)
    }

    fn delete(&self, cf: &str, key: &[u8]) -> DbResult<()> {
        self.with_family(cf, |family| {
            family.remove(key);
        })
    }

    fn flush(&self) -> DbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(db: &dyn KeyValueDB) {
        let cf = ColumnFamily::Consensus.name();
        assert_eq!(db.get(cf, b"k").unwrap(), None);
        assert!(!db.exists(cf, b"k").unwrap());

        db.put(cf, b"k", b"v1").unwrap();
        assert_eq!(db.get(cf, b"k").unwrap(), Some(b"v1".to_vec()));

        db.put_sync(cf, b"k", b"v2").unwrap();
        assert_eq!(db.get(cf, b"k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(db.get(ColumnFamily::Default.name(), b"k").unwrap(), None);

        db.delete(cf, b"k").unwrap();
        assert!(!db.exists(cf, b"k").unwrap());
        db.flush().unwrap();

        assert!(matches!(
            db.get("missing", b"k"),
            Err(DbError::ColumnFamilyNotFound(_))
        ));
    }

    #[test]
    fn test_memory_database() {
        let db = MemoryDatabase::new();
        exercise(&db);
        db.put(ColumnFamily::Default.name(), b"a", b"1").unwrap();
        assert_eq!(db.len(ColumnFamily::Default.name()), 1);
    }

    #[test]
    fn test_rocksdb_database() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_default(dir.path()).unwrap();
        exercise(&db);
    }

    #[test]
    fn test_rocksdb_reopen_keeps_synced_value() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open_default(dir.path()).unwrap();
            db.put_sync(ColumnFamily::Consensus.name(), &[0xf4], b"round")
                .unwrap();
        }
        let db = Database::open_default(dir.path()).unwrap();
        assert_eq!(
            db.get(ColumnFamily::Consensus.name(), &[0xf4]).unwrap(),
            Some(b"round".to_vec())
        );
        assert_eq!(db.path(), dir.path());
    }
}
