//! Column family definitions for the node database

use std::collections::HashMap;

/// Column family names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// Default column family, always present in RocksDB
    Default,
    /// In-flight consensus round state (single prefix key -> serialized context)
    Consensus,
}

impl ColumnFamily {
    /// Get the string name for this column family
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Default => "default",
            ColumnFamily::Consensus => "consensus",
        }
    }

    /// Get all column families
    pub fn all() -> &'static [ColumnFamily] {
        &[ColumnFamily::Default, ColumnFamily::Consensus]
    }

    /// Get column family from name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(ColumnFamily::Default),
            "consensus" => Some(ColumnFamily::Consensus),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Column family configuration
#[derive(Debug, Clone)]
pub struct ColumnFamilyConfig {
    /// Block cache size in bytes
    pub block_cache_size: usize,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
    /// Max write buffer number
    pub max_write_buffer_number: i32,
    /// Compression type
    pub compression_type: CompressionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,
    Zstd,
}

impl Default for ColumnFamilyConfig {
    fn default() -> Self {
        Self {
            block_cache_size: 64 * 1024 * 1024, // 64MB
            write_buffer_size: 32 * 1024 * 1024, // 32MB
            max_write_buffer_number: 3,
            compression_type: CompressionType::Lz4,
        }
    }
}

/// Get optimized configurations for each column family
pub fn get_column_family_configs() -> HashMap<ColumnFamily, ColumnFamilyConfig> {
    let mut configs = HashMap::new();

    let default_config = ColumnFamilyConfig::default();

    // Consensus: one small, frequently rewritten value
    let consensus_config = ColumnFamilyConfig {
        block_cache_size: 1024 * 1024, // 1MB
        write_buffer_size: 4 * 1024 * 1024, // 4MB
        max_write_buffer_number: 2,
        compression_type: CompressionType::None,
    };

    configs.insert(ColumnFamily::Default, default_config);
    configs.insert(ColumnFamily::Consensus, consensus_config);

    configs
}
