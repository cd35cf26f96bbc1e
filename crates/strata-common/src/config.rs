//! Configuration structures for StrataDB.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the engine.
///
/// Aggregates the settings recognized by the disk manager, the disk
/// scheduler, and the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the backing data file.
    pub path: PathBuf,
    /// Number of frames in the buffer pool.
    pub num_frames: usize,
    /// K for the LRU-K replacement policy (must be at least 2).
    pub lru_k: usize,
    /// Number of background I/O worker threads.
    pub io_workers: usize,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./strata.db"),
            num_frames: 1024,
            lru_k: 2,
            io_workers: 1,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.num_frames * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.path, PathBuf::from("./strata.db"));
        assert_eq!(config.num_frames, 1024);
        assert_eq!(config.lru_k, 2);
        assert_eq!(config.io_workers, 1);
        assert!(config.fsync_enabled);
    }

    #[test]
    fn test_storage_config_custom() {
        let config = StorageConfig {
            path: PathBuf::from("/var/lib/strata/data.db"),
            num_frames: 4096,
            lru_k: 3,
            io_workers: 4,
            fsync_enabled: false,
        };

        assert_eq!(config.path, PathBuf::from("/var/lib/strata/data.db"));
        assert_eq!(config.num_frames, 4096);
        assert_eq!(config.lru_k, 3);
        assert_eq!(config.io_workers, 4);
        assert!(!config.fsync_enabled);
    }

    #[test]
    fn test_buffer_pool_size_bytes() {
        let config = StorageConfig::default();
        assert_eq!(config.buffer_pool_size_bytes(), 1024 * PAGE_SIZE);
        assert_eq!(config.buffer_pool_size_bytes(), 4_194_304); // 4 MB
    }

    #[test]
    fn test_storage_config_clone() {
        let config1 = StorageConfig::default();
        let config2 = config1.clone();
        assert_eq!(config1.num_frames, config2.num_frames);
        assert_eq!(config1.path, config2.path);
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let original = StorageConfig::default();
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.path, deserialized.path);
        assert_eq!(original.num_frames, deserialized.num_frames);
        assert_eq!(original.lru_k, deserialized.lru_k);
        assert_eq!(original.io_workers, deserialized.io_workers);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
    }
}
