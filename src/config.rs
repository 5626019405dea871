//! Configuration for DriftKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{DriftError, Result};

/// Main configuration for a DriftKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── appendonly.aof   (append-only log)
    ///     └── dump.rdb         (latest snapshot)
    pub data_dir: PathBuf,

    /// File name of the append-only log inside `data_dir`
    pub aof_filename: String,

    /// File name of the snapshot inside `data_dir`
    pub rdb_filename: String,

    /// Number of logical databases
    pub databases: usize,

    // -------------------------------------------------------------------------
    // AOF Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the AOF
    pub aof_sync_strategy: AofSyncStrategy,

    // -------------------------------------------------------------------------
    // Rewrite Configuration
    // -------------------------------------------------------------------------
    /// Compress long strings in snapshots
    pub rdb_compression: bool,

    /// Where rewrite temp files are staged. `None` stages next to the
    /// target so the final rename never crosses a filesystem.
    pub rewrite_scratch_dir: Option<PathBuf>,
}

/// AOF sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AofSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./driftkv_data"),
            aof_filename: "appendonly.aof".to_string(),
            rdb_filename: "dump.rdb".to_string(),
            databases: 16,
            aof_sync_strategy: AofSyncStrategy::EveryNEntries { count: 100 },
            rdb_compression: true,
            rewrite_scratch_dir: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Full path of the append-only log
    pub fn aof_path(&self) -> PathBuf {
        self.data_dir.join(&self.aof_filename)
    }

    /// Full path of the snapshot file
    pub fn rdb_path(&self) -> PathBuf {
        self.data_dir.join(&self.rdb_filename)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.databases == 0 {
            return Err(DriftError::Config(
                "databases must be at least 1".to_string(),
            ));
        }
        if let AofSyncStrategy::EveryNEntries { count: 0 } = self.aof_sync_strategy {
            return Err(DriftError::Config(
                "EveryNEntries sync count must be at least 1".to_string(),
            ));
        }
        if self.aof_filename.is_empty() || self.rdb_filename.is_empty() {
            return Err(DriftError::Config("file names must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the AOF file name
    pub fn aof_filename(mut self, name: impl Into<String>) -> Self {
        self.config.aof_filename = name.into();
        self
    }

    /// Set the snapshot file name
    pub fn rdb_filename(mut self, name: impl Into<String>) -> Self {
        self.config.rdb_filename = name.into();
        self
    }

    /// Set the number of logical databases
    pub fn databases(mut self, count: usize) -> Self {
        self.config.databases = count;
        self
    }

    /// Set the AOF sync strategy
    pub fn aof_sync_strategy(mut self, strategy: AofSyncStrategy) -> Self {
        self.config.aof_sync_strategy = strategy;
        self
    }

    /// Enable or disable snapshot compression
    pub fn rdb_compression(mut self, enabled: bool) -> Self {
        self.config.rdb_compression = enabled;
        self
    }

    /// Stage rewrite temp files in a specific directory
    pub fn rewrite_scratch_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rewrite_scratch_dir = Some(path.into());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
