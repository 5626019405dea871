//! Engine Module
//!
//! The live store plus its persister.
//!
//! ## Responsibilities
//! - Recover the keyspace on startup (AOF first, RDB if no AOF exists)
//! - Validate, log, then apply every write
//! - Expose snapshot and replication-handoff entry points

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::aof::{self, AofEntry, Operation};
use crate::config::Config;
use crate::error::{DriftError, Result};
use crate::persist::{self, AofListener, ListenerId, Persister, RewriteOutcome};
use crate::store::{now_millis, Store, Value};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes**: serialized by `write_lock`, in the order
///   check → AOF append → store apply, so the log order is the apply order
/// - **Reads**: go straight to the store's per-database RwLock
/// - **Rewrites**: run on the caller's thread; they hold the AOF pause lock
///   only briefly, so writes keep flowing while a snapshot is encoded
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// The live keyspace
    store: Store,

    /// AOF owner and rewrite coordinator
    persister: Persister,

    /// Serializes write operations
    write_lock: Mutex<()>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config and create the data directory
    /// 2. Replay the AOF if it exists, cutting off a torn tail
    /// 3. Otherwise load the RDB snapshot if one exists, and seed a fresh
    ///    AOF from it so the log stays the source of truth
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let store = Store::new(config.databases);
        let aof_path = config.aof_path();
        let rdb_path = config.rdb_path();

        if aof_path.exists() {
            let result = aof::replay(&aof_path, None, &store)?;
            tracing::info!(
                entries = result.entries_applied,
                bytes = result.valid_len,
                torn_tail = result.was_truncated,
                "AOF recovery complete"
            );
            aof::truncate_torn_tail(&aof_path, &result)?;
        } else if rdb_path.exists() {
            persist::load_snapshot(&store, &rdb_path)?;
            persist::seed_aof(&store, &aof_path)?;
        }

        let persister = Persister::open(&config)?;

        Ok(Self {
            config,
            store,
            persister,
            write_lock: Mutex::new(()),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Execute a write against database `db`
    pub fn execute(&self, db: usize, operation: Operation) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        let entry = AofEntry::new(self.store.db(db).map(|_| db as u32)?, operation);

        // Step 1: Reject before logging anything
        self.store.check(&entry)?;

        // Step 2: Log (durability, replication feed)
        match self.persister.append(&entry) {
            // Step 3: Apply to the live store
            Ok(_) => self.store.apply(&entry),
            // In the log and on the replication feed, just not durable:
            // the store must still follow the log
            Err(err @ DriftError::AofSync(_)) => {
                self.store.apply(&entry)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Set a string value
    pub fn set(&self, db: usize, key: &str, value: &[u8]) -> Result<()> {
        self.execute(
            db,
            Operation::Set {
                key: key.to_string(),
                value: value.to_vec(),
            },
        )
    }

    /// Delete a key
    pub fn delete(&self, db: usize, key: &str) -> Result<()> {
        self.execute(
            db,
            Operation::Delete {
                keys: vec![key.to_string()],
            },
        )
    }

    /// Get a live value; expired keys read as absent
    pub fn get(&self, db: usize, key: &str) -> Result<Option<Value>> {
        let now = now_millis();
        Ok(self
            .store
            .get(db, key)?
            .filter(|entity| !entity.is_expired(now))
            .map(|entity| entity.value))
    }

    /// Absolute expiration of a live key
    pub fn expiration(&self, db: usize, key: &str) -> Result<Option<u64>> {
        let now = now_millis();
        Ok(self
            .store
            .get(db, key)?
            .filter(|entity| !entity.is_expired(now))
            .and_then(|entity| entity.expires_at))
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Rewrite the AOF into the configured snapshot file
    pub fn snapshot(&self) -> Result<RewriteOutcome> {
        self.persister.snapshot(&self.config.rdb_path())
    }

    /// Rewrite the AOF into a snapshot at `target`
    pub fn snapshot_to(&self, target: &Path) -> Result<RewriteOutcome> {
        self.persister.snapshot(target)
    }

    /// Rewrite into `target` and hand `listener` the writes that follow it
    pub fn snapshot_for_replication<F: FnOnce()>(
        &self,
        target: &Path,
        listener: Arc<dyn AofListener>,
        hook: F,
    ) -> Result<RewriteOutcome> {
        self.persister.snapshot_for_replication(target, listener, hook)
    }

    /// Stop feeding a replication listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.persister.remove_listener(id)
    }

    /// Close the engine gracefully
    ///
    /// Syncs the AOF so every acknowledged write is on disk
    pub fn close(self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.persister.sync()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the live store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Get the persister
    pub fn persister(&self) -> &Persister {
        &self.persister
    }
}
