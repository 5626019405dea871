//! Store Module
//!
//! In-memory keyspace split into numbered databases.
//!
//! ## Responsibilities
//! - Hold the five value kinds (string, list, set, hash, sorted set)
//! - Track absolute expiration timestamps per key
//! - Apply logged operations deterministically (live serving and replay
//!   share the same `apply`)
//! - Ordered per-database iteration for snapshot encoding
//!
//! ## Data Structure Choice
//! Each database is a BTreeMap behind a RwLock:
//! - Ordered keys make snapshot output stable across runs
//! - Many concurrent readers, one writer at a time
//!
//! Expiration is data, not behavior: `apply` never drops a key because its
//! deadline passed, so replaying the same log always rebuilds the same
//! keyspace. Readers such as `Engine::get` hide expired keys.

mod database;
mod sorted_set;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use database::Database;
pub use sorted_set::SortedSet;

use crate::aof::AofEntry;
use crate::error::{DriftError, Result};

/// The kind tag of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    List,
    Set,
    Hash,
    ZSet,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::Hash => "hash",
            ValueKind::ZSet => "zset",
        };
        f.write_str(name)
    }
}

/// A stored value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Raw byte string
    String(Vec<u8>),

    /// Ordered list of byte strings
    List(VecDeque<Vec<u8>>),

    /// Unordered set of byte strings
    Set(HashSet<Vec<u8>>),

    /// Field → value map
    Hash(HashMap<String, Vec<u8>>),

    /// Members ranked by score
    ZSet(SortedSet),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Hash(_) => ValueKind::Hash,
            Value::ZSet(_) => ValueKind::ZSet,
        }
    }

    /// True for containers with no elements left
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::Hash(hash) => hash.is_empty(),
            Value::ZSet(zset) => zset.is_empty(),
        }
    }
}

/// A value plus its optional expiration
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntity {
    pub value: Value,

    /// Absolute expiration, unix millis
    pub expires_at: Option<u64>,
}

impl DataEntity {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn with_expiration(value: Value, expires_at: u64) -> Self {
        Self {
            value,
            expires_at: Some(expires_at),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_ms)
    }
}

/// Current wall-clock time in unix millis
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A fixed set of numbered databases
pub struct Store {
    databases: Vec<Database>,
}

impl Store {
    /// Create a store with `count` empty databases
    pub fn new(count: usize) -> Self {
        Self {
            databases: (0..count).map(|_| Database::new()).collect(),
        }
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    /// Borrow one database
    pub fn db(&self, index: usize) -> Result<&Database> {
        self.databases
            .get(index)
            .ok_or(DriftError::InvalidDatabase {
                index,
                count: self.databases.len(),
            })
    }

    /// Validate a logged entry against the current keyspace without applying it
    pub fn check(&self, entry: &AofEntry) -> Result<()> {
        self.db(entry.db as usize)?.check(&entry.operation)
    }

    /// Apply a logged entry
    pub fn apply(&self, entry: &AofEntry) -> Result<()> {
        self.db(entry.db as usize)?.apply(&entry.operation)
    }

    /// Raw lookup, expired keys included
    pub fn get(&self, db: usize, key: &str) -> Result<Option<DataEntity>> {
        Ok(self.db(db)?.get(key))
    }

    /// Total number of keys across all databases
    pub fn key_count(&self) -> usize {
        self.databases.iter().map(|db| db.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }
}
