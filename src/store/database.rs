//! Single database
//!
//! BTreeMap-based keyspace with RwLock for concurrency.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use parking_lot::RwLock;

use crate::aof::Operation;
use crate::error::{DriftError, Result};

use super::{DataEntity, SortedSet, Value, ValueKind};

/// One numbered keyspace
pub struct Database {
    entries: RwLock<BTreeMap<String, DataEntity>>,
}

impl Database {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get a clone of the entity stored at `key`
    pub fn get(&self, key: &str) -> Option<DataEntity> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// (key count, keys carrying an expiration), read under one lock
    pub fn size(&self) -> (usize, usize) {
        let entries = self.entries.read();
        let ttl = entries.values().filter(|e| e.expires_at.is_some()).count();
        (entries.len(), ttl)
    }

    /// Insert or replace an entity
    pub fn insert(&self, key: impl Into<String>, entity: DataEntity) {
        self.entries.write().insert(key.into(), entity);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Clone out the whole keyspace
    pub fn entries(&self) -> BTreeMap<String, DataEntity> {
        self.entries.read().clone()
    }

    /// Visit every entry in key order under the read lock.
    ///
    /// Stops at the first error and returns it.
    pub fn for_each<E, F>(&self, mut f: F) -> std::result::Result<(), E>
    where
        F: FnMut(&str, &DataEntity) -> std::result::Result<(), E>,
    {
        let entries = self.entries.read();
        for (key, entity) in entries.iter() {
            f(key, entity)?;
        }
        Ok(())
    }

    /// Reject an operation that would hit a key of another kind or
    /// carries a non-finite score
    pub fn check(&self, op: &Operation) -> Result<()> {
        check_scores(op)?;
        check_kind(&self.entries.read(), op)
    }

    /// Apply one operation
    pub fn apply(&self, op: &Operation) -> Result<()> {
        check_scores(op)?;
        let mut entries = self.entries.write();
        check_kind(&entries, op)?;

        match op {
            Operation::Set { key, value } => {
                entries.insert(key.clone(), DataEntity::new(Value::String(value.clone())));
            }
            Operation::Delete { keys } => {
                for key in keys {
                    entries.remove(key);
                }
            }
            Operation::Expire { key, at_ms } => {
                if let Some(entity) = entries.get_mut(key) {
                    entity.expires_at = Some(*at_ms);
                }
            }
            Operation::Persist { key } => {
                if let Some(entity) = entries.get_mut(key) {
                    entity.expires_at = None;
                }
            }
            Operation::RPush { key, values } | Operation::LPush { key, values } => {
                if values.is_empty() {
                    return Ok(());
                }
                let front = matches!(op, Operation::LPush { .. });
                if let Value::List(list) = container(&mut entries, key, || {
                    Value::List(VecDeque::new())
                }) {
                    for value in values {
                        if front {
                            list.push_front(value.clone());
                        } else {
                            list.push_back(value.clone());
                        }
                    }
                }
            }
            Operation::SAdd { key, members } => {
                if members.is_empty() {
                    return Ok(());
                }
                if let Value::Set(set) = container(&mut entries, key, || Value::Set(HashSet::new())) {
                    set.extend(members.iter().cloned());
                }
            }
            Operation::SRem { key, members } => {
                if let Some(Value::Set(set)) = entries.get_mut(key).map(|e| &mut e.value) {
                    for member in members {
                        set.remove(member);
                    }
                }
                remove_if_drained(&mut entries, key);
            }
            Operation::HSet { key, fields } => {
                if fields.is_empty() {
                    return Ok(());
                }
                if let Value::Hash(hash) = container(&mut entries, key, || Value::Hash(HashMap::new())) {
                    for (field, value) in fields {
                        hash.insert(field.clone(), value.clone());
                    }
                }
            }
            Operation::HDel { key, fields } => {
                if let Some(Value::Hash(hash)) = entries.get_mut(key).map(|e| &mut e.value) {
                    for field in fields {
                        hash.remove(field);
                    }
                }
                remove_if_drained(&mut entries, key);
            }
            Operation::ZAdd { key, members } => {
                if members.is_empty() {
                    return Ok(());
                }
                if let Value::ZSet(zset) = container(&mut entries, key, || Value::ZSet(SortedSet::new())) {
                    for (member, score) in members {
                        zset.add(member.clone(), *score);
                    }
                }
            }
            Operation::ZRem { key, members } => {
                if let Some(Value::ZSet(zset)) = entries.get_mut(key).map(|e| &mut e.value) {
                    for member in members {
                        zset.remove(member);
                    }
                }
                remove_if_drained(&mut entries, key);
            }
            Operation::FlushDb => entries.clear(),
        }

        Ok(())
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

/// The kind an operation requires its key to hold, if any
fn required_kind(op: &Operation) -> Option<(&str, ValueKind)> {
    match op {
        Operation::RPush { key, .. } | Operation::LPush { key, .. } => Some((key, ValueKind::List)),
        Operation::SAdd { key, .. } | Operation::SRem { key, .. } => Some((key, ValueKind::Set)),
        Operation::HSet { key, .. } | Operation::HDel { key, .. } => Some((key, ValueKind::Hash)),
        Operation::ZAdd { key, .. } | Operation::ZRem { key, .. } => Some((key, ValueKind::ZSet)),
        _ => None,
    }
}

fn check_kind(entries: &BTreeMap<String, DataEntity>, op: &Operation) -> Result<()> {
    if let Some((key, kind)) = required_kind(op) {
        if let Some(entity) = entries.get(key) {
            if entity.value.kind() != kind {
                return Err(DriftError::WrongType { key: key.to_string() });
            }
        }
    }
    Ok(())
}

fn check_scores(op: &Operation) -> Result<()> {
    if let Operation::ZAdd { key, members } = op {
        if let Some((member, _)) = members.iter().find(|(_, score)| !score.is_finite()) {
            return Err(DriftError::InvalidScore {
                key: key.clone(),
                member: member.clone(),
            });
        }
    }
    Ok(())
}

/// Existing value at `key`, or a fresh one from `empty`
fn container<'a>(
    entries: &'a mut BTreeMap<String, DataEntity>,
    key: &str,
    empty: impl FnOnce() -> Value,
) -> &'a mut Value {
    &mut entries
        .entry(key.to_string())
        .or_insert_with(|| DataEntity::new(empty()))
        .value
}

/// Containers never linger empty
fn remove_if_drained(entries: &mut BTreeMap<String, DataEntity>, key: &str) {
    if entries.get(key).is_some_and(|e| e.value.is_empty_container()) {
        entries.remove(key);
    }
}
