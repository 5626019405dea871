//! Value adapters
//!
//! Conversions between stored values and the shapes the snapshot codec and
//! the log understand. One arm per value kind; adding a kind means
//! extending `Value` and every match below.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;

use crate::aof::Operation;
use crate::error::Result;
use crate::rdb::{RdbEncoder, RdbValue, WriteOption, ZSetEntry};
use crate::store::{DataEntity, SortedSet, Value};

/// Encode one entity as a snapshot record
pub fn write_entity<W: Write>(encoder: &mut RdbEncoder<W>, key: &str, entity: &DataEntity) -> Result<()> {
    let ttl: Vec<WriteOption> = entity.expires_at.map(WriteOption::Ttl).into_iter().collect();

    match &entity.value {
        Value::String(bytes) => encoder.write_string_object(key, bytes, &ttl),
        Value::List(list) => {
            let values: Vec<&[u8]> = list.iter().map(Vec::as_slice).collect();
            encoder.write_list_object(key, &values, &ttl)
        }
        Value::Set(set) => {
            let members: Vec<&[u8]> = set.iter().map(Vec::as_slice).collect();
            encoder.write_set_object(key, &members, &ttl)
        }
        Value::Hash(hash) => {
            let fields: Vec<(&str, &[u8])> = hash
                .iter()
                .map(|(field, value)| (field.as_str(), value.as_slice()))
                .collect();
            encoder.write_hash_object(key, &fields, &ttl)
        }
        Value::ZSet(zset) => encoder.write_zset_object(key, &zset_entries(zset), &ttl),
    }
}

/// Sorted-set elements in rank order (score, then member)
pub fn zset_entries(zset: &SortedSet) -> Vec<ZSetEntry> {
    zset.iter()
        .map(|(member, score)| ZSetEntry::new(member, score))
        .collect()
}

/// Rebuild a stored value from a decoded snapshot body
pub fn value_from_rdb(value: RdbValue) -> Value {
    match value {
        RdbValue::String(bytes) => Value::String(bytes),
        RdbValue::List(items) => Value::List(VecDeque::from(items)),
        RdbValue::Set(members) => Value::Set(members.into_iter().collect::<HashSet<_>>()),
        RdbValue::Hash(fields) => Value::Hash(fields.into_iter().collect::<HashMap<_, _>>()),
        RdbValue::ZSet(entries) => Value::ZSet(
            entries
                .into_iter()
                .map(|entry| (entry.member, entry.score))
                .collect(),
        ),
    }
}

/// Log operations that recreate `entity` at `key` from nothing
pub fn operations_for(key: &str, entity: &DataEntity) -> Vec<Operation> {
    let key = key.to_string();
    let mut ops = vec![match &entity.value {
        Value::String(bytes) => Operation::Set {
            key: key.clone(),
            value: bytes.clone(),
        },
        Value::List(list) => Operation::RPush {
            key: key.clone(),
            values: list.iter().cloned().collect(),
        },
        Value::Set(set) => Operation::SAdd {
            key: key.clone(),
            members: set.iter().cloned().collect(),
        },
        Value::Hash(hash) => Operation::HSet {
            key: key.clone(),
            fields: hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
        },
        Value::ZSet(zset) => Operation::ZAdd {
            key: key.clone(),
            members: zset.iter().map(|(m, s)| (m.to_string(), s)).collect(),
        },
    }];

    if let Some(at_ms) = entity.expires_at {
        ops.push(Operation::Expire { key, at_ms });
    }
    ops
}
