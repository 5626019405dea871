//! Tests for AOF Replay
//!
//! These tests verify:
//! - Full replay reproduces every operation kind
//! - Bounded replay stops at the boundary
//! - Torn tails are reported and can be truncated away

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use driftkv::aof::{replay, truncate_torn_tail, AofEntry, AofWriter, Operation};
use driftkv::config::AofSyncStrategy;
use driftkv::store::{Store, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_aof() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let aof_path = temp_dir.path().join("appendonly.aof");
    (temp_dir, aof_path)
}

fn write_ops(path: &PathBuf, ops: Vec<(u32, Operation)>) -> Vec<u64> {
    let mut writer = AofWriter::open(path, AofSyncStrategy::EveryWrite).unwrap();
    ops.into_iter()
        .map(|(db, op)| {
            writer.append(&AofEntry::new(db, op)).unwrap();
            writer.len()
        })
        .collect()
}

// =============================================================================
// Full Replay Tests
// =============================================================================

#[test]
fn test_replay_missing_file_fails() {
    let (_temp, aof_path) = setup_temp_aof();
    let store = Store::new(1);

    assert!(replay(&aof_path, None, &store).is_err());
}

#[test]
fn test_replay_all_kinds() {
    let (_temp, aof_path) = setup_temp_aof();
    write_ops(
        &aof_path,
        vec![
            (0, Operation::Set { key: "s".into(), value: b"v".to_vec() }),
            (0, Operation::RPush { key: "l".into(), values: vec![b"a".to_vec(), b"b".to_vec()] }),
            (0, Operation::LPush { key: "l".into(), values: vec![b"z".to_vec()] }),
            (1, Operation::SAdd { key: "set".into(), members: vec![b"m".to_vec()] }),
            (1, Operation::HSet { key: "h".into(), fields: vec![("f".into(), b"1".to_vec())] }),
            (2, Operation::ZAdd { key: "z".into(), members: vec![("x".into(), 1.5)] }),
            (2, Operation::Expire { key: "z".into(), at_ms: 99 }),
        ],
    );

    let store = Store::new(3);
    let result = replay(&aof_path, None, &store).unwrap();

    assert_eq!(result.entries_applied, 7);
    assert!(!result.was_truncated);
    assert_eq!(store.key_count(), 5);

    let list = store.get(0, "l").unwrap().unwrap();
    assert_eq!(
        list.value,
        Value::List(VecDeque::from(vec![b"z".to_vec(), b"a".to_vec(), b"b".to_vec()]))
    );
    assert_eq!(store.get(2, "z").unwrap().unwrap().expires_at, Some(99));
}

// =============================================================================
// Bounded Replay Tests
// =============================================================================

#[test]
fn test_replay_respects_limit() {
    let (_temp, aof_path) = setup_temp_aof();
    let ends = write_ops(
        &aof_path,
        vec![
            (0, Operation::Set { key: "a".into(), value: b"1".to_vec() }),
            (0, Operation::Set { key: "b".into(), value: b"2".to_vec() }),
            (0, Operation::Delete { keys: vec!["a".into()] }),
        ],
    );

    let store = Store::new(1);
    let result = replay(&aof_path, Some(ends[1]), &store).unwrap();

    assert_eq!(result.entries_applied, 2);
    assert_eq!(result.valid_len, ends[1]);
    assert!(store.get(0, "a").unwrap().is_some());
}

// =============================================================================
// Torn Tail Tests
// =============================================================================

#[test]
fn test_torn_tail_reported_and_truncated() {
    let (_temp, aof_path) = setup_temp_aof();
    let ends = write_ops(
        &aof_path,
        vec![(0, Operation::Set { key: "a".into(), value: b"1".to_vec() })],
    );

    let mut file = OpenOptions::new().append(true).open(&aof_path).unwrap();
    file.write_all(&[7, 0, 0]).unwrap();
    drop(file);

    let store = Store::new(1);
    let result = replay(&aof_path, None, &store).unwrap();
    assert!(result.was_truncated);
    assert_eq!(result.valid_len, ends[0]);

    truncate_torn_tail(&aof_path, &result).unwrap();
    assert_eq!(fs::metadata(&aof_path).unwrap().len(), ends[0]);

    let again = replay(&aof_path, None, &Store::new(1)).unwrap();
    assert!(!again.was_truncated);
    assert_eq!(again.entries_applied, 1);
}
