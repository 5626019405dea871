//! Tests for the AOF → RDB rewrite
//!
//! These tests verify:
//! - The snapshot holds exactly the keyspace at the boundary
//! - Declared per-database counts match the records written
//! - Writes racing the rewrite land wholly after the boundary
//! - An existing snapshot is replaced, and the phase returns to Idle

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::sync::Arc;
use std::thread;

use driftkv::aof::Operation;
use driftkv::persist::{restore_snapshot, RewritePhase, RDB_COMPAT_VERSION};
use driftkv::rdb::{self, RdbValue, ZSetEntry};
use driftkv::store::{Store, Value};
use tempfile::TempDir;

use crate::open_engine;

// =============================================================================
// Content Tests
// =============================================================================

#[test]
fn test_snapshot_holds_string_and_list_with_ttl() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    let ttl = 4_102_444_800_000;

    engine.set(0, "a", b"1").unwrap();
    engine
        .execute(0, Operation::RPush { key: "b".into(), values: vec![b"x".to_vec(), b"y".to_vec()] })
        .unwrap();
    engine.execute(0, Operation::Expire { key: "b".into(), at_ms: ttl }).unwrap();

    let outcome = engine.snapshot().unwrap();
    assert_eq!(outcome.keys_written, 2);
    assert_eq!(outcome.boundary, engine.persister().aof_len());
    assert_eq!(outcome.listener, None);

    let snapshot = rdb::load(&engine.config().rdb_path()).unwrap();
    assert_eq!(snapshot.databases.len(), 1);

    let db = snapshot.database(0).unwrap();
    assert_eq!((db.key_count, db.ttl_count), (2, 1));
    assert_eq!(db.records.len(), 2);

    assert_eq!(db.records[0].key, "a");
    assert_eq!(db.records[0].value, RdbValue::String(b"1".to_vec()));
    assert_eq!(db.records[0].expires_at, None);

    assert_eq!(db.records[1].key, "b");
    assert_eq!(db.records[1].value, RdbValue::List(vec![b"x".to_vec(), b"y".to_vec()]));
    assert_eq!(db.records[1].expires_at, Some(ttl));
}

#[test]
fn test_snapshot_aux_fields() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    engine.snapshot().unwrap();

    let snapshot = rdb::load(&engine.config().rdb_path()).unwrap();
    assert_eq!(snapshot.aux["redis-ver"], RDB_COMPAT_VERSION);
    assert_eq!(snapshot.aux["redis-bits"], "64");
    assert_eq!(snapshot.aux["aof-preamble"], "0");
    assert!(snapshot.aux["ctime"].parse::<u64>().is_ok());
    assert_eq!(snapshot.aux["drift-ver"], driftkv::VERSION);
}

#[test]
fn test_empty_aof_gives_empty_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    let outcome = engine.snapshot().unwrap();
    assert_eq!(outcome.boundary, 0);
    assert_eq!(outcome.keys_written, 0);

    let snapshot = rdb::load(&engine.config().rdb_path()).unwrap();
    assert!(snapshot.databases.is_empty());
}

#[test]
fn test_every_kind_across_databases() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    engine.set(0, "s", b"v").unwrap();
    engine
        .execute(1, Operation::SAdd { key: "set".into(), members: vec![b"m".to_vec()] })
        .unwrap();
    engine
        .execute(2, Operation::HSet { key: "h".into(), fields: vec![("f".into(), b"1".to_vec())] })
        .unwrap();
    engine
        .execute(
            3,
            Operation::ZAdd { key: "z".into(), members: vec![("hi".into(), 9.0), ("lo".into(), -1.0)] },
        )
        .unwrap();
    engine.execute(3, Operation::Expire { key: "z".into(), at_ms: 1 }).unwrap();

    engine.snapshot().unwrap();
    let snapshot = rdb::load(&engine.config().rdb_path()).unwrap();

    assert_eq!(snapshot.databases.len(), 4);
    for db in &snapshot.databases {
        let ttls = db.records.iter().filter(|r| r.expires_at.is_some()).count() as u64;
        assert_eq!(db.key_count, db.records.len() as u64);
        assert_eq!(db.ttl_count, ttls);
    }

    // Already-expired keys are still data to a snapshot
    let z = &snapshot.database(3).unwrap().records[0];
    assert_eq!(z.expires_at, Some(1));
    assert_eq!(
        z.value,
        RdbValue::ZSet(vec![ZSetEntry::new("lo", -1.0), ZSetEntry::new("hi", 9.0)])
    );
}

#[test]
fn test_deleted_and_drained_keys_absent() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    engine.set(0, "gone", b"1").unwrap();
    engine.delete(0, "gone").unwrap();
    engine
        .execute(0, Operation::SAdd { key: "drained".into(), members: vec![b"m".to_vec()] })
        .unwrap();
    engine
        .execute(0, Operation::SRem { key: "drained".into(), members: vec![b"m".to_vec()] })
        .unwrap();
    engine.set(0, "kept", b"1").unwrap();

    let outcome = engine.snapshot().unwrap();
    assert_eq!(outcome.keys_written, 1);

    let snapshot = rdb::load(&engine.config().rdb_path()).unwrap();
    let keys: Vec<_> = snapshot.databases[0].records.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["kept"]);
}

#[test]
fn test_snapshot_restores_into_equal_store() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    for i in 0..50 {
        engine.set(i % 4, &format!("key{}", i), format!("value{}", i).repeat(10).as_bytes()).unwrap();
    }
    engine
        .execute(2, Operation::LPush { key: "l".into(), values: vec![b"1".to_vec(), b"2".to_vec()] })
        .unwrap();

    engine.snapshot().unwrap();
    let restored = Store::new(4);
    let count = restore_snapshot(&restored, rdb::load(&engine.config().rdb_path()).unwrap()).unwrap();
    assert_eq!(count, 51);

    for index in 0..4 {
        assert_eq!(restored.db(index).unwrap().entries(), engine.store().db(index).unwrap().entries());
    }
    assert_eq!(
        restored.get(2, "l").unwrap().unwrap().value,
        Value::List(VecDeque::from(vec![b"2".to_vec(), b"1".to_vec()]))
    );
}

// =============================================================================
// Boundary Tests
// =============================================================================

#[test]
fn test_second_snapshot_replaces_first() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    let rdb_path = engine.config().rdb_path();

    engine.set(0, "a", b"1").unwrap();
    let first = engine.snapshot().unwrap();

    engine.set(0, "b", b"2").unwrap();
    let second = engine.snapshot().unwrap();

    assert!(second.boundary > first.boundary);
    assert_eq!(rdb::load(&rdb_path).unwrap().record_count(), 2);
    assert_eq!(engine.persister().phase(), RewritePhase::Idle);
}

#[test]
fn test_snapshot_is_prefix_under_concurrent_writes() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(temp_dir.path()));
    let total = 2000;

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..total {
                engine.set(0, &format!("k{:05}", i), b"v").unwrap();
            }
        })
    };

    let mut outcomes = Vec::new();
    for n in 0..5 {
        let target = temp_dir.path().join(format!("snap{}.rdb", n));
        outcomes.push((target.clone(), engine.snapshot_to(&target).unwrap()));
    }
    writer.join().unwrap();

    for (target, outcome) in outcomes {
        let snapshot = rdb::load(&target).unwrap();
        let keys: BTreeSet<String> = snapshot
            .databases
            .iter()
            .flat_map(|db| db.records.iter().map(|r| r.key.clone()))
            .collect();

        // Writes are sequential, so the snapshot must be exactly k0..k(n-1)
        let expected: BTreeSet<String> = (0..keys.len()).map(|i| format!("k{:05}", i)).collect();
        assert_eq!(keys, expected);
        assert_eq!(outcome.keys_written, keys.len() as u64);
    }

    let final_target = temp_dir.path().join("final.rdb");
    engine.snapshot_to(&final_target).unwrap();
    assert_eq!(rdb::load(&final_target).unwrap().record_count(), total);
}

#[test]
fn test_snapshot_without_compression() {
    let temp_dir = TempDir::new().unwrap();
    let config = driftkv::Config::builder()
        .data_dir(temp_dir.path())
        .rdb_compression(false)
        .build();
    let engine = driftkv::Engine::open(config).unwrap();
    let long = "z".repeat(4096);

    engine.set(0, "long", long.as_bytes()).unwrap();
    engine.snapshot().unwrap();

    let rdb_path = engine.config().rdb_path();
    assert!(fs::metadata(&rdb_path).unwrap().len() > 4096);
    let snapshot = rdb::load(&rdb_path).unwrap();
    assert_eq!(
        snapshot.databases[0].records[0].value,
        RdbValue::String(long.into_bytes())
    );
}
