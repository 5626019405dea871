//! Tests for the replication handoff
//!
//! These tests verify:
//! - The listener's stream is exactly the AOF bytes after the boundary
//! - Snapshot + stream reproduces the live keyspace
//! - Hooks run inside the pause window, one rewrite at a time

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use driftkv::aof::{AofReader, Operation};
use driftkv::persist::{restore_snapshot, AofListener, ChannelListener};
use driftkv::rdb;
use driftkv::store::Store;
use tempfile::TempDir;

use crate::open_engine;

// =============================================================================
// Helper Functions
// =============================================================================

/// Listener that counts what it is handed
#[derive(Default)]
struct CountingListener {
    chunks: AtomicUsize,
}

impl AofListener for CountingListener {
    fn on_append(&self, _chunk: &Bytes) -> bool {
        self.chunks.fetch_add(1, Ordering::SeqCst);
        true
    }
}

// =============================================================================
// Stream Tests
// =============================================================================

#[test]
fn test_listener_receives_only_later_appends() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    engine.set(0, "before", b"1").unwrap();

    let (listener, rx) = ChannelListener::new();
    let outcome = engine
        .snapshot_for_replication(&temp_dir.path().join("replica.rdb"), listener, || {})
        .unwrap();
    assert!(outcome.listener.is_some());

    engine.set(0, "after", b"2").unwrap();
    engine.persister().sync().unwrap();

    let chunks: Vec<Bytes> = rx.try_iter().collect();
    assert_eq!(chunks.len(), 1);

    let aof = std::fs::read(engine.config().aof_path()).unwrap();
    assert_eq!(&aof[outcome.boundary as usize..], &chunks[0][..]);
}

#[test]
fn test_stream_matches_aof_tail_under_concurrent_writes() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(temp_dir.path()));
    let replica_path = temp_dir.path().join("replica.rdb");

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..300 {
                    let key = format!("t{}-{}", t, i % 40);
                    engine
                        .execute(
                            t,
                            Operation::RPush { key, values: vec![i.to_string().into_bytes()] },
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    let (listener, rx) = ChannelListener::new();
    let outcome = engine.snapshot_for_replication(&replica_path, listener, || {}).unwrap();

    for w in writers {
        w.join().unwrap();
    }
    engine.persister().sync().unwrap();

    // Byte-exact: the stream is the AOF tail after the boundary
    let streamed: Vec<u8> = rx.try_iter().flat_map(|chunk| chunk.to_vec()).collect();
    let aof = std::fs::read(engine.config().aof_path()).unwrap();
    assert_eq!(streamed, aof[outcome.boundary as usize..].to_vec());

    // Snapshot + stream reproduces the primary
    let replica = Store::new(4);
    restore_snapshot(&replica, rdb::load(&replica_path).unwrap()).unwrap();
    for entry in AofReader::new(Cursor::new(streamed), None).entries() {
        replica.apply(&entry.unwrap()).unwrap();
    }
    for index in 0..4 {
        assert_eq!(replica.db(index).unwrap().entries(), engine.store().db(index).unwrap().entries());
    }
}

#[test]
fn test_removed_listener_stops_receiving() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    let listener = Arc::new(CountingListener::default());

    let outcome = engine
        .snapshot_for_replication(&temp_dir.path().join("replica.rdb"), listener.clone(), || {})
        .unwrap();
    engine.set(0, "a", b"1").unwrap();
    assert_eq!(listener.chunks.load(Ordering::SeqCst), 1);

    assert!(engine.remove_listener(outcome.listener.unwrap()));
    assert!(!engine.remove_listener(outcome.listener.unwrap()));
    engine.set(0, "b", b"2").unwrap();
    assert_eq!(listener.chunks.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dropped_receiver_is_deregistered_on_next_append() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    let (kept, kept_rx) = ChannelListener::new();
    let (dropped, dropped_rx) = ChannelListener::new();
    engine
        .snapshot_for_replication(&temp_dir.path().join("r1.rdb"), kept, || {})
        .unwrap();
    let gone = engine
        .snapshot_for_replication(&temp_dir.path().join("r2.rdb"), dropped, || {})
        .unwrap();
    assert_eq!(engine.persister().listener_count(), 2);

    drop(dropped_rx);
    engine.set(0, "a", b"1").unwrap();

    assert_eq!(engine.persister().listener_count(), 1);
    assert!(!engine.remove_listener(gone.listener.unwrap()));
    assert_eq!(kept_rx.try_iter().count(), 1);
}

// =============================================================================
// Hook Tests
// =============================================================================

#[test]
fn test_hook_runs_once_per_rewrite() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    let calls = AtomicUsize::new(0);

    for n in 0..3 {
        let (listener, _rx) = ChannelListener::new();
        engine
            .snapshot_for_replication(&temp_dir.path().join(format!("r{}.rdb", n)), listener, || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.persister().listener_count(), 3);
}

#[test]
fn test_concurrent_hooks_never_interleave() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(temp_dir.path()));
    engine.set(0, "a", b"1").unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let engine = Arc::clone(&engine);
            let events = Arc::clone(&events);
            let target = temp_dir.path().join(format!("replica{}.rdb", n));
            thread::spawn(move || {
                let (listener, _rx) = ChannelListener::new();
                engine
                    .snapshot_for_replication(&target, listener, || {
                        events.lock().unwrap().push(("enter", n));
                        thread::sleep(Duration::from_millis(20));
                        events.lock().unwrap().push(("exit", n));
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 8);
    for pair in events.chunks(2) {
        assert_eq!(pair[0].0, "enter");
        assert_eq!(pair[1].0, "exit");
        assert_eq!(pair[0].1, pair[1].1);
    }
}

#[test]
fn test_hook_blocks_writers() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(temp_dir.path()));
    let boundary_len = engine.persister().aof_len();

    let (listener, rx) = ChannelListener::new();
    let writer_engine = Arc::clone(&engine);
    let outcome = engine
        .snapshot_for_replication(&temp_dir.path().join("replica.rdb"), listener, || {
            // A write started inside the pause window cannot land before it ends
            let handle = thread::spawn(move || writer_engine.set(0, "late", b"1").unwrap());
            thread::sleep(Duration::from_millis(30));
            assert!(!handle.is_finished());
        })
        .unwrap();

    assert_eq!(outcome.boundary, boundary_len);
    // The write blocked in the window shows up on the stream
    let chunk = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!chunk.is_empty());
}
