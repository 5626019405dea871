//! Snapshot loading
//!
//! Restores a decoded snapshot into a store, used at startup when no AOF
//! exists yet, and writes the AOF that takes over from it.

use std::io::{BufWriter, Write};
use std::path::Path;

use crate::aof::AofEntry;
use crate::error::{DriftError, Result};
use crate::rdb::{self, RdbSnapshot};
use crate::store::{DataEntity, Store};

use super::adapter::{self, value_from_rdb};

/// Insert every record of `snapshot` into `store`, returning the record count
pub fn restore_snapshot(store: &Store, snapshot: RdbSnapshot) -> Result<u64> {
    let mut restored = 0;
    for section in snapshot.databases {
        let db = store.db(section.index)?;
        for record in section.records {
            db.insert(
                record.key,
                DataEntity {
                    value: value_from_rdb(record.value),
                    expires_at: record.expires_at,
                },
            );
            restored += 1;
        }
    }
    Ok(restored)
}

/// Decode the snapshot at `path` and restore it into `store`
pub fn load_snapshot(store: &Store, path: &Path) -> Result<u64> {
    let snapshot = rdb::load(path)?;
    let restored = restore_snapshot(store, snapshot)?;
    tracing::info!(path = %path.display(), keys = restored, "loaded RDB snapshot");
    Ok(restored)
}

/// Write a fresh AOF at `aof_path` that recreates everything in `store`,
/// returning the number of frames written.
///
/// Frames are staged in a temp file beside `aof_path` and renamed into
/// place only once complete and synced. On failure no AOF appears, so the
/// next start loads the snapshot again.
pub fn seed_aof(store: &Store, aof_path: &Path) -> Result<u64> {
    let dir = match aof_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".seed-")
        .suffix(".aof.tmp")
        .tempfile_in(dir)?;

    let mut frames = 0u64;
    {
        let mut out = BufWriter::new(tmp.as_file());
        for index in 0..store.database_count() {
            store.db(index)?.for_each(|key, entity| {
                for operation in adapter::operations_for(key, entity) {
                    out.write_all(&AofEntry::new(index as u32, operation).encode()?)?;
                    frames += 1;
                }
                Ok::<(), DriftError>(())
            })?;
        }
        out.flush()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(aof_path).map_err(|e| DriftError::Io(e.error))?;
    super::sync_parent_dir(aof_path);

    tracing::info!(path = %aof_path.display(), frames, "seeded AOF from snapshot");
    Ok(frames)
}
