//! AOF Replay
//!
//! Applies a prefix of the log to a store. Crash recovery replays the whole
//! file into the live store; a rewrite replays up to its captured boundary
//! into a private one.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::Result;
use crate::store::Store;

use super::AofReader;

/// Result of a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayResult {
    /// Number of entries applied to the store
    pub entries_applied: u64,

    /// Offset just past the last complete frame
    pub valid_len: u64,

    /// Whether a partially written final frame was found
    pub was_truncated: bool,
}

/// Replay entries `[0, limit)` of the AOF at `path` into `store`, in file order.
///
/// A torn trailing frame ends the replay and is reported through
/// `was_truncated`; a corrupt frame fails it.
pub fn replay(path: &Path, limit: Option<u64>, store: &Store) -> Result<ReplayResult> {
    let mut reader = AofReader::open(path, limit)?;
    let mut entries_applied = 0;

    while let Some(entry) = reader.next_entry()? {
        store.apply(&entry)?;
        entries_applied += 1;
    }

    Ok(ReplayResult {
        entries_applied,
        valid_len: reader.position(),
        was_truncated: reader.is_torn(),
    })
}

/// Cut a torn tail off the log so new appends start on a frame boundary
pub fn truncate_torn_tail(path: &Path, result: &ReplayResult) -> Result<()> {
    if !result.was_truncated {
        return Ok(());
    }

    let file = OpenOptions::new().write(true).open(path)?;
    let before = file.metadata()?.len();
    file.set_len(result.valid_len)?;
    file.sync_all()?;

    tracing::warn!(
        path = %path.display(),
        discarded = before.saturating_sub(result.valid_len),
        "truncated partially written AOF tail"
    );
    Ok(())
}
