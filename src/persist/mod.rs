//! Persistence Module
//!
//! Owns the AOF at runtime and compacts it into RDB snapshots.
//!
//! ## Responsibilities
//! - Serialize appends and fan them out to replication listeners
//! - Rewrite the AOF into a snapshot: pause, capture the boundary, replay
//!   the durable prefix into a private store, encode, rename into place
//! - Convert between stored values and snapshot/log shapes
//! - Restore snapshots at startup

use std::fs::File;
use std::path::Path;

pub mod adapter;
mod listener;
mod loader;
mod rewrite;

pub use listener::{AofListener, ChannelListener, ListenerId, ListenerRegistry};
pub use loader::{load_snapshot, restore_snapshot, seed_aof};
pub use rewrite::{Persister, RewriteOutcome, RewritePhase, RDB_COMPAT_VERSION};

/// Best-effort fsync of the directory holding `path`, so a rename into it
/// survives a crash
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            tracing::debug!(dir = %parent.display(), error = %e, "could not fsync directory");
        }
    }
}
