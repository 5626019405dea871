//! Rewrite coordinator
//!
//! Turns the AOF into an RDB snapshot without stopping writers.
//!
//! ## Pipeline
//! ```text
//! Idle → Pausing → BoundaryCaptured → Replaying → Encoding → Publishing → Idle
//!            └──────────────┴─────────────┴───────────┴───────────┴──→ Aborted → Idle
//! ```
//!
//! ## Locking
//! - `state` is the pause lock. Appends take it for every frame; a rewrite
//!   takes it only for fsync + boundary capture + temp file + listener
//!   registration + hook.
//! - `rewrite_lock` is held for the whole pipeline, so at most one rewrite
//!   runs at a time and a second caller waits for the first to finish.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::aof::{self, AofEntry, AofWriter};
use crate::config::Config;
use crate::error::{DriftError, Result};
use crate::rdb::RdbEncoder;
use crate::store::Store;

use super::adapter;
use super::listener::{AofListener, ListenerId, ListenerRegistry};

/// Compatibility version advertised in the `redis-ver` aux field
pub const RDB_COMPAT_VERSION: &str = "6.0.0";

/// Where the coordinator is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewritePhase {
    Idle,
    Pausing,
    BoundaryCaptured,
    Replaying,
    Encoding,
    Publishing,
    Aborted,
}

/// What a successful rewrite produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// AOF length captured in the pause window
    pub boundary: u64,

    /// Records written to the snapshot
    pub keys_written: u64,

    /// Registration of the replication listener, if one was supplied
    pub listener: Option<ListenerId>,
}

/// State of an in-flight rewrite, owned by it alone
struct RewriteContext {
    tmp_file: NamedTempFile,
    boundary: u64,
}

impl RewriteContext {
    /// fsync, close and rename onto `target`; the rename is the only
    /// mutation of `target`
    fn publish(self, target: &Path) -> Result<()> {
        self.tmp_file.as_file().sync_all()?;
        let file = self.tmp_file.persist(target).map_err(|e| DriftError::Io(e.error))?;
        drop(file);
        super::sync_parent_dir(target);
        Ok(())
    }
}

/// Pause-lock protected state
struct AofState {
    writer: AofWriter,
    listeners: ListenerRegistry,
}

/// Owns the AOF and coordinates rewrites into snapshots
pub struct Persister {
    aof_path: PathBuf,
    databases: usize,
    compression: bool,
    scratch_dir: Option<PathBuf>,

    /// Pause lock: AOF writer + listener registry
    state: Mutex<AofState>,

    /// Held for the full duration of a rewrite
    rewrite_lock: Mutex<()>,

    phase: Mutex<RewritePhase>,

    /// Stage at which the next rewrites fail
    #[cfg(test)]
    fail_on_enter: Mutex<Option<RewritePhase>>,
}

impl Persister {
    /// Open or create the AOF described by `config`
    pub fn open(config: &Config) -> Result<Self> {
        let writer = AofWriter::open(&config.aof_path(), config.aof_sync_strategy)?;
        Ok(Self::with_writer(config, writer))
    }

    /// Build around an already-open writer for `config.aof_path()`
    pub fn with_writer(config: &Config, writer: AofWriter) -> Self {
        Self {
            aof_path: config.aof_path(),
            databases: config.databases,
            compression: config.rdb_compression,
            scratch_dir: config.rewrite_scratch_dir.clone(),
            state: Mutex::new(AofState {
                writer,
                listeners: ListenerRegistry::new(),
            }),
            rewrite_lock: Mutex::new(()),
            phase: Mutex::new(RewritePhase::Idle),
            #[cfg(test)]
            fail_on_enter: Mutex::new(None),
        }
    }

    // =========================================================================
    // Log Appends
    // =========================================================================

    /// Append one entry and feed its frame to every listener.
    ///
    /// Returns the AOF length after the append. Every frame that reaches
    /// the log reaches the listeners, even when the fsync after it fails;
    /// that case returns `AofSync` and the writer refuses further appends.
    pub fn append(&self, entry: &AofEntry) -> Result<u64> {
        let mut state = self.state.lock();
        let frame = state.writer.write(entry)?;
        state.listeners.broadcast(&frame);
        state.writer.sync_if_due()?;
        Ok(state.writer.len())
    }

    /// Force the AOF onto stable storage
    pub fn sync(&self) -> Result<()> {
        self.state.lock().writer.sync()
    }

    pub fn aof_len(&self) -> u64 {
        self.state.lock().writer.len()
    }

    pub fn aof_path(&self) -> &Path {
        &self.aof_path
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Deregister a replication listener. Returns true if it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.state.lock().listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    // =========================================================================
    // Rewrite
    // =========================================================================

    pub fn phase(&self) -> RewritePhase {
        *self.phase.lock()
    }

    /// Rewrite the AOF into a snapshot at `target`.
    ///
    /// Blocks until `target` has been atomically replaced or an error is
    /// returned; on error `target` is untouched.
    pub fn snapshot(&self, target: &Path) -> Result<RewriteOutcome> {
        self.rewrite(target, None, None::<fn()>)
    }

    /// Like `snapshot`, but registers `listener` and runs `hook` inside the
    /// pause window. The listener's first chunk is the first frame appended
    /// after the captured boundary. If the rewrite fails the listener is
    /// deregistered again.
    pub fn snapshot_for_replication<F>(
        &self,
        target: &Path,
        listener: Arc<dyn AofListener>,
        hook: F,
    ) -> Result<RewriteOutcome>
    where
        F: FnOnce(),
    {
        self.rewrite(target, Some(listener), Some(hook))
    }

    fn rewrite<F: FnOnce()>(
        &self,
        target: &Path,
        listener: Option<Arc<dyn AofListener>>,
        hook: Option<F>,
    ) -> Result<RewriteOutcome> {
        let _exclusive = self.rewrite_lock.lock();
        let started = Instant::now();
        tracing::info!(target = %target.display(), "starting AOF rewrite");

        let (ctx, listener_id) = match self.start_rewrite(target, listener, hook) {
            Ok(started) => started,
            Err(e) => return Err(self.abort(e, None)),
        };
        let boundary = ctx.boundary;

        match self.finish_rewrite(ctx, target) {
            Ok(keys_written) => {
                self.set_phase(RewritePhase::Idle);
                tracing::info!(
                    target = %target.display(),
                    boundary,
                    keys = keys_written,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "AOF rewrite complete"
                );
                Ok(RewriteOutcome {
                    boundary,
                    keys_written,
                    listener: listener_id,
                })
            }
            Err(e) => Err(self.abort(e, listener_id)),
        }
    }

    /// The pause window: everything here happens under the pause lock
    fn start_rewrite<F: FnOnce()>(
        &self,
        target: &Path,
        listener: Option<Arc<dyn AofListener>>,
        hook: Option<F>,
    ) -> Result<(RewriteContext, Option<ListenerId>)> {
        let mut state = self.state.lock();
        self.enter(RewritePhase::Pausing)?;

        if let Err(e) = state.writer.sync() {
            tracing::warn!(error = %e, "AOF fsync failed");
            return Err(e);
        }

        let boundary = fs::metadata(&self.aof_path)?.len();

        let scratch = self.scratch_dir_for(target);
        let tmp_file = tempfile::Builder::new()
            .prefix(".rewrite-")
            .suffix(".rdb.tmp")
            .tempfile_in(&scratch)
            .map_err(|e| {
                tracing::warn!(dir = %scratch.display(), error = %e, "temp file creation failed");
                e
            })?;

        let listener_id = listener.map(|l| state.listeners.register(l));
        if let Some(hook) = hook {
            hook();
        }

        self.set_phase(RewritePhase::BoundaryCaptured);
        tracing::debug!(boundary, "captured AOF boundary");
        Ok((RewriteContext { tmp_file, boundary }, listener_id))
    }

    /// Replay, encode and publish, outside the pause lock
    fn finish_rewrite(&self, ctx: RewriteContext, target: &Path) -> Result<u64> {
        self.enter(RewritePhase::Replaying)?;
        let private = Store::new(self.databases);
        let replayed = aof::replay(&self.aof_path, Some(ctx.boundary), &private)?;
        if replayed.was_truncated || replayed.valid_len != ctx.boundary {
            return Err(DriftError::AofCorruption(format!(
                "replay stopped at {} of {} durable bytes",
                replayed.valid_len, ctx.boundary
            )));
        }
        tracing::debug!(entries = replayed.entries_applied, "replayed AOF prefix");

        self.enter(RewritePhase::Encoding)?;
        let keys_written = self.encode(&private, ctx.tmp_file.as_file())?;

        self.enter(RewritePhase::Publishing)?;
        ctx.publish(target)?;
        Ok(keys_written)
    }

    /// Serialize `store` into `file`, returning the record count
    fn encode(&self, store: &Store, file: &File) -> Result<u64> {
        let mut encoder = RdbEncoder::new(BufWriter::new(file));
        encoder.set_compression(self.compression)?;
        encoder.write_header()?;
        for (key, value) in aux_fields() {
            encoder.write_aux(key, &value)?;
        }

        let mut written = 0u64;
        for index in 0..store.database_count() {
            let db = store.db(index)?;
            let (key_count, ttl_count) = db.size();
            if key_count == 0 {
                continue;
            }
            encoder.write_db_header(index, key_count as u64, ttl_count as u64)?;
            db.for_each(|key, entity| {
                adapter::write_entity(&mut encoder, key, entity)?;
                written += 1;
                Ok::<(), DriftError>(())
            })?;
        }

        encoder.write_end()?;
        Ok(written)
    }

    /// Record the failure, undo the listener registration, return to Idle
    fn abort(&self, err: DriftError, listener: Option<ListenerId>) -> DriftError {
        let failed_in = self.phase();
        self.set_phase(RewritePhase::Aborted);
        if let Some(id) = listener {
            self.remove_listener(id);
        }
        tracing::warn!(phase = ?failed_in, error = %err, "AOF rewrite aborted");
        self.set_phase(RewritePhase::Idle);
        err
    }

    /// Move to a pipeline stage that may fail
    fn enter(&self, phase: RewritePhase) -> Result<()> {
        self.set_phase(phase);
        self.injected_failure(phase)
    }

    #[cfg(test)]
    fn injected_failure(&self, phase: RewritePhase) -> Result<()> {
        if *self.fail_on_enter.lock() == Some(phase) {
            return Err(DriftError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected failure entering {:?}", phase),
            )));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_failure(&self, _phase: RewritePhase) -> Result<()> {
        Ok(())
    }

    fn set_phase(&self, phase: RewritePhase) {
        *self.phase.lock() = phase;
        tracing::debug!(?phase, "rewrite phase");
    }

    /// Configured scratch dir, else the target's own directory
    fn scratch_dir_for(&self, target: &Path) -> PathBuf {
        if let Some(dir) = &self.scratch_dir {
            return dir.clone();
        }
        match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Descriptive metadata written into every snapshot
fn aux_fields() -> Vec<(&'static str, String)> {
    let ctime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    vec![
        ("redis-ver", RDB_COMPAT_VERSION.to_string()),
        ("redis-bits", "64".to_string()),
        ("aof-preamble", "0".to_string()),
        ("ctime", ctime.to_string()),
        ("drift-ver", crate::VERSION.to_string()),
    ]
}
