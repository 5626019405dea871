//! AOF Writer
//!
//! Handles appending framed entries to the log file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::AofSyncStrategy;
use crate::error::{DriftError, Result};

use super::AofEntry;

/// File operations the writer relies on
pub trait LogFile: Write + Send {
    /// Flush file contents to stable storage
    fn sync(&mut self) -> io::Result<()>;

    /// Cut the file back to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Appends entries to the AOF file
///
/// Frames go straight to the file (no userspace buffer), so the bytes
/// returned from `write` are exactly the bytes now in the log.
///
/// ## Failure handling
/// - A failed write is rolled back to the previous length, so the log never
///   holds half a frame in its middle
/// - A failed fsync leaves the frame in the log and poisons the writer:
///   every later write or sync is refused with `AofUnavailable`
pub struct AofWriter {
    file: Box<dyn LogFile>,
    path: PathBuf,
    sync_strategy: AofSyncStrategy,
    /// Entries written since the last fsync
    unsynced: usize,
    /// Current file length in bytes
    len: u64,
    /// Why the writer stopped accepting appends
    poisoned: Option<String>,
}

impl AofWriter {
    /// Open or create an AOF file for appending
    pub fn open(path: &Path, sync_strategy: AofSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::with_file(file, path, sync_strategy, len))
    }

    /// Wrap an already-open log whose current length is `len`
    pub fn with_file(
        file: impl LogFile + 'static,
        path: impl Into<PathBuf>,
        sync_strategy: AofSyncStrategy,
        len: u64,
    ) -> Self {
        Self {
            file: Box::new(file),
            path: path.into(),
            sync_strategy,
            unsynced: 0,
            len,
            poisoned: None,
        }
    }

    /// Write an entry and fsync if the strategy says one is due.
    ///
    /// Returns the frame exactly as written. An `AofSync` error means the
    /// frame is in the log but may not be durable.
    pub fn append(&mut self, entry: &AofEntry) -> Result<Bytes> {
        let frame = self.write(entry)?;
        self.sync_if_due()?;
        Ok(frame)
    }

    /// Write an entry without syncing; on error nothing was logged
    pub fn write(&mut self, entry: &AofEntry) -> Result<Bytes> {
        let frame = entry.encode()?;
        self.write_frame(&frame)?;
        Ok(frame)
    }

    /// Write an already-encoded frame without syncing
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.ensure_usable()?;

        if let Err(e) = self.file.write_all(frame) {
            self.roll_back();
            return Err(e.into());
        }
        self.len += frame.len() as u64;
        self.unsynced += 1;
        Ok(())
    }

    /// fsync if enough entries are pending
    pub fn sync_if_due(&mut self) -> Result<()> {
        let due = match self.sync_strategy {
            AofSyncStrategy::EveryWrite => self.unsynced > 0,
            AofSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    /// Force everything written so far onto stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_usable()?;

        match self.file.flush().and_then(|_| self.file.sync()) {
            Ok(()) => {
                self.unsynced = 0;
                Ok(())
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "AOF fsync failed, refusing further appends");
                self.poisoned = Some(format!("earlier fsync failed: {}", e));
                Err(DriftError::AofSync(e))
            }
        }
    }

    /// Bytes in the log, including unsynced ones
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries written since the last fsync
    pub fn unsynced(&self) -> usize {
        self.unsynced
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(DriftError::AofUnavailable(reason.clone())),
            None => Ok(()),
        }
    }

    /// Drop a partially written frame; poison the writer if that fails too
    fn roll_back(&mut self) {
        if let Err(e) = self.file.truncate(self.len) {
            tracing::error!(path = %self.path.display(), error = %e, "could not roll back partial AOF frame");
            self.poisoned = Some(format!("partial frame left at offset {}: {}", self.len, e));
        } else {
            tracing::warn!(path = %self.path.display(), len = self.len, "rolled back partial AOF frame");
        }
    }
}
