//! AOF Reader
//!
//! Reads framed entries from the start of the log, optionally stopping at a
//! byte boundary.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{DriftError, Result};

use super::entry::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
use super::AofEntry;

/// Reads entries from an AOF stream
pub struct AofReader<R> {
    inner: R,
    /// Offset of the next unread frame
    position: u64,
    /// Never read at or past this offset
    limit: Option<u64>,
    /// Set once a frame was found cut short by EOF
    torn: bool,
}

impl AofReader<BufReader<File>> {
    /// Open an AOF file for reading up to `limit` bytes (whole file if `None`)
    pub fn open(path: &Path, limit: Option<u64>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), limit))
    }
}

impl<R: Read> AofReader<R> {
    pub fn new(inner: R, limit: Option<u64>) -> Self {
        Self {
            inner,
            position: 0,
            limit,
            torn: false,
        }
    }

    /// Read the next entry.
    ///
    /// Returns `Ok(None)` at a clean end of log, at the limit, or at a torn
    /// final frame (see `is_torn`). A checksum mismatch is an error.
    pub fn next_entry(&mut self) -> Result<Option<AofEntry>> {
        if self.torn || self.limit.is_some_and(|limit| self.position >= limit) {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE];
        let n = read_full(&mut self.inner, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_SIZE {
            self.torn = true;
            return Ok(None);
        }

        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if len > MAX_PAYLOAD_SIZE {
            return Err(DriftError::AofCorruption(format!(
                "frame at offset {} declares {} bytes (max {})",
                self.position, len, MAX_PAYLOAD_SIZE
            )));
        }

        let frame_end = self.position + (HEADER_SIZE as u64) + len as u64;
        if let Some(limit) = self.limit {
            if frame_end > limit {
                return Err(DriftError::AofCorruption(format!(
                    "frame at offset {} crosses the read boundary {}",
                    self.position, limit
                )));
            }
        }

        let mut payload = vec![0u8; len as usize];
        if read_full(&mut self.inner, &mut payload)? < payload.len() {
            self.torn = true;
            return Ok(None);
        }

        if crc32fast::hash(&payload) != crc {
            return Err(DriftError::AofCorruption(format!(
                "CRC mismatch in frame at offset {}",
                self.position
            )));
        }

        let entry = AofEntry::decode_payload(&payload)?;
        self.position = frame_end;
        Ok(Some(entry))
    }

    /// Offset just past the last complete frame read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether reading stopped at a partially written frame
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    /// Iterate over the remaining entries
    pub fn entries(self) -> AofIterator<R> {
        AofIterator { reader: self }
    }
}

/// Iterator over AOF entries
pub struct AofIterator<R> {
    reader: AofReader<R>,
}

impl<R: Read> Iterator for AofIterator<R> {
    type Item = Result<AofEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_entry().transpose()
    }
}

/// Fill `buf` as far as the stream allows, returning the byte count
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
