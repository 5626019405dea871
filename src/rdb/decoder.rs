//! RDB Decoder
//!
//! Reads a snapshot back into plain record shapes, checking framing,
//! declared per-database counts and the trailing checksum.

use std::collections::HashMap;
use std::io::{self, Read};

use crate::error::{DriftError, Result};

use super::{
    ZSetEntry, ENC_COMPRESSED, LEN_14BIT, LEN_32BIT, LEN_64BIT, LEN_6BIT, LEN_SPECIAL, MAGIC,
    OPCODE_AUX, OPCODE_EOF, OPCODE_EXPIRETIME_MS, OPCODE_RESIZEDB, OPCODE_SELECTDB, TYPE_HASH,
    TYPE_LIST, TYPE_SET, TYPE_STRING, TYPE_ZSET, VERSION,
};

/// Preallocation cap for element counts read from the file
const MAX_PREALLOC: usize = 1024;

/// A decoded value body
#[derive(Debug, Clone, PartialEq)]
pub enum RdbValue {
    String(Vec<u8>),
    List(Vec<Vec<u8>>),
    Set(Vec<Vec<u8>>),
    Hash(Vec<(String, Vec<u8>)>),
    ZSet(Vec<ZSetEntry>),
}

/// One key record
#[derive(Debug, Clone, PartialEq)]
pub struct RdbRecord {
    pub key: String,
    pub value: RdbValue,
    /// Absolute expiration, unix millis
    pub expires_at: Option<u64>,
}

/// One database section
#[derive(Debug, Clone, PartialEq)]
pub struct RdbDatabase {
    pub index: usize,
    pub key_count: u64,
    pub ttl_count: u64,
    pub records: Vec<RdbRecord>,
}

/// A whole decoded snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RdbSnapshot {
    pub aux: HashMap<String, String>,
    pub databases: Vec<RdbDatabase>,
}

impl RdbSnapshot {
    /// Total records across all databases
    pub fn record_count(&self) -> usize {
        self.databases.iter().map(|db| db.records.len()).sum()
    }

    pub fn database(&self, index: usize) -> Option<&RdbDatabase> {
        self.databases.iter().find(|db| db.index == index)
    }
}

/// Snapshot reader over an input stream
pub struct RdbDecoder<R: Read> {
    reader: CrcReader<R>,
}

impl<R: Read> RdbDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: CrcReader::new(reader),
        }
    }

    /// Decode the full snapshot
    pub fn decode(mut self) -> Result<RdbSnapshot> {
        self.read_header()?;

        let mut snapshot = RdbSnapshot::default();
        let mut current: Option<RdbDatabase> = None;

        loop {
            let opcode = self.read_u8()?;
            match opcode {
                OPCODE_AUX => {
                    if current.is_some() {
                        return Err(corrupt("aux field inside a database section"));
                    }
                    let key = self.read_utf8()?;
                    let value = self.read_utf8()?;
                    snapshot.aux.insert(key, value);
                }
                OPCODE_SELECTDB => {
                    if let Some(db) = current.take() {
                        snapshot.databases.push(finish_database(db)?);
                    }
                    let index = self.read_len()? as usize;
                    if self.read_u8()? != OPCODE_RESIZEDB {
                        return Err(corrupt("database selector without counts"));
                    }
                    let key_count = self.read_len()?;
                    let ttl_count = self.read_len()?;
                    current = Some(RdbDatabase {
                        index,
                        key_count,
                        ttl_count,
                        records: Vec::with_capacity((key_count as usize).min(MAX_PREALLOC)),
                    });
                }
                OPCODE_EOF => {
                    if let Some(db) = current.take() {
                        snapshot.databases.push(finish_database(db)?);
                    }
                    let expected = self.reader.checksum();
                    let mut stored = [0u8; 4];
                    read_exact(&mut self.reader.inner, &mut stored)?;
                    let stored = u32::from_le_bytes(stored);
                    if stored != expected {
                        return Err(corrupt(&format!(
                            "checksum mismatch: stored {:#010x}, computed {:#010x}",
                            stored, expected
                        )));
                    }
                    return Ok(snapshot);
                }
                _ => {
                    let db = current
                        .as_mut()
                        .ok_or_else(|| corrupt("record outside a database section"))?;
                    let (expires_at, type_byte) = if opcode == OPCODE_EXPIRETIME_MS {
                        let mut at = [0u8; 8];
                        self.read_bytes(&mut at)?;
                        (Some(u64::from_le_bytes(at)), self.read_u8()?)
                    } else {
                        (None, opcode)
                    };
                    let key = self.read_utf8()?;
                    let value = self.read_value(type_byte)?;
                    db.records.push(RdbRecord {
                        key,
                        value,
                        expires_at,
                    });
                }
            }
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_header(&mut self) -> Result<()> {
        let mut header = [0u8; 12];
        self.read_bytes(&mut header)?;
        if &header[0..8] != MAGIC {
            return Err(corrupt(&format!(
                "invalid magic: expected DRIFTRDB, got {:?}",
                &header[0..8]
            )));
        }
        if &header[8..12] != VERSION {
            return Err(corrupt(&format!(
                "unsupported version: {}",
                String::from_utf8_lossy(&header[8..12])
            )));
        }
        Ok(())
    }

    fn read_value(&mut self, type_byte: u8) -> Result<RdbValue> {
        let value = match type_byte {
            TYPE_STRING => RdbValue::String(self.read_string()?),
            TYPE_LIST | TYPE_SET => {
                let count = self.read_len()?;
                let mut items = Vec::with_capacity((count as usize).min(MAX_PREALLOC));
                for _ in 0..count {
                    items.push(self.read_string()?);
                }
                if type_byte == TYPE_LIST {
                    RdbValue::List(items)
                } else {
                    RdbValue::Set(items)
                }
            }
            TYPE_HASH => {
                let count = self.read_len()?;
                let mut fields = Vec::with_capacity((count as usize).min(MAX_PREALLOC));
                for _ in 0..count {
                    let field = self.read_utf8()?;
                    let value = self.read_string()?;
                    fields.push((field, value));
                }
                RdbValue::Hash(fields)
            }
            TYPE_ZSET => {
                let count = self.read_len()?;
                let mut entries = Vec::with_capacity((count as usize).min(MAX_PREALLOC));
                for _ in 0..count {
                    let member = self.read_utf8()?;
                    let mut score = [0u8; 8];
                    self.read_bytes(&mut score)?;
                    let score = f64::from_le_bytes(score);
                    if !score.is_finite() {
                        return Err(corrupt(&format!("non-finite score for member '{}'", member)));
                    }
                    entries.push(ZSetEntry::new(member, score));
                }
                RdbValue::ZSet(entries)
            }
            other => return Err(corrupt(&format!("unknown value type {}", other))),
        };
        Ok(value)
    }

    fn read_len(&mut self) -> Result<u64> {
        let first = self.read_u8()?;
        match self.read_len_after(first)? {
            Some(len) => Ok(len),
            None => Err(corrupt("special string encoding where a length was expected")),
        }
    }

    /// Decode a length given its first byte; `None` flags a special encoding
    fn read_len_after(&mut self, first: u8) -> Result<Option<u64>> {
        let len = match first >> 6 {
            LEN_6BIT => (first & 0x3F) as u64,
            LEN_14BIT => (((first & 0x3F) as u64) << 8) | self.read_u8()? as u64,
            LEN_SPECIAL => return Ok(None),
            _ => match first {
                LEN_32BIT => {
                    let mut buf = [0u8; 4];
                    self.read_bytes(&mut buf)?;
                    u32::from_be_bytes(buf) as u64
                }
                LEN_64BIT => {
                    let mut buf = [0u8; 8];
                    self.read_bytes(&mut buf)?;
                    u64::from_be_bytes(buf)
                }
                other => return Err(corrupt(&format!("invalid length prefix {:#04x}", other))),
            },
        };
        Ok(Some(len))
    }

    fn read_string(&mut self) -> Result<Vec<u8>> {
        let first = self.read_u8()?;
        match self.read_len_after(first)? {
            Some(len) => self.read_vec(len),
            None if first & 0x3F == ENC_COMPRESSED => {
                let compressed_len = self.read_len()?;
                let original_len = self.read_len()?;
                let compressed = self.read_vec(compressed_len)?;
                let data = inflate(&compressed, original_len)?;
                if data.len() as u64 != original_len {
                    return Err(corrupt(&format!(
                        "compressed string inflated to {} bytes, header said {}",
                        data.len(),
                        original_len
                    )));
                }
                Ok(data)
            }
            None => Err(corrupt(&format!("unknown string encoding {:#04x}", first))),
        }
    }

    fn read_utf8(&mut self) -> Result<String> {
        String::from_utf8(self.read_string()?).map_err(|e| corrupt(&format!("invalid UTF-8: {}", e)))
    }

    /// Read `len` bytes without trusting `len` for allocation
    fn read_vec(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity((len as usize).min(64 * 1024));
        (&mut self.reader).take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(corrupt("unexpected end of file"));
        }
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_bytes(&mut byte)?;
        Ok(byte[0])
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        read_exact(&mut self.reader, buf)
    }
}

/// Decompress a zstd string, growing the buffer only as output arrives.
///
/// Reads at most one byte past `original_len` so an overlong stream is
/// detected without inflating all of it.
fn inflate(compressed: &[u8], original_len: u64) -> Result<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::new(compressed)
        .map_err(|e| corrupt(&format!("bad compressed string: {}", e)))?;
    let mut data = Vec::with_capacity((original_len as usize).min(64 * 1024));
    decoder
        .take(original_len.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|e| corrupt(&format!("bad compressed string: {}", e)))?;
    Ok(data)
}

/// Check a finished section against its declared counts
fn finish_database(db: RdbDatabase) -> Result<RdbDatabase> {
    let ttl_records = db.records.iter().filter(|r| r.expires_at.is_some()).count() as u64;
    if db.records.len() as u64 != db.key_count || ttl_records != db.ttl_count {
        return Err(corrupt(&format!(
            "database {} declares {} keys / {} ttls, found {} / {}",
            db.index,
            db.key_count,
            db.ttl_count,
            db.records.len(),
            ttl_records
        )));
    }
    Ok(db)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => corrupt("unexpected end of file"),
        _ => DriftError::Io(e),
    })
}

fn corrupt(message: &str) -> DriftError {
    DriftError::RdbCorruption(message.to_string())
}

/// Reader that checksums everything passing through it
struct CrcReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> CrcReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
