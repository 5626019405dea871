//! RDB Encoder
//!
//! Writes a snapshot as a strict call sequence:
//! `write_header` → `write_aux`* → (`write_db_header` → object writes)* →
//! `write_end`. Object writes per database must match the counts declared in
//! its header exactly.

use std::io::{self, Write};

use crate::error::{DriftError, Result};

use super::{
    WriteOption, ZSetEntry, COMPRESSION_LEVEL, COMPRESS_MIN_LEN, ENC_COMPRESSED, LEN_14BIT,
    LEN_32BIT, LEN_64BIT, LEN_SPECIAL, MAGIC, OPCODE_AUX, OPCODE_EOF, OPCODE_EXPIRETIME_MS,
    OPCODE_RESIZEDB, OPCODE_SELECTDB, TYPE_HASH, TYPE_LIST, TYPE_SET, TYPE_STRING, TYPE_ZSET,
    VERSION,
};

/// Where the encoder is in its call sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Nothing written yet
    Fresh,
    /// Header written, aux fields allowed
    Aux,
    /// Inside a database section
    Database { keys_left: u64, ttls_left: u64 },
    /// End marker written
    Ended,
}

/// Snapshot writer bound to an output stream
pub struct RdbEncoder<W: Write> {
    writer: CrcWriter<W>,
    compress: bool,
    stage: Stage,
}

impl<W: Write> RdbEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: CrcWriter::new(writer),
            compress: false,
            stage: Stage::Fresh,
        }
    }

    /// Toggle string compression. Only allowed before the header.
    pub fn set_compression(&mut self, enabled: bool) -> Result<()> {
        if self.stage != Stage::Fresh {
            return Err(misuse("compression must be chosen before the header"));
        }
        self.compress = enabled;
        Ok(())
    }

    pub fn compression_enabled(&self) -> bool {
        self.compress
    }

    /// Write the magic and version. Must be the first call.
    pub fn write_header(&mut self) -> Result<()> {
        if self.stage != Stage::Fresh {
            return Err(misuse("header written twice"));
        }
        self.writer.write_all(MAGIC)?;
        self.writer.write_all(VERSION)?;
        self.stage = Stage::Aux;
        Ok(())
    }

    /// Write one aux metadata field. Only between header and first database.
    pub fn write_aux(&mut self, key: &str, value: &str) -> Result<()> {
        if self.stage != Stage::Aux {
            return Err(misuse("aux fields must follow the header and precede databases"));
        }
        self.writer.write_all(&[OPCODE_AUX])?;
        self.write_string(key.as_bytes())?;
        self.write_string(value.as_bytes())?;
        Ok(())
    }

    /// Open a database section that will hold exactly `key_count` records,
    /// `ttl_count` of them carrying a TTL.
    pub fn write_db_header(&mut self, index: usize, key_count: u64, ttl_count: u64) -> Result<()> {
        match self.stage {
            Stage::Aux => {}
            Stage::Database { keys_left: 0, ttls_left: 0 } => {}
            Stage::Database { keys_left, .. } => {
                return Err(misuse(&format!(
                    "previous database still owes {} records",
                    keys_left
                )));
            }
            _ => return Err(misuse("database header outside the body")),
        }
        if ttl_count > key_count {
            return Err(misuse(&format!(
                "ttl count {} exceeds key count {}",
                ttl_count, key_count
            )));
        }

        self.writer.write_all(&[OPCODE_SELECTDB])?;
        self.write_len(index as u64)?;
        self.writer.write_all(&[OPCODE_RESIZEDB])?;
        self.write_len(key_count)?;
        self.write_len(ttl_count)?;

        self.stage = Stage::Database {
            keys_left: key_count,
            ttls_left: ttl_count,
        };
        Ok(())
    }

    pub fn write_string_object(&mut self, key: &str, value: &[u8], opts: &[WriteOption]) -> Result<()> {
        self.begin_object(key, TYPE_STRING, opts)?;
        self.write_string(value)
    }

    /// Write a list, preserving element order
    pub fn write_list_object<T: AsRef<[u8]>>(
        &mut self,
        key: &str,
        values: &[T],
        opts: &[WriteOption],
    ) -> Result<()> {
        self.begin_object(key, TYPE_LIST, opts)?;
        self.write_len(values.len() as u64)?;
        for value in values {
            self.write_string(value.as_ref())?;
        }
        Ok(())
    }

    pub fn write_set_object<T: AsRef<[u8]>>(
        &mut self,
        key: &str,
        members: &[T],
        opts: &[WriteOption],
    ) -> Result<()> {
        self.begin_object(key, TYPE_SET, opts)?;
        self.write_len(members.len() as u64)?;
        for member in members {
            self.write_string(member.as_ref())?;
        }
        Ok(())
    }

    pub fn write_hash_object<F: AsRef<str>, V: AsRef<[u8]>>(
        &mut self,
        key: &str,
        fields: &[(F, V)],
        opts: &[WriteOption],
    ) -> Result<()> {
        self.begin_object(key, TYPE_HASH, opts)?;
        self.write_len(fields.len() as u64)?;
        for (field, value) in fields {
            self.write_string(field.as_ref().as_bytes())?;
            self.write_string(value.as_ref())?;
        }
        Ok(())
    }

    /// Write a sorted set; entries are written in the order given
    pub fn write_zset_object(&mut self, key: &str, entries: &[ZSetEntry], opts: &[WriteOption]) -> Result<()> {
        self.begin_object(key, TYPE_ZSET, opts)?;
        self.write_len(entries.len() as u64)?;
        for entry in entries {
            self.write_string(entry.member.as_bytes())?;
            self.writer.write_all(&entry.score.to_le_bytes())?;
        }
        Ok(())
    }

    /// Write the end marker and checksum, then flush. Must be the last call.
    pub fn write_end(&mut self) -> Result<()> {
        match self.stage {
            Stage::Aux | Stage::Database { keys_left: 0, ttls_left: 0 } => {}
            Stage::Database { keys_left, .. } => {
                return Err(misuse(&format!(
                    "end written while the database still owes {} records",
                    keys_left
                )));
            }
            Stage::Fresh => return Err(misuse("end written before the header")),
            Stage::Ended => return Err(misuse("end written twice")),
        }

        self.writer.write_all(&[OPCODE_EOF])?;
        let crc = self.writer.checksum();
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.flush()?;
        self.stage = Stage::Ended;
        Ok(())
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer.inner
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Account for one record and write its prefix: [expire] type key
    fn begin_object(&mut self, key: &str, type_byte: u8, opts: &[WriteOption]) -> Result<()> {
        let ttl = opts.iter().map(|WriteOption::Ttl(at)| *at).last();

        let (keys_left, ttls_left) = match self.stage {
            Stage::Database { keys_left, ttls_left } => (keys_left, ttls_left),
            _ => return Err(misuse("object written outside a database section")),
        };
        if keys_left == 0 {
            return Err(misuse(&format!(
                "record '{}' exceeds the declared key count",
                key
            )));
        }
        let ttls_left = match ttl {
            Some(_) if ttls_left == 0 => {
                return Err(misuse(&format!(
                    "record '{}' exceeds the declared ttl count",
                    key
                )));
            }
            Some(_) => ttls_left - 1,
            // every remaining record would have to carry a ttl
            None if ttls_left == keys_left => {
                return Err(misuse(&format!(
                    "record '{}' lacks a ttl the header declared",
                    key
                )));
            }
            None => ttls_left,
        };
        self.stage = Stage::Database {
            keys_left: keys_left - 1,
            ttls_left,
        };

        if let Some(at) = ttl {
            self.writer.write_all(&[OPCODE_EXPIRETIME_MS])?;
            self.writer.write_all(&at.to_le_bytes())?;
        }
        self.writer.write_all(&[type_byte])?;
        self.write_string(key.as_bytes())
    }

    fn write_len(&mut self, len: u64) -> Result<()> {
        if len < 1 << 6 {
            self.writer.write_all(&[len as u8])?;
        } else if len < 1 << 14 {
            self.writer
                .write_all(&[(LEN_14BIT << 6) | (len >> 8) as u8, (len & 0xFF) as u8])?;
        } else if len <= u32::MAX as u64 {
            self.writer.write_all(&[LEN_32BIT])?;
            self.writer.write_all(&(len as u32).to_be_bytes())?;
        } else {
            self.writer.write_all(&[LEN_64BIT])?;
            self.writer.write_all(&len.to_be_bytes())?;
        }
        Ok(())
    }

    fn write_string(&mut self, data: &[u8]) -> Result<()> {
        if self.compress && data.len() > COMPRESS_MIN_LEN {
            let compressed = zstd::bulk::compress(data, COMPRESSION_LEVEL)?;
            if compressed.len() < data.len() {
                self.writer.write_all(&[(LEN_SPECIAL << 6) | ENC_COMPRESSED])?;
                self.write_len(compressed.len() as u64)?;
                self.write_len(data.len() as u64)?;
                self.writer.write_all(&compressed)?;
                return Ok(());
            }
        }
        self.write_len(data.len() as u64)?;
        self.writer.write_all(data)?;
        Ok(())
    }
}

fn misuse(message: &str) -> DriftError {
    DriftError::EncoderState(message.to_string())
}

/// Writer that checksums everything passing through it
struct CrcWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
