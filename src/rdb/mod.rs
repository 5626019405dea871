//! RDB Module
//!
//! Point-in-time binary snapshot format. The encoder and decoder know
//! nothing about the store; callers feed them primitive record shapes.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header: "DRIFTRDB" (8) | Version: "0001" (4, ASCII)          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Aux fields, repeated                                         │
//! │   0xFA <string key> <string value>                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Database section, repeated per non-empty database            │
//! │   0xFE <len index>                                           │
//! │   0xFB <len key-count> <len ttl-count>                       │
//! │   record × key-count:                                        │
//! │     [0xFC <u64 LE expire ms>] <type (1)> <string key> <body> │
//! ├──────────────────────────────────────────────────────────────┤
//! │ 0xFF | CRC32 of every preceding byte (4, LE)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Lengths
//! - `00xxxxxx`: 6-bit length
//! - `01xxxxxx xxxxxxxx`: 14-bit length
//! - `0x80` + u32 BE, `0x81` + u64 BE
//!
//! ### Strings
//! `<len> <bytes>`, or `0xC3 <len compressed> <len original> <zstd bytes>`
//! when compression is on and pays off.
//!
//! ### Bodies
//! - string: `<string>`
//! - list / set: `<len n>` then n strings
//! - hash: `<len n>` then n (field, value) string pairs
//! - zset: `<len n>` then n (member string, score as f64 LE bits)

mod decoder;
mod encoder;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub use decoder::{RdbDatabase, RdbDecoder, RdbRecord, RdbSnapshot, RdbValue};
pub use encoder::RdbEncoder;

use crate::error::Result;

// =============================================================================
// Shared Constants (used by encoder and decoder)
// =============================================================================

/// Magic bytes opening every snapshot
pub(crate) const MAGIC: &[u8; 8] = b"DRIFTRDB";

/// Format version, written as four ASCII digits
pub(crate) const VERSION: &[u8; 4] = b"0001";

pub(crate) const OPCODE_AUX: u8 = 0xFA;
pub(crate) const OPCODE_RESIZEDB: u8 = 0xFB;
pub(crate) const OPCODE_EXPIRETIME_MS: u8 = 0xFC;
pub(crate) const OPCODE_SELECTDB: u8 = 0xFE;
pub(crate) const OPCODE_EOF: u8 = 0xFF;

pub(crate) const TYPE_STRING: u8 = 0;
pub(crate) const TYPE_LIST: u8 = 1;
pub(crate) const TYPE_SET: u8 = 2;
pub(crate) const TYPE_HASH: u8 = 4;
pub(crate) const TYPE_ZSET: u8 = 5;

pub(crate) const LEN_6BIT: u8 = 0;
pub(crate) const LEN_14BIT: u8 = 1;
pub(crate) const LEN_32BIT: u8 = 0x80;
pub(crate) const LEN_64BIT: u8 = 0x81;
/// Top two bits set: special string encoding follows in the low six
pub(crate) const LEN_SPECIAL: u8 = 3;
pub(crate) const ENC_COMPRESSED: u8 = 3;

/// Strings at or below this size are never compressed
pub(crate) const COMPRESS_MIN_LEN: usize = 20;

pub(crate) const COMPRESSION_LEVEL: i32 = 3;

// =============================================================================
// Record Shapes
// =============================================================================

/// One sorted-set element
#[derive(Debug, Clone, PartialEq)]
pub struct ZSetEntry {
    pub member: String,
    pub score: f64,
}

impl ZSetEntry {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Per-record write options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOption {
    /// Absolute expiration, unix millis
    Ttl(u64),
}

/// Decode the snapshot at `path`
pub fn load(path: &Path) -> Result<RdbSnapshot> {
    let file = File::open(path)?;
    RdbDecoder::new(BufReader::new(file)).decode()
}
