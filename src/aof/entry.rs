//! AOF Entry definitions
//!
//! Defines the structure of individual log entries and their on-disk frame.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};
use crate::store::now_millis;

/// Frame header: Len (4) + CRC (4)
pub const HEADER_SIZE: usize = 8;

/// Upper bound on a single frame payload; anything larger is corruption
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// A single entry in the AOF
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AofEntry {
    /// Database the operation targets
    pub db: u32,

    /// Timestamp (unix millis) when the entry was created
    pub timestamp_ms: u64,

    /// The operation to perform
    pub operation: Operation,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Set a string value (clears any expiration)
    Set { key: String, value: Vec<u8> },

    /// Delete keys
    Delete { keys: Vec<String> },

    /// Set an absolute expiration (unix millis)
    Expire { key: String, at_ms: u64 },

    /// Clear an expiration
    Persist { key: String },

    /// Append to the tail of a list
    RPush { key: String, values: Vec<Vec<u8>> },

    /// Prepend to the head of a list, one value at a time
    LPush { key: String, values: Vec<Vec<u8>> },

    SAdd { key: String, members: Vec<Vec<u8>> },

    SRem { key: String, members: Vec<Vec<u8>> },

    HSet { key: String, fields: Vec<(String, Vec<u8>)> },

    HDel { key: String, fields: Vec<String> },

    ZAdd { key: String, members: Vec<(String, f64)> },

    ZRem { key: String, members: Vec<String> },

    /// Drop every key in the database
    FlushDb,
}

impl AofEntry {
    /// Create an entry stamped with the current time
    pub fn new(db: u32, operation: Operation) -> Self {
        Self {
            db,
            timestamp_ms: now_millis(),
            operation,
        }
    }

    /// Serialize to a complete frame: [Len (4)][CRC (4)][payload]
    pub fn encode(&self) -> Result<Bytes> {
        let payload = bincode::serialize(self)?;
        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(DriftError::Serialization(format!(
                "AOF entry too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        frame.put_u32_le(payload.len() as u32);
        frame.put_u32_le(crc32fast::hash(&payload));
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Deserialize a payload whose CRC has already been checked
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(payload)?)
    }
}
