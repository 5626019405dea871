//! Append-Only File (AOF) Module
//!
//! The source of truth for crash recovery and the input of every rewrite.
//!
//! ## Responsibilities
//! - Append framed entries, fsyncing per the configured strategy
//! - CRC32 checksums for corruption detection
//! - Byte-bounded replay shared by recovery and rewrite
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Frame 1                                 │
//! │ ┌─────────┬─────────┬─────────────────┐ │
//! │ │ Len (4) │ CRC (4) │ bincode(entry)  │ │
//! │ └─────────┴─────────┴─────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Frame 2                                 │
//! │ ┌─────────┬─────────┬─────────────────┐ │
//! │ │ Len (4) │ CRC (4) │ bincode(entry)  │ │
//! │ └─────────┴─────────┴─────────────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Len and CRC are little-endian; the CRC covers the payload only.

mod entry;
mod reader;
mod replay;
mod writer;

pub use entry::{AofEntry, Operation, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use reader::{AofIterator, AofReader};
pub use replay::{replay, truncate_torn_tail, ReplayResult};
pub use writer::{AofWriter, LogFile};
