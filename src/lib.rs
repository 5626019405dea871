//! # DriftKV
//!
//! An in-memory key-value store with:
//! - An append-only file (AOF) as the source of truth
//! - AOF → RDB rewrites that never stop writers and never leave a
//!   half-written snapshot behind
//! - Replication handoff: a listener registered during a rewrite sees
//!   exactly the writes after the snapshot boundary
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │              (check → append → apply, SWMR)                 │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!   ┌─────────────────────────┐        ┌─────────────────┐
//!   │        Persister        │        │   Live Store    │
//!   │ AOF writer + listeners  │        │  (RwLock / db)  │
//!   │     (pause lock)        │        └─────────────────┘
//!   └────────────┬────────────┘
//!                │ rewrite
//!                ▼
//!   replay [0, boundary) → private Store → adapters → RdbEncoder
//!                                                        │
//!                                   temp file ── rename ─▶ dump.rdb
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod aof;
pub mod store;
pub mod rdb;
pub mod persist;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DriftError, Result};
pub use config::Config;
pub use engine::Engine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of DriftKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
