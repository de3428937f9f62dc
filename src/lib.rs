//! # segkv
//!
//! An embedded, append-only, segment-based key-value store with:
//! - A fixed little-endian binary frame per entry
//! - Crash recovery that replays segments and cuts partial tails
//! - A single serialized writer and bounded concurrent readers
//! - Size-based segment rotation
//! - Online background merging of sealed segments
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Datastore                             │
//! │            get / put / delete / compact / close              │
//! └──────────────┬─────────────────────────────┬────────────────┘
//!                │ put/delete                  │ get
//!                ▼                             ▼
//!      ┌───────────────────┐         ┌───────────────────┐
//!      │   Writer Task     │         │   Read Permits    │
//!      │ (channel, 1 only) │         │   (bounded, 8)    │
//!      └─────────┬─────────┘         └─────────┬─────────┘
//!                │                             │
//!                ▼                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SegmentManager                           │
//! │    active ─▶ sealed N ─▶ sealed N-1 ─▶ ... ─▶ merged         │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ sealed count > threshold
//!                               ▼
//!                     ┌───────────────────┐
//!                     │  Merge Task       │
//!                     │  (Compactor)      │
//!                     └───────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod segment;
pub mod storage;
pub mod permits;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvError, Result};
pub use config::{Config, SyncStrategy};
pub use engine::{Datastore, StoreStats};
pub use storage::MergeStats;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of segkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
