//! # tidelog
//!
//! A persistent, memory-mapped message queue with:
//! - One segment file per time cycle, rolled by the wall clock
//! - 64-bit indexes packing `(cycle, sequence)`
//! - Lock-free record reservation shared across processes (CAS on a
//!   header word in the mapped file)
//! - Sparse coarse index for random access by index
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │       Appender       │        │       Tailer(s)      │
//! │ roll check, reserve, │        │ cursor, EOF -> next  │
//! │ publish              │        │ cycle, move_to_index │
//! └──────────┬───────────┘        └───────────┬──────────┘
//!            │                                │
//! ┌──────────▼────────────────────────────────▼──────────┐
//! │                    QueueDirector                     │
//! │   RollCycle + ResourceNameCache: cycle <-> file      │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//!   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//!   │SegmentStore │   │SegmentStore │   │SegmentStore │
//!   │  (mmap)     │   │  (mmap)     │   │  (mmap)     │
//!   │ header, EOF │   │ header, EOF │   │ header      │
//!   └─────────────┘   └─────────────┘   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod time;

pub mod cycle;
pub mod queue;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, SyncStrategy};
pub use cycle::RollCycle;
pub use error::{Result, TideError};
pub use queue::{Appender, Queue, ReadDocument, Tailer, WriteDocument};
pub use store::{IndexLookup, ReplicationCounters, ScanResult, SegmentStore, WriteCursor};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tidelog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
