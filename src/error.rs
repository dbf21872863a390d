//! Error types for tidelog
//!
//! Provides a unified error type for all operations.
//!
//! "No data yet" and "segment not created yet" are not errors: they come back
//! as [`ScanResult`](crate::store::ScanResult) variants or `Ok(None)`.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using TideError
pub type Result<T> = std::result::Result<T, TideError>;

/// Unified error type for tidelog operations
#[derive(Debug, Error)]
pub enum TideError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Shared Header / Record Protocol Errors
    // -------------------------------------------------------------------------
    /// A header or record stayed busy past the configured bound. The peer that
    /// owned it most likely died mid-write; the caller decides how to repair.
    #[error("Unrecoverable timeout after {waited_ms} ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("Corrupted stream in {path:?} at position {position}: {reason}")]
    Corrupted {
        path: PathBuf,
        position: u64,
        reason: String,
    },

    #[error("Invalid segment header in {path:?}: {reason}")]
    InvalidHeader { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // Addressing Errors
    // -------------------------------------------------------------------------
    #[error("Resource name {name:?} does not match the roll cycle: {reason}")]
    ResourceName { name: String, reason: String },

    #[error("Sequence overflow in cycle {cycle}: sequence {sequence} exceeds max {max}")]
    SequenceOverflow { cycle: i64, sequence: u64, max: u64 },

    #[error("Cycle {cycle} cannot be encoded into an index")]
    CycleOutOfRange { cycle: i64 },

    // -------------------------------------------------------------------------
    // Segment Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Segment for cycle {cycle} is full: need {needed} bytes, {remaining} remaining")]
    SegmentFull {
        cycle: i64,
        needed: u64,
        remaining: u64,
    },

    #[error("Segment for cycle {cycle} already ends with an EOF marker")]
    SegmentClosed { cycle: i64 },

    #[error("Queue was opened read-only")]
    ReadOnly,

    // -------------------------------------------------------------------------
    // Metadata / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Queue metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for TideError {
    fn from(e: bincode::Error) -> Self {
        TideError::Serialization(e.to_string())
    }
}
