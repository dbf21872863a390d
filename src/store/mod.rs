//! Segment Store Module
//!
//! One memory-mapped file per cycle, shared by every process that opens the
//! queue.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ HEADER (128 bytes)                                           │
//! │   state u32 │ version u32 │ magic "TIDELOG\0"                │
//! │   epoch i64 │ cycle i64 │ capacity u64                       │
//! │   source id u32 │ checkpoint interval u32 │ sequence bits u32│
//! │   crc32 u32 (over version..sequence bits)                    │
//! │   write position u64 │ last replicated u64 │ last acked u64  │
//! │   EOF position u64 │ allocated u64 │ reserved                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ RECORDS (4-byte aligned)                                     │
//! │   [header word u32][payload]                                 │
//! │   [header word u32][payload]                                 │
//! │   ...                                                        │
//! │   [EOF marker u32] once the queue rolled past this cycle     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ unwritten up to the allocated length (whole chunks)          │
//! ├ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─┤
//! │ mapped but not yet in the file, up to capacity               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The file grows one chunk at a time, by the writer holding the busy tail
//! record, and publishes the new length in the `allocated` header word
//! before the record becomes ready. Capacity is the hard maximum.
//!
//! All integers are little-endian. A checkpoint is a metadata record holding
//! `(sequence u64, position u64)` and sits right before the data record it
//! names, once every `checkpoint interval` records.

mod header;
mod index;
mod mapped;
mod record;
mod segment;
pub(crate) mod wait;

use std::time::Duration;

use crate::error::Result;

pub use header::{HeaderFields, HeaderState, HEADER_SIZE};
pub use index::{Checkpoint, CoarseIndex};
pub use mapped::MappedFile;
pub use record::MAX_PAYLOAD_LEN;
pub use segment::{RecordInfo, RecordKind, Records, SegmentStore, DATA_START};
pub(crate) use record::record_size;
pub(crate) use segment::Slot;

/// Outcome of positioning on an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResult {
    /// The data record starts at `position`
    Found { position: u64 },
    /// The record is not written yet, or the segment ended before it
    NoData,
    /// The index belongs to a cycle that is not available here
    NotReached,
    /// A malformed record header sits at `position`
    Corrupted { position: u64 },
}

impl ScanResult {
    pub fn is_found(&self) -> bool {
        matches!(self, ScanResult::Found { .. })
    }
}

/// Positioning within a segment by index or byte position
pub trait IndexLookup {
    /// Locate the data record for `index`
    fn move_to_index_for_read(&self, index: u64) -> Result<ScanResult>;

    /// Locate `index` scanning forward from a record already known to sit
    /// at `known_position` with `known_index`
    fn linear_scan_to(&self, index: u64, known_index: u64, known_position: u64)
        -> Result<ScanResult>;

    /// Sequence of the last data record starting at or before `position`
    /// (strictly before when `inclusive` is false)
    fn sequence_for_position(&self, position: u64, inclusive: bool) -> Result<Option<u64>>;

    /// Highest published sequence; a busy record counts as the end
    fn last_sequence_number(&self) -> Result<Option<u64>>;

    /// True if a checkpoint is kept for `index`'s sequence
    fn indexable(&self, index: u64) -> bool;

    /// Remember where a sequence starts
    fn set_position_for_sequence_number(&self, sequence: u64, position: u64);

    /// Position after the last readable record and the sequence it would carry
    fn move_to_end_for_read(&self) -> Result<Checkpoint>;

    /// Rebuild the in-memory checkpoint table from the file
    fn init_index(&self) -> Result<usize>;
}

/// The segment's shared write cursor and termination
pub trait WriteCursor {
    /// Start of the last published record (0 when empty)
    fn write_position(&self) -> u64;

    /// Advance the write position; lower values are ignored
    fn set_write_position(&self, position: u64) -> Result<()>;

    /// Terminate the segment with an EOF marker after its last record
    fn write_eof(&self, timeout: Duration) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Replication progress shared by every process using the segment
pub trait ReplicationCounters {
    fn last_index_replicated(&self) -> Option<u64>;

    /// Raise the counter; fails with `ReadOnly` on a read-only store
    fn set_last_index_replicated(&self, index: u64) -> Result<()>;

    fn last_acknowledged_index_replicated(&self) -> Option<u64>;

    fn set_last_acknowledged_index_replicated(&self, index: u64) -> Result<()>;
}
