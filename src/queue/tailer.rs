//! Tailer
//!
//! A read cursor over the whole queue. It walks records in index order,
//! skips queue bookkeeping, and follows EOF markers into the next cycle.
//!
//! The cursor starts before the first record. `to_start`, `to_end` and
//! `move_to_index` reposition it; reading a document and dropping it moves
//! past that record.

use std::sync::Arc;

use bytes::Bytes;

use crate::cycle::RollCycle;
use crate::error::Result;
use crate::store::{IndexLookup, ScanResult, SegmentStore, Slot, DATA_START};

use super::director::QueueDirector;

/// Where the next read starts
#[derive(Debug)]
enum Cursor {
    BeforeStart,
    At {
        store: Arc<SegmentStore>,
        /// Next record to look at (may be a checkpoint or an EOF marker)
        position: u64,
        /// Sequence the next data record will have
        sequence: u64,
    },
}

/// Reads records from a queue
#[derive(Debug)]
pub struct Tailer {
    director: Arc<QueueDirector>,
    roll_cycle: RollCycle,
    cursor: Cursor,
}

impl Tailer {
    pub(crate) fn new(director: Arc<QueueDirector>) -> Self {
        let roll_cycle = director.config().roll_cycle.clone();
        Self {
            director,
            roll_cycle,
            cursor: Cursor::BeforeStart,
        }
    }

    /// Index of the next record to read, if positioned
    pub fn index(&self) -> Option<u64> {
        match &self.cursor {
            Cursor::BeforeStart => None,
            Cursor::At {
                store, sequence, ..
            } => self.roll_cycle.to_index(store.cycle(), *sequence).ok(),
        }
    }

    /// Cycle the cursor is in, if positioned
    pub fn cycle(&self) -> Option<i64> {
        match &self.cursor {
            Cursor::BeforeStart => None,
            Cursor::At { store, .. } => Some(store.cycle()),
        }
    }

    /// Position before the first record of the first cycle
    ///
    /// With no segments yet the cursor stays before the start and the next
    /// read tries again.
    pub fn to_start(&mut self) -> Result<()> {
        self.cursor = Cursor::BeforeStart;
        if let Some(first) = self.director.first_cycle()? {
            if let Some(store) = self.director.store_for_cycle(first, false)? {
                self.cursor = Cursor::At {
                    store,
                    position: DATA_START,
                    sequence: 0,
                };
            }
        }
        Ok(())
    }

    /// Position after the last readable record of the last cycle
    pub fn to_end(&mut self) -> Result<()> {
        self.cursor = Cursor::BeforeStart;
        if let Some(last) = self.director.last_cycle()? {
            if let Some(store) = self.director.store_for_cycle(last, false)? {
                let end = store.move_to_end_for_read()?;
                self.cursor = Cursor::At {
                    store,
                    position: end.position,
                    sequence: end.sequence,
                };
            }
        }
        Ok(())
    }

    /// Position on the record with `index`
    ///
    /// On anything but `Found` the cursor is left where it was.
    pub fn move_to_index(&mut self, index: u64) -> Result<ScanResult> {
        let cycle = self.roll_cycle.to_cycle(index);
        let sequence = self.roll_cycle.to_sequence(index);

        let store = match self.director.store_for_cycle(cycle, false)? {
            Some(store) => store,
            None => return Ok(ScanResult::NotReached),
        };

        let result = match &self.cursor {
            Cursor::At {
                store: current,
                position,
                sequence: at,
            } if current.cycle() == cycle && *at <= sequence => {
                let known = self.roll_cycle.to_index(cycle, *at)?;
                store.linear_scan_to(index, known, *position)?
            }
            _ => store.move_to_index_for_read(index)?,
        };

        if let ScanResult::Found { position } = result {
            self.cursor = Cursor::At {
                store,
                position,
                sequence,
            };
        }
        Ok(result)
    }

    /// The next data record, or `None` when nothing more is readable yet
    ///
    /// Fails with `Corrupted` on a malformed record and with `Timeout` when
    /// a record stays busy past the configured bound.
    pub fn reading_document(&mut self) -> Result<Option<ReadDocument<'_>>> {
        if matches!(self.cursor, Cursor::BeforeStart) {
            self.to_start()?;
        }

        loop {
            let (store, position, sequence) = match &self.cursor {
                Cursor::BeforeStart => return Ok(None),
                Cursor::At {
                    store,
                    position,
                    sequence,
                } => (Arc::clone(store), *position, *sequence),
            };

            match store.read_slot(position, sequence)? {
                Slot::Data { len, next } => {
                    // Bounds were checked by the scan; fail here rather than
                    // hand out a short payload
                    store.payload(position, len)?;
                    let index = self.roll_cycle.to_index(store.cycle(), sequence)?;
                    return Ok(Some(ReadDocument {
                        tailer: self,
                        store,
                        position,
                        next,
                        sequence,
                        index,
                        len,
                        rolled_back: false,
                    }));
                }
                Slot::Skip { next } => self.advance(next, sequence),
                Slot::NotWritten | Slot::Busy => return Ok(None),
                Slot::EndOfFile => {
                    let next = match self.director.next_cycle(store.cycle())? {
                        Some(cycle) => self.director.store_for_cycle(cycle, false)?,
                        None => None,
                    };
                    match next {
                        Some(store) => {
                            self.cursor = Cursor::At {
                                store,
                                position: DATA_START,
                                sequence: 0,
                            };
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Move past the next data record; false if there is none
    pub fn next_index(&mut self) -> Result<bool> {
        Ok(self.reading_document()?.is_some())
    }

    /// Copy out the next data record's payload
    pub fn read_bytes(&mut self) -> Result<Option<Bytes>> {
        Ok(self
            .reading_document()?
            .map(|document| Bytes::copy_from_slice(document.payload())))
    }

    fn advance(&mut self, next: u64, next_sequence: u64) {
        if let Cursor::At {
            position, sequence, ..
        } = &mut self.cursor
        {
            *position = next;
            *sequence = next_sequence;
        }
    }
}

// =============================================================================
// ReadDocument
// =============================================================================

/// A ready record under the cursor
///
/// Dropping it moves the tailer past the record unless
/// [`rollback_on_close`](ReadDocument::rollback_on_close) was called.
pub struct ReadDocument<'a> {
    tailer: &'a mut Tailer,
    store: Arc<SegmentStore>,
    position: u64,
    next: u64,
    sequence: u64,
    index: u64,
    len: u32,
    rolled_back: bool,
}

impl ReadDocument<'_> {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn payload(&self) -> &[u8] {
        // Checked when the document was created
        self.store
            .payload(self.position, self.len)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte position of the record in its segment
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Leave the cursor on this record when the document is dropped
    pub fn rollback_on_close(&mut self) {
        self.rolled_back = true;
    }
}

impl Drop for ReadDocument<'_> {
    fn drop(&mut self) {
        if !self.rolled_back {
            self.tailer.advance(self.next, self.sequence + 1);
        }
    }
}
