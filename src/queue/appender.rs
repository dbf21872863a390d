//! Appender
//!
//! Writes records at the end of the queue, rolling to a new segment when
//! the clock enters a new cycle.
//!
//! ## Write Path
//! ```text
//! writing_document(hint)
//!   1. roll check: current(now, epoch) vs open cycle
//!        new cycle  -> EOF on the open segment, open/create the new one
//!        older cycle (clock went back) -> keep writing, warn
//!   2. reserve: CAS NOT_WRITTEN -> BUSY on the next free record
//!        (checkpoint first when the sequence is due one); if another
//!        appender closed the segment, reopen at the newest cycle and retry
//!   3. caller writes the payload through WriteDocument
//!   4. commit/drop: READY | len (release), advance write position, sync
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{Config, SyncStrategy};
use crate::cycle::RollCycle;
use crate::error::{Result, TideError};
use crate::store::{
    record_size, Checkpoint, IndexLookup, SegmentStore, WriteCursor, DATA_START, MAX_PAYLOAD_LEN,
};
use crate::time::TimeProvider;

use super::director::QueueDirector;

/// Appends records to a queue
pub struct Appender {
    director: Arc<QueueDirector>,

    // -------------------------------------------------------------------------
    // Settings (from Config)
    // -------------------------------------------------------------------------
    roll_cycle: RollCycle,
    epoch: i64,
    time_provider: Arc<dyn TimeProvider>,
    sync_strategy: SyncStrategy,
    timeout: Duration,

    // -------------------------------------------------------------------------
    // Write State
    // -------------------------------------------------------------------------
    store: Option<Arc<SegmentStore>>,
    /// Where the next reservation starts looking in `store`
    cursor: Checkpoint,
    last_index: Option<u64>,
    unsynced: usize,
}

impl Appender {
    pub(crate) fn new(director: Arc<QueueDirector>, config: &Config) -> Self {
        Self {
            director,
            roll_cycle: config.roll_cycle.clone(),
            epoch: config.epoch,
            time_provider: Arc::clone(&config.time_provider),
            sync_strategy: config.sync_strategy,
            timeout: config.timeout(),
            store: None,
            cursor: Checkpoint {
                sequence: 0,
                position: DATA_START,
            },
            last_index: None,
            unsynced: 0,
        }
    }

    /// Start a record with room for at least `size_hint` payload bytes
    ///
    /// The record is published when the returned document is committed or
    /// dropped. Until then other writers to the same segment wait on it.
    pub fn writing_document(&mut self, size_hint: usize) -> Result<WriteDocument<'_>> {
        let hint = u32::try_from(size_hint)
            .ok()
            .filter(|&hint| hint <= MAX_PAYLOAD_LEN)
            .ok_or_else(|| {
                TideError::Config(format!(
                    "record of {} bytes exceeds the {} byte limit",
                    size_hint, MAX_PAYLOAD_LEN
                ))
            })?;

        let (store, slot) = match self.reserve(hint) {
            Err(TideError::SegmentClosed { cycle }) => {
                // Another appender rolled past our segment; follow it
                debug!(cycle, "Open segment was closed by another appender, reopening");
                self.store = None;
                self.reserve(hint)?
            }
            other => other?,
        };
        let index = match self.roll_cycle.to_index(store.cycle(), slot.sequence) {
            Ok(index) => index,
            Err(e) => {
                // Release the claim so other writers can move past it
                store.publish(slot.position, 0, true)?;
                self.cursor.position = slot.position + record_size(0);
                return Err(e);
            }
        };

        Ok(WriteDocument {
            appender: self,
            store,
            position: slot.position,
            sequence: slot.sequence,
            index,
            len: 0,
            published: false,
        })
    }

    /// Append one record holding `payload`, returning its index
    pub fn write_bytes(&mut self, payload: &[u8]) -> Result<u64> {
        let mut document = self.writing_document(payload.len())?;
        document.write(payload)?;
        document.commit()
    }

    /// Index of the last record this appender published
    pub fn last_index_appended(&self) -> Option<u64> {
        self.last_index
    }

    /// Cycle of the open segment, if one is open yet
    pub fn cycle(&self) -> Option<i64> {
        self.store.as_ref().map(|store| store.cycle())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn reserve(&mut self, hint: u32) -> Result<(Arc<SegmentStore>, Checkpoint)> {
        let store = self.roll_if_needed()?;
        let max = self.roll_cycle.max_sequence();
        if self.cursor.sequence > max {
            return Err(TideError::SequenceOverflow {
                cycle: store.cycle(),
                sequence: self.cursor.sequence,
                max,
            });
        }
        let slot = store.reserve(self.cursor, hint)?;
        Ok((store, slot))
    }

    fn roll_if_needed(&mut self) -> Result<Arc<SegmentStore>> {
        let now = self.time_provider.current_time_millis();
        let mut cycle = self.roll_cycle.current(now, self.epoch);

        match &self.store {
            Some(store) if store.cycle() == cycle => return Ok(Arc::clone(store)),
            Some(store) if cycle < store.cycle() => {
                warn!(
                    open_cycle = store.cycle(),
                    clock_cycle = cycle,
                    "Clock moved backwards, appending to the open cycle"
                );
                return Ok(Arc::clone(store));
            }
            Some(store) => {
                if let Err(e) = store.write_eof(self.timeout) {
                    warn!(cycle = store.cycle(), error = %e, "Failed to close segment on roll");
                    return Err(e);
                }
                debug!(from = store.cycle(), to = cycle, "Rolling appender");
            }
            None => {
                if let Some(last) = self.director.last_cycle()? {
                    if last < cycle {
                        if let Some(old) = self.director.store_for_cycle(last, false)? {
                            old.write_eof(self.timeout)?;
                            debug!(cycle = last, "Closed previous cycle on first append");
                        }
                    } else if last > cycle {
                        warn!(
                            last_cycle = last,
                            clock_cycle = cycle,
                            "Clock is behind the newest segment, appending to it"
                        );
                        cycle = last;
                    }
                }
            }
        }

        // Fail before creating a file whose records could never be indexed
        self.roll_cycle.to_index(cycle, 0)?;

        let store = self
            .director
            .store_for_cycle(cycle, true)?
            .ok_or(TideError::ReadOnly)?;
        self.cursor = store.move_to_end_for_read()?;
        self.store = Some(Arc::clone(&store));
        Ok(store)
    }

    fn published(
        &mut self,
        store: &SegmentStore,
        position: u64,
        sequence: u64,
        len: u32,
        index: u64,
    ) -> Result<()> {
        self.cursor = Checkpoint {
            sequence: sequence + 1,
            position: position + record_size(len),
        };
        self.last_index = Some(index);

        match self.sync_strategy {
            SyncStrategy::OsManaged => {}
            SyncStrategy::EveryWrite => store.sync_record(position, len)?,
            SyncStrategy::EveryNWrites { count } => {
                self.unsynced += 1;
                if self.unsynced >= count {
                    store.flush()?;
                    self.unsynced = 0;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Appender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appender")
            .field("cycle", &self.cycle())
            .field("cursor", &self.cursor)
            .field("last_index", &self.last_index)
            .finish()
    }
}

// =============================================================================
// WriteDocument
// =============================================================================

/// A reserved record being filled
///
/// Committing or dropping it publishes the record with the bytes written so
/// far.
pub struct WriteDocument<'a> {
    appender: &'a mut Appender,
    store: Arc<SegmentStore>,
    position: u64,
    sequence: u64,
    index: u64,
    len: u32,
    published: bool,
}

impl WriteDocument<'_> {
    /// Append bytes to the payload
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.store.write_payload(self.position, self.len, bytes)?;
        self.len += bytes.len() as u32;
        Ok(())
    }

    /// Index the record will have
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Payload bytes written so far
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Publish the record and return its index
    pub fn commit(mut self) -> Result<u64> {
        self.publish()
    }

    fn publish(&mut self) -> Result<u64> {
        if self.published {
            return Ok(self.index);
        }
        self.published = true;
        self.store.publish(self.position, self.len, false)?;
        self.appender
            .published(&self.store, self.position, self.sequence, self.len, self.index)?;
        Ok(self.index)
    }
}

impl Drop for WriteDocument<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.publish() {
            warn!(index = self.index, error = %e, "Failed to publish record on drop");
        }
    }
}
